//! Core types for the chessd server.
//!
//! This module defines the domain vocabulary shared by the rules engine and
//! the registries: piece and color encoding, board squares, castling state,
//! and the position snapshot a live match carries.
//!
//! Board orientation follows the wire protocol: row 0 is rank 8 (Black's back
//! rank), row 7 is rank 1, column 0 is file A. In the serialized board string
//! lowercase letters are White's pieces, uppercase are Black's, and `.` is an
//! empty square.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Color & piece
// ---------------------------------------------------------------------------

/// The side a piece or player belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Returns the opposite color.
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Row delta for a forward pawn step. White pawns move toward row 0.
    pub fn pawn_direction(self) -> i8 {
        match self {
            Color::White => -1,
            Color::Black => 1,
        }
    }

    /// Row a pawn of this color starts on.
    pub fn pawn_start_row(self) -> u8 {
        match self {
            Color::White => 6,
            Color::Black => 1,
        }
    }

    /// Back-rank row for this color (king and rook home squares).
    pub fn back_row(self) -> u8 {
        match self {
            Color::White => 7,
            Color::Black => 0,
        }
    }

    /// Row on which a pawn of this color promotes.
    pub fn promotion_row(self) -> u8 {
        match self {
            Color::White => 0,
            Color::Black => 7,
        }
    }

    /// Row a pawn of this color occupies when it may capture en passant
    /// (its fifth rank).
    pub fn en_passant_row(self) -> u8 {
        match self {
            Color::White => 3,
            Color::Black => 4,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// A chess piece type, without color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceKind {
    King,
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

impl PieceKind {
    /// Parses a promotion letter (`Q R B N`, any case). The king and pawn are
    /// never valid promotion targets.
    pub fn from_promotion_letter(c: char) -> Option<PieceKind> {
        match c.to_ascii_uppercase() {
            'Q' => Some(PieceKind::Queen),
            'R' => Some(PieceKind::Rook),
            'B' => Some(PieceKind::Bishop),
            'N' => Some(PieceKind::Knight),
            _ => None,
        }
    }
}

/// A piece with both kind and color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    pub fn new(kind: PieceKind, color: Color) -> Self {
        Self { kind, color }
    }

    /// Converts the piece to its wire character. White pieces are lowercase,
    /// Black pieces uppercase.
    pub fn to_wire_char(self) -> char {
        let c = match self.kind {
            PieceKind::King => 'k',
            PieceKind::Queen => 'q',
            PieceKind::Rook => 'r',
            PieceKind::Bishop => 'b',
            PieceKind::Knight => 'n',
            PieceKind::Pawn => 'p',
        };
        match self.color {
            Color::White => c,
            Color::Black => c.to_ascii_uppercase(),
        }
    }

    /// Parses a wire character into a `Piece`. Returns `None` for `.` and
    /// anything else that is not a piece letter.
    pub fn from_wire_char(c: char) -> Option<Self> {
        let color = if c.is_ascii_lowercase() {
            Color::White
        } else {
            Color::Black
        };
        let kind = match c.to_ascii_lowercase() {
            'k' => PieceKind::King,
            'q' => PieceKind::Queen,
            'r' => PieceKind::Rook,
            'b' => PieceKind::Bishop,
            'n' => PieceKind::Knight,
            'p' => PieceKind::Pawn,
            _ => return None,
        };
        Some(Piece { kind, color })
    }
}

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

/// A board square addressed by 0-based row and column.
///
/// Row 0 is rank 8, row 7 is rank 1; column 0 is file A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    pub row: u8,
    pub col: u8,
}

impl Square {
    /// Creates a square from 0-based row and column.
    /// Panics in debug builds if either index is out of range.
    pub fn new(row: u8, col: u8) -> Self {
        debug_assert!(row < 8 && col < 8, "square out of bounds");
        Self { row, col }
    }

    /// Parses algebraic notation (e.g. `"E2"` or `"e2"`) into a square.
    /// Returns `None` for anything that is not a file A–H followed by a
    /// rank 1–8.
    pub fn from_notation(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].to_ascii_uppercase().wrapping_sub(b'A');
        let rank = bytes[1].wrapping_sub(b'1');
        if file < 8 && rank < 8 {
            Some(Square {
                row: 7 - rank,
                col: file,
            })
        } else {
            None
        }
    }

    /// Converts the square to uppercase algebraic notation (e.g. `"E2"`).
    pub fn to_notation(self) -> String {
        format!("{}{}", (b'A' + self.col) as char, 8 - self.row)
    }

    /// Returns the square offset by `(dr, dc)`, or `None` if off the board.
    pub fn offset(self, dr: i8, dc: i8) -> Option<Square> {
        let r = self.row as i8 + dr;
        let c = self.col as i8 + dc;
        if (0..8).contains(&r) && (0..8).contains(&c) {
            Some(Square::new(r as u8, c as u8))
        } else {
            None
        }
    }

    /// Flat index (0..63), row-major from rank 8.
    pub fn index(self) -> usize {
        (self.row as usize) * 8 + self.col as usize
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_notation())
    }
}

// ---------------------------------------------------------------------------
// Castling state
// ---------------------------------------------------------------------------

/// Movement flags for one side's king and corner rooks.
///
/// These record whether the pieces have ever left their home squares, which
/// is what castling legality is judged against. All flags start `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideCastling {
    pub king_moved: bool,
    /// The a-file (queenside) rook.
    pub rook_a_moved: bool,
    /// The h-file (kingside) rook.
    pub rook_h_moved: bool,
}

/// Castling flags for both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CastlingState {
    pub white: SideCastling,
    pub black: SideCastling,
}

impl CastlingState {
    pub fn side(&self, color: Color) -> &SideCastling {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    pub fn side_mut(&mut self, color: Color) -> &mut SideCastling {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// The 8×8 board as a flat 64-element array, row-major from rank 8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    squares: [Option<Piece>; 64],
}

impl Default for Board {
    /// Returns an empty board.
    fn default() -> Self {
        Self {
            squares: [None; 64],
        }
    }
}

impl Board {
    /// Returns the piece on the given square, if any.
    pub fn get(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.index()]
    }

    /// Sets (or clears) the piece on the given square.
    pub fn set(&mut self, sq: Square, piece: Option<Piece>) {
        self.squares[sq.index()] = piece;
    }

    /// Creates the standard starting position.
    pub fn starting_position() -> Self {
        let mut board = Board::default();

        let back_rank = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];

        for (col, &kind) in back_rank.iter().enumerate() {
            let col = col as u8;
            board.set(Square::new(0, col), Some(Piece::new(kind, Color::Black)));
            board.set(Square::new(7, col), Some(Piece::new(kind, Color::White)));
        }
        for col in 0..8 {
            board.set(
                Square::new(1, col),
                Some(Piece::new(PieceKind::Pawn, Color::Black)),
            );
            board.set(
                Square::new(6, col),
                Some(Piece::new(PieceKind::Pawn, Color::White)),
            );
        }

        board
    }

    /// Finds the king square for the given color.
    /// Returns `None` only for corrupt positions; a legal game always has
    /// exactly one king of each color.
    pub fn find_king(&self, color: Color) -> Option<Square> {
        for row in 0..8u8 {
            for col in 0..8u8 {
                let sq = Square::new(row, col);
                if let Some(piece) = self.get(sq)
                    && piece.kind == PieceKind::King
                    && piece.color == color
                {
                    return Some(sq);
                }
            }
        }
        None
    }

    /// Serializes the board as the 64-character wire string, row-major from
    /// rank 8. Empty squares are `.`.
    pub fn to_wire_string(&self) -> String {
        self.squares
            .iter()
            .map(|sq| sq.map_or('.', Piece::to_wire_char))
            .collect()
    }

    /// Parses a 64-character wire string back into a board.
    pub fn from_wire_string(s: &str) -> Result<Self, String> {
        if s.len() != 64 {
            return Err(format!("board string must be 64 chars, got {}", s.len()));
        }
        let mut board = Board::default();
        for (i, c) in s.chars().enumerate() {
            if c == '.' {
                continue;
            }
            let piece = Piece::from_wire_char(c)
                .ok_or_else(|| format!("invalid board char '{c}' at index {i}"))?;
            board.squares[i] = Some(piece);
        }
        Ok(board)
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// The complete game state of one live match, as seen by the rules engine.
///
/// A `Position` carries everything legality depends on: the board, the side
/// to move, castling flags, and the en passant file. The move counters are
/// bookkeeping maintained by the router.
#[derive(Debug, Clone)]
pub struct Position {
    pub board: Board,
    pub side_to_move: Color,
    pub castling: CastlingState,
    /// File (0–7) of the pawn that just advanced two squares, if any.
    pub en_passant_file: Option<u8>,
    /// Endpoints of the last applied move.
    pub last_move: Option<(Square, Square)>,
    /// Half-moves since the last pawn move or capture. Maintained but not
    /// consulted (no fifty-move rule).
    pub halfmove_clock: u32,
    /// Starts at 1, incremented after Black's move.
    pub fullmove_number: u32,
}

impl Position {
    /// Creates the starting position with White to move.
    pub fn initial() -> Self {
        Self {
            board: Board::starting_position(),
            side_to_move: Color::White,
            castling: CastlingState::default(),
            en_passant_file: None,
            last_move: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal verdict
// ---------------------------------------------------------------------------

/// Outcome of terminal-state detection on a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The side to move is mated; `winner` is the other side.
    Checkmate { winner: Color },
    /// The side to move has no legal move but is not in check.
    Stalemate,
    /// Neither side can possibly mate.
    InsufficientMaterial,
    /// The game continues.
    Ongoing,
}

impl Verdict {
    /// Returns `true` unless the game continues.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Verdict::Ongoing)
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Lifecycle state of one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected but not logged in.
    Offline,
    /// Logged in and free to be challenged or queued.
    Online,
    /// Playing a live match.
    InMatch,
}

impl SessionState {
    /// Wire representation used in `PLAYER_LIST`.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Offline => "OFFLINE",
            SessionState::Online => "ONLINE",
            SessionState::InMatch => "IN_MATCH",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
