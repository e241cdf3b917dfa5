//! Chess rules engine.
//!
//! Pure functions over a [`Position`] snapshot — no I/O, no locks. The engine
//! answers three questions:
//!
//! - Is a single move legal? ([`is_legal_move`], including castling,
//!   en passant, promotion squares, and the no-self-check rule)
//! - What happens when a legal move is applied? ([`apply_move`])
//! - Is the game over? ([`check_game_end`]: checkmate, stalemate,
//!   insufficient material)
//!
//! Legality is a predicate on `(from, to)` pairs rather than a generated move
//! list: the protocol validates one submitted move at a time and enumerates
//! targets for a single square on request, so the engine probes destinations
//! instead of collecting them. Threefold repetition and the fifty-move rule
//! are not detected here.

use crate::types::*;

// ---------------------------------------------------------------------------
// Attack detection
// ---------------------------------------------------------------------------

const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (-2, -1),
    (-2, 1),
    (-1, -2),
    (-1, 2),
    (1, -2),
    (1, 2),
    (2, -1),
    (2, 1),
];

const ROOK_DIRS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

/// Returns `true` if any piece of `attacker` attacks the given square under
/// normal movement rules.
///
/// Used for check detection and for the castling safety requirements (the
/// king may not castle out of, through, or into an attacked square).
pub fn is_square_attacked(board: &Board, sq: Square, attacker: Color) -> bool {
    // Knights
    for &(dr, dc) in &KNIGHT_OFFSETS {
        if let Some(from) = sq.offset(dr, dc)
            && let Some(piece) = board.get(from)
            && piece.color == attacker
            && piece.kind == PieceKind::Knight
        {
            return true;
        }
    }

    // Kings (one square in any direction)
    for dr in -1..=1i8 {
        for dc in -1..=1i8 {
            if dr == 0 && dc == 0 {
                continue;
            }
            if let Some(from) = sq.offset(dr, dc)
                && let Some(piece) = board.get(from)
                && piece.color == attacker
                && piece.kind == PieceKind::King
            {
                return true;
            }
        }
    }

    // Pawns attack diagonally forward; the attacker sits one row behind the
    // target in its own movement direction.
    let dir = attacker.pawn_direction();
    for dc in [-1i8, 1] {
        if let Some(from) = sq.offset(-dir, dc)
            && let Some(piece) = board.get(from)
            && piece.color == attacker
            && piece.kind == PieceKind::Pawn
        {
            return true;
        }
    }

    // Sliding pieces along rays, stopping at the first occupant.
    for &(dr, dc) in &BISHOP_DIRS {
        if ray_hits(board, sq, dr, dc, attacker, PieceKind::Bishop) {
            return true;
        }
    }
    for &(dr, dc) in &ROOK_DIRS {
        if ray_hits(board, sq, dr, dc, attacker, PieceKind::Rook) {
            return true;
        }
    }

    false
}

/// Walks outward from `sq` along `(dr, dc)` and reports whether the first
/// occupied square holds an attacking slider (`kind` or a queen).
fn ray_hits(board: &Board, sq: Square, dr: i8, dc: i8, attacker: Color, kind: PieceKind) -> bool {
    let mut cur = sq;
    while let Some(next) = cur.offset(dr, dc) {
        if let Some(piece) = board.get(next) {
            return piece.color == attacker
                && (piece.kind == kind || piece.kind == PieceKind::Queen);
        }
        cur = next;
    }
    false
}

/// Returns `true` if the king of the given color is in check.
pub fn is_in_check(board: &Board, color: Color) -> bool {
    match board.find_king(color) {
        Some(king_sq) => is_square_attacked(board, king_sq, color.opponent()),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Legality predicate
// ---------------------------------------------------------------------------

/// Returns `true` iff moving the piece on `from` to `to` is legal for `side`
/// in the given position.
///
/// The check runs in three stages: endpoint and ownership constraints, the
/// piece-specific motion rule (castling included), and finally a tentative
/// execution to reject moves that leave `side`'s own king in check.
pub fn is_legal_move(pos: &Position, from: Square, to: Square, side: Color) -> bool {
    if from == to {
        return false;
    }

    let piece = match pos.board.get(from) {
        Some(p) if p.color == side => p,
        _ => return false,
    };

    // Destination must be empty or hold an enemy piece.
    if let Some(dest) = pos.board.get(to)
        && dest.color == side
    {
        return false;
    }

    // Castling is validated in full here, including the attack checks on the
    // king's path, so it needs no tentative-execution pass afterwards.
    if piece.kind == PieceKind::King && from.row == to.row && from.col.abs_diff(to.col) == 2 {
        return is_castling_legal(pos, from, to, side);
    }

    if !satisfies_motion(pos, piece, from, to) {
        return false;
    }

    // Tentatively execute on a scratch board (including en passant victim
    // removal) and reject if the mover's king ends up in check.
    let mut board = pos.board.clone();
    if is_en_passant(pos, piece, from, to) {
        board.set(Square::new(from.row, to.col), None);
    }
    board.set(to, Some(piece));
    board.set(from, None);

    !is_in_check(&board, side)
}

/// Checks the piece-specific motion rule for a non-castling move.
/// Endpoint ownership has already been validated.
fn satisfies_motion(pos: &Position, piece: Piece, from: Square, to: Square) -> bool {
    let dr = to.row as i8 - from.row as i8;
    let dc = to.col as i8 - from.col as i8;
    let dest = pos.board.get(to);

    match piece.kind {
        PieceKind::Pawn => {
            let dir = piece.color.pawn_direction();

            // Pushes require an empty destination.
            if dc == 0 && dest.is_none() {
                if dr == dir {
                    return true;
                }
                if from.row == piece.color.pawn_start_row()
                    && dr == 2 * dir
                    && pos
                        .board
                        .get(Square::new((from.row as i8 + dir) as u8, from.col))
                        .is_none()
                {
                    return true;
                }
                return false;
            }

            // Diagonal capture of an enemy piece.
            if dc.abs() == 1 && dr == dir && dest.is_some() {
                return true;
            }

            // En passant: diagonal step onto an empty square.
            if dc.abs() == 1 && dr == dir && dest.is_none() {
                return is_en_passant(pos, piece, from, to);
            }

            false
        }

        PieceKind::Knight => {
            (dr.abs() == 2 && dc.abs() == 1) || (dr.abs() == 1 && dc.abs() == 2)
        }

        PieceKind::Bishop => dr.abs() == dc.abs() && dr != 0 && path_clear(pos, from, to),

        PieceKind::Rook => (dr == 0 || dc == 0) && path_clear(pos, from, to),

        PieceKind::Queen => {
            (dr == 0 || dc == 0 || dr.abs() == dc.abs()) && path_clear(pos, from, to)
        }

        // Plain king step; castling was dispatched earlier.
        PieceKind::King => dr.abs() <= 1 && dc.abs() <= 1,
    }
}

/// Returns `true` if the move is an en passant capture: the pawn stands on
/// its fifth rank, steps diagonally onto the en passant file, and the square
/// beside it holds the enemy pawn that just double-stepped.
fn is_en_passant(pos: &Position, piece: Piece, from: Square, to: Square) -> bool {
    if piece.kind != PieceKind::Pawn {
        return false;
    }
    let Some(ep_file) = pos.en_passant_file else {
        return false;
    };
    if to.col != ep_file || from.row != piece.color.en_passant_row() {
        return false;
    }
    if to.row as i8 - from.row as i8 != piece.color.pawn_direction()
        || from.col.abs_diff(to.col) != 1
    {
        return false;
    }
    if pos.board.get(to).is_some() {
        return false;
    }
    matches!(
        pos.board.get(Square::new(from.row, to.col)),
        Some(p) if p.kind == PieceKind::Pawn && p.color == piece.color.opponent()
    )
}

/// Checks that every square strictly between `from` and `to` is empty.
/// Only meaningful for straight or diagonal lines.
fn path_clear(pos: &Position, from: Square, to: Square) -> bool {
    let dr = (to.row as i8 - from.row as i8).signum();
    let dc = (to.col as i8 - from.col as i8).signum();

    let mut cur = from;
    loop {
        cur = match cur.offset(dr, dc) {
            Some(sq) => sq,
            None => return false,
        };
        if cur == to {
            return true;
        }
        if pos.board.get(cur).is_some() {
            return false;
        }
    }
}

/// Validates a castling move (king shifts two files along its back rank).
fn is_castling_legal(pos: &Position, from: Square, to: Square, side: Color) -> bool {
    let back = side.back_row();
    if from != Square::new(back, 4) {
        return false;
    }

    let flags = pos.castling.side(side);
    if flags.king_moved {
        return false;
    }

    // The king may not castle while in check.
    if is_in_check(&pos.board, side) {
        return false;
    }

    let enemy = side.opponent();
    let own_rook = Piece::new(PieceKind::Rook, side);

    if to.col == 6 {
        // Kingside: rook on the h-file, f and g empty, neither attacked.
        if flags.rook_h_moved {
            return false;
        }
        if pos.board.get(Square::new(back, 7)) != Some(own_rook) {
            return false;
        }
        if pos.board.get(Square::new(back, 5)).is_some()
            || pos.board.get(Square::new(back, 6)).is_some()
        {
            return false;
        }
        !is_square_attacked(&pos.board, Square::new(back, 5), enemy)
            && !is_square_attacked(&pos.board, Square::new(back, 6), enemy)
    } else if to.col == 2 {
        // Queenside: rook on the a-file, b/c/d empty, c and d not attacked
        // (the b-file square is crossed only by the rook).
        if flags.rook_a_moved {
            return false;
        }
        if pos.board.get(Square::new(back, 0)) != Some(own_rook) {
            return false;
        }
        if pos.board.get(Square::new(back, 1)).is_some()
            || pos.board.get(Square::new(back, 2)).is_some()
            || pos.board.get(Square::new(back, 3)).is_some()
        {
            return false;
        }
        !is_square_attacked(&pos.board, Square::new(back, 2), enemy)
            && !is_square_attacked(&pos.board, Square::new(back, 3), enemy)
    } else {
        false
    }
}

// ---------------------------------------------------------------------------
// Move application
// ---------------------------------------------------------------------------

/// Facts about an applied move that the caller needs for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedMove {
    pub was_pawn_move: bool,
    pub was_capture: bool,
}

/// Applies an already-validated move to the position.
///
/// Handles the en passant victim, the castling rook shift, promotion
/// (defaulting to queen), castling-flag updates, the en passant file for the
/// next move, and the last-move record. Does **not** flip the side to move or
/// advance the move counters; the caller owns turn bookkeeping.
pub fn apply_move(
    pos: &mut Position,
    from: Square,
    to: Square,
    promotion: Option<PieceKind>,
) -> AppliedMove {
    let mut piece = pos
        .board
        .get(from)
        .expect("apply_move called with empty origin square");
    let side = piece.color;
    let is_pawn = piece.kind == PieceKind::Pawn;
    let mut was_capture = pos.board.get(to).is_some();

    // En passant capture: the victim sits beside the pawn, not on `to`.
    if is_pawn
        && from.col != to.col
        && pos.board.get(to).is_none()
        && pos.en_passant_file == Some(to.col)
    {
        pos.board.set(Square::new(from.row, to.col), None);
        was_capture = true;
    }

    // A double pawn push opens the en passant file for one reply.
    pos.en_passant_file = if is_pawn && from.row.abs_diff(to.row) == 2 {
        Some(from.col)
    } else {
        None
    };

    // Castling: shift the rook alongside the king.
    if piece.kind == PieceKind::King && from.col.abs_diff(to.col) == 2 {
        let back = to.row;
        if to.col == 6 {
            let rook = pos.board.get(Square::new(back, 7));
            pos.board.set(Square::new(back, 7), None);
            pos.board.set(Square::new(back, 5), rook);
        } else if to.col == 2 {
            let rook = pos.board.get(Square::new(back, 0));
            pos.board.set(Square::new(back, 0), None);
            pos.board.set(Square::new(back, 3), rook);
        }
    }

    // Promotion on the last rank, queen unless told otherwise.
    if is_pawn && to.row == side.promotion_row() {
        piece = Piece::new(promotion.unwrap_or(PieceKind::Queen), side);
    }

    pos.board.set(to, Some(piece));
    pos.board.set(from, None);

    // Castling flags track whether king/corner rooks ever left home.
    match piece.kind {
        PieceKind::King => pos.castling.side_mut(side).king_moved = true,
        PieceKind::Rook if from.row == side.back_row() => {
            if from.col == 0 {
                pos.castling.side_mut(side).rook_a_moved = true;
            } else if from.col == 7 {
                pos.castling.side_mut(side).rook_h_moved = true;
            }
        }
        _ => {}
    }

    pos.last_move = Some((from, to));

    AppliedMove {
        was_pawn_move: is_pawn,
        was_capture,
    }
}

// ---------------------------------------------------------------------------
// Terminal detection
// ---------------------------------------------------------------------------

/// Returns `true` if `side` has at least one legal move.
///
/// Probes every from/to pair and stops at the first hit; positions with any
/// mobile piece answer quickly.
pub fn has_any_legal_move(pos: &Position, side: Color) -> bool {
    for from_row in 0..8u8 {
        for from_col in 0..8u8 {
            let from = Square::new(from_row, from_col);
            match pos.board.get(from) {
                Some(p) if p.color == side => {}
                _ => continue,
            }
            for to_row in 0..8u8 {
                for to_col in 0..8u8 {
                    if is_legal_move(pos, from, Square::new(to_row, to_col), side) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Detects whether the position is terminal for the side to move.
pub fn check_game_end(pos: &Position) -> Verdict {
    if is_insufficient_material(&pos.board) {
        return Verdict::InsufficientMaterial;
    }

    let side = pos.side_to_move;
    if has_any_legal_move(pos, side) {
        return Verdict::Ongoing;
    }

    if is_in_check(&pos.board, side) {
        Verdict::Checkmate {
            winner: side.opponent(),
        }
    } else {
        Verdict::Stalemate
    }
}

/// Checks for dead positions where no checkmate can ever be forced:
/// K vs K, K+B vs K, K+N vs K, and K+B vs K+B.
pub fn is_insufficient_material(board: &Board) -> bool {
    let mut white_minor = 0;
    let mut black_minor = 0;
    let mut white_bishops = 0;
    let mut black_bishops = 0;
    let mut knights = 0;

    for row in 0..8u8 {
        for col in 0..8u8 {
            let Some(piece) = board.get(Square::new(row, col)) else {
                continue;
            };
            match piece.kind {
                // Any pawn or major piece is mating material.
                PieceKind::Queen | PieceKind::Rook | PieceKind::Pawn => return false,
                PieceKind::King => {}
                PieceKind::Bishop | PieceKind::Knight => {
                    if piece.color == Color::White {
                        white_minor += 1;
                    } else {
                        black_minor += 1;
                    }
                    if piece.kind == PieceKind::Bishop {
                        if piece.color == Color::White {
                            white_bishops += 1;
                        } else {
                            black_bishops += 1;
                        }
                    } else {
                        knights += 1;
                    }
                }
            }
        }
    }

    // K vs K
    if white_minor == 0 && black_minor == 0 {
        return true;
    }
    // K+B vs K or K+N vs K
    if white_minor + black_minor == 1 {
        return true;
    }
    // K+B vs K+B
    white_bishops == 1 && black_bishops == 1 && knights == 0
}

// ---------------------------------------------------------------------------
// Move enumeration for a single square
// ---------------------------------------------------------------------------

/// Enumerates every legal destination for the piece on `from`, playing as
/// `as_side`. Deliberately ignores whose turn it is so clients can preview
/// their own pieces out of turn; the result is empty if `from` does not hold
/// a piece of `as_side`.
pub fn valid_moves_from(pos: &Position, from: Square, as_side: Color) -> Vec<Square> {
    let mut moves = Vec::new();
    for row in 0..8u8 {
        for col in 0..8u8 {
            let to = Square::new(row, col);
            if is_legal_move(pos, from, to, as_side) {
                moves.push(to);
            }
        }
    }
    moves
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(s: &str) -> Square {
        Square::from_notation(s).unwrap()
    }

    /// Plays a sequence of already-legal moves, flipping the turn after each
    /// the way the router does.
    fn play(pos: &mut Position, moves: &[(&str, &str)]) {
        for &(from, to) in moves {
            let side = pos.side_to_move;
            assert!(
                is_legal_move(pos, sq(from), sq(to), side),
                "{from}->{to} should be legal for {side}"
            );
            apply_move(pos, sq(from), sq(to), None);
            pos.side_to_move = side.opponent();
        }
    }

    fn count_legal_moves(pos: &Position, side: Color) -> usize {
        let mut count = 0;
        for row in 0..8u8 {
            for col in 0..8u8 {
                count += valid_moves_from(pos, Square::new(row, col), side).len();
            }
        }
        count
    }

    #[test]
    fn test_starting_position_has_20_moves() {
        let pos = Position::initial();
        assert_eq!(count_legal_moves(&pos, Color::White), 20);
        assert_eq!(count_legal_moves(&pos, Color::Black), 20);
    }

    #[test]
    fn test_starting_position_not_terminal() {
        let pos = Position::initial();
        assert!(!is_in_check(&pos.board, Color::White));
        assert_eq!(check_game_end(&pos), Verdict::Ongoing);
    }

    #[test]
    fn test_pawn_cannot_jump_occupied_square() {
        let mut pos = Position::initial();
        // Block E3 with a knight, then the E2 pawn has no forward move.
        apply_move(&mut pos, sq("G1"), sq("E3"), None);
        assert!(!is_legal_move(&pos, sq("E2"), sq("E3"), Color::White));
        assert!(!is_legal_move(&pos, sq("E2"), sq("E4"), Color::White));
    }

    #[test]
    fn test_fools_mate_is_checkmate() {
        let mut pos = Position::initial();
        play(
            &mut pos,
            &[("F2", "F3"), ("E7", "E5"), ("G2", "G4"), ("D8", "H4")],
        );
        assert_eq!(
            check_game_end(&pos),
            Verdict::Checkmate {
                winner: Color::Black
            }
        );
    }

    #[test]
    fn test_en_passant_capture() {
        let mut pos = Position::initial();
        play(&mut pos, &[("E2", "E4"), ("A7", "A6"), ("E4", "E5")]);
        // Black's double push opens the D file for one reply.
        play(&mut pos, &[("D7", "D5")]);
        assert_eq!(pos.en_passant_file, Some(3));

        assert!(is_legal_move(&pos, sq("E5"), sq("D6"), Color::White));
        apply_move(&mut pos, sq("E5"), sq("D6"), None);

        // The captured pawn on D5 is gone and the capturer stands on D6.
        assert_eq!(pos.board.get(sq("D5")), None);
        assert_eq!(
            pos.board.get(sq("D6")),
            Some(Piece::new(PieceKind::Pawn, Color::White))
        );
    }

    #[test]
    fn test_en_passant_expires_after_one_move() {
        let mut pos = Position::initial();
        play(
            &mut pos,
            &[
                ("E2", "E4"),
                ("A7", "A6"),
                ("E4", "E5"),
                ("D7", "D5"),
                ("B1", "C3"),
                ("A6", "A5"),
            ],
        );
        // The window closed when White played something else.
        assert!(!is_legal_move(&pos, sq("E5"), sq("D6"), Color::White));
    }

    /// Board with both kings plus the given extra pieces, all flags clear.
    fn sparse_position(extra: &[(&str, PieceKind, Color)]) -> Position {
        let mut board = Board::default();
        board.set(sq("E1"), Some(Piece::new(PieceKind::King, Color::White)));
        board.set(sq("E8"), Some(Piece::new(PieceKind::King, Color::Black)));
        for &(at, kind, color) in extra {
            board.set(sq(at), Some(Piece::new(kind, color)));
        }
        Position {
            board,
            side_to_move: Color::White,
            castling: CastlingState::default(),
            en_passant_file: None,
            last_move: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    #[test]
    fn test_kingside_castling() {
        let mut pos = sparse_position(&[("H1", PieceKind::Rook, Color::White)]);
        assert!(is_legal_move(&pos, sq("E1"), sq("G1"), Color::White));

        apply_move(&mut pos, sq("E1"), sq("G1"), None);
        assert_eq!(
            pos.board.get(sq("G1")),
            Some(Piece::new(PieceKind::King, Color::White))
        );
        assert_eq!(
            pos.board.get(sq("F1")),
            Some(Piece::new(PieceKind::Rook, Color::White))
        );
        assert_eq!(pos.board.get(sq("H1")), None);
        assert!(pos.castling.white.king_moved);
    }

    #[test]
    fn test_castling_through_attacked_square_is_illegal() {
        // Black rook on F8 covers F1, the square the king crosses.
        let pos = sparse_position(&[
            ("H1", PieceKind::Rook, Color::White),
            ("F8", PieceKind::Rook, Color::Black),
        ]);
        assert!(!is_legal_move(&pos, sq("E1"), sq("G1"), Color::White));
    }

    #[test]
    fn test_castling_while_in_check_is_illegal() {
        let pos = sparse_position(&[
            ("H1", PieceKind::Rook, Color::White),
            ("E8", PieceKind::King, Color::Black),
            ("E4", PieceKind::Rook, Color::Black),
        ]);
        assert!(!is_legal_move(&pos, sq("E1"), sq("G1"), Color::White));
    }

    #[test]
    fn test_castling_after_king_moved_is_illegal() {
        let mut pos = sparse_position(&[("H1", PieceKind::Rook, Color::White)]);
        pos.castling.white.king_moved = true;
        assert!(!is_legal_move(&pos, sq("E1"), sq("G1"), Color::White));
    }

    #[test]
    fn test_queenside_castling_requires_empty_b_file() {
        let mut pos = sparse_position(&[("A1", PieceKind::Rook, Color::White)]);
        assert!(is_legal_move(&pos, sq("E1"), sq("C1"), Color::White));

        pos.board
            .set(sq("B1"), Some(Piece::new(PieceKind::Knight, Color::White)));
        assert!(!is_legal_move(&pos, sq("E1"), sq("C1"), Color::White));
    }

    #[test]
    fn test_pinned_piece_cannot_move() {
        // The E2 knight is pinned against the king by the E8 rook... once the
        // black rook reaches the E file with nothing between.
        let pos = sparse_position(&[
            ("E2", PieceKind::Knight, Color::White),
            ("E7", PieceKind::Rook, Color::Black),
        ]);
        assert!(!is_legal_move(&pos, sq("E2"), sq("C3"), Color::White));
        // Moving along the pin line is fine.
        assert!(is_legal_move(&pos, sq("E1"), sq("D1"), Color::White));
    }

    #[test]
    fn test_legality_check_leaves_position_untouched() {
        let pos = {
            let mut p = Position::initial();
            play(&mut p, &[("E2", "E4"), ("D7", "D5")]);
            p
        };
        let before = pos.board.to_wire_string();
        // Probe a mix of legal and illegal moves, en passant included.
        for (from, to) in [("E4", "D5"), ("E4", "E5"), ("E4", "E6"), ("F1", "B5")] {
            let _ = is_legal_move(&pos, sq(from), sq(to), Color::White);
        }
        assert_eq!(pos.board.to_wire_string(), before);
    }

    #[test]
    fn test_promotion_defaults_to_queen() {
        let mut pos = sparse_position(&[("A7", PieceKind::Pawn, Color::White)]);
        // Move the black king off the back rank's reach first.
        pos.board.set(sq("E8"), None);
        pos.board
            .set(sq("H5"), Some(Piece::new(PieceKind::King, Color::Black)));

        assert!(is_legal_move(&pos, sq("A7"), sq("A8"), Color::White));
        apply_move(&mut pos, sq("A7"), sq("A8"), None);
        assert_eq!(
            pos.board.get(sq("A8")),
            Some(Piece::new(PieceKind::Queen, Color::White))
        );
    }

    #[test]
    fn test_promotion_to_knight() {
        let mut pos = sparse_position(&[("A7", PieceKind::Pawn, Color::White)]);
        pos.board.set(sq("E8"), None);
        pos.board
            .set(sq("H5"), Some(Piece::new(PieceKind::King, Color::Black)));

        apply_move(&mut pos, sq("A7"), sq("A8"), Some(PieceKind::Knight));
        assert_eq!(
            pos.board.get(sq("A8")),
            Some(Piece::new(PieceKind::Knight, Color::White))
        );
    }

    #[test]
    fn test_stalemate_detected() {
        // Black king cornered on H8 by queen G6 and king F7, not in check.
        let mut board = Board::default();
        board.set(sq("H8"), Some(Piece::new(PieceKind::King, Color::Black)));
        board.set(sq("G6"), Some(Piece::new(PieceKind::Queen, Color::White)));
        board.set(sq("F7"), Some(Piece::new(PieceKind::King, Color::White)));
        let pos = Position {
            board,
            side_to_move: Color::Black,
            castling: CastlingState::default(),
            en_passant_file: None,
            last_move: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        };
        assert!(!is_in_check(&pos.board, Color::Black));
        assert_eq!(check_game_end(&pos), Verdict::Stalemate);
    }

    #[test]
    fn test_insufficient_material_cases() {
        let kk = sparse_position(&[]);
        assert!(is_insufficient_material(&kk.board));

        let kbk = sparse_position(&[("C3", PieceKind::Bishop, Color::White)]);
        assert!(is_insufficient_material(&kbk.board));

        let knk = sparse_position(&[("C3", PieceKind::Knight, Color::Black)]);
        assert!(is_insufficient_material(&knk.board));

        let kbkb = sparse_position(&[
            ("C3", PieceKind::Bishop, Color::White),
            ("F6", PieceKind::Bishop, Color::Black),
        ]);
        assert!(is_insufficient_material(&kbkb.board));

        let krk = sparse_position(&[("A1", PieceKind::Rook, Color::White)]);
        assert!(!is_insufficient_material(&krk.board));

        let kpk = sparse_position(&[("A2", PieceKind::Pawn, Color::White)]);
        assert!(!is_insufficient_material(&kpk.board));

        let knkn = sparse_position(&[
            ("C3", PieceKind::Knight, Color::White),
            ("F6", PieceKind::Knight, Color::Black),
        ]);
        assert!(!is_insufficient_material(&knkn.board));
    }

    #[test]
    fn test_insufficient_material_verdict() {
        let pos = sparse_position(&[("C3", PieceKind::Bishop, Color::White)]);
        assert_eq!(check_game_end(&pos), Verdict::InsufficientMaterial);
    }

    #[test]
    fn test_valid_moves_ignore_turn_order() {
        let pos = Position::initial(); // White to move
        // Black may still preview its own knight.
        let moves = valid_moves_from(&pos, sq("B8"), Color::Black);
        let notated: Vec<String> = moves.iter().map(|m| m.to_notation()).collect();
        assert_eq!(notated, vec!["A6".to_string(), "C6".to_string()]);
        // But asking about an enemy piece yields nothing.
        assert!(valid_moves_from(&pos, sq("B1"), Color::Black).is_empty());
    }

    #[test]
    fn test_rook_move_clears_castling_flag() {
        let mut pos = sparse_position(&[("H1", PieceKind::Rook, Color::White)]);
        apply_move(&mut pos, sq("H1"), sq("H5"), None);
        assert!(pos.castling.white.rook_h_moved);
        assert!(!pos.castling.white.rook_a_moved);
    }

    #[test]
    fn test_exactly_one_king_per_side_survives_play() {
        let mut pos = Position::initial();
        play(
            &mut pos,
            &[
                ("E2", "E4"),
                ("E7", "E5"),
                ("G1", "F3"),
                ("B8", "C6"),
                ("F1", "C4"),
                ("G8", "F6"),
                ("E1", "G1"), // castles
                ("F8", "C5"),
            ],
        );
        let wire = pos.board.to_wire_string();
        assert_eq!(wire.matches('k').count(), 1);
        assert_eq!(wire.matches('K').count(), 1);
    }
}
