//! Active match registry and the rematch window.
//!
//! The registry owns two fixed-capacity tables: live matches and the bounded
//! ring of recently finished matches still eligible for a rematch. Matches
//! reference players two ways — by username (stable identity) and by session
//! slot (weak reference, validated against the session registry on use).
//! Sessions hold no back-references; when a match for a session is needed the
//! table is scanned.
//!
//! Both tables have their own lock. Neither lock is ever held across a send.

use crate::types::{Color, Position};
use rand::Rng;
use std::sync::Mutex;

/// Maximum concurrent live matches.
pub const MAX_MATCHES: usize = 50;

/// Capacity of the recent-match (rematch) ring.
pub const MAX_RECENT: usize = 50;

/// Match id length: `M` plus eight random uppercase alphanumerics.
const MATCH_ID_LEN: usize = 9;

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

/// One live game between two sessions.
#[derive(Debug, Clone)]
pub struct Match {
    pub match_id: String,
    /// Username playing White.
    pub white: String,
    /// Username playing Black.
    pub black: String,
    pub white_slot: usize,
    pub black_slot: usize,
    pub position: Position,
}

impl Match {
    /// The color a session slot plays in this match, if it is a participant.
    pub fn color_of_slot(&self, slot: usize) -> Option<Color> {
        if slot == self.white_slot {
            Some(Color::White)
        } else if slot == self.black_slot {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// The other participant's slot.
    pub fn opponent_slot(&self, slot: usize) -> Option<usize> {
        match self.color_of_slot(slot)? {
            Color::White => Some(self.black_slot),
            Color::Black => Some(self.white_slot),
        }
    }

    /// Username of the given side.
    pub fn player_of(&self, color: Color) -> &str {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }
}

/// One participant as handed to match creation.
#[derive(Debug, Clone)]
pub struct Participant {
    pub slot: usize,
    pub username: String,
}

/// How white is chosen at match creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorAssignment {
    /// 50/50 coin flip (challenges and matchmaking).
    Coin,
    /// First participant plays White (rematches, where colors swap).
    Fixed,
}

// ---------------------------------------------------------------------------
// Recent matches (rematch window)
// ---------------------------------------------------------------------------

/// A finished match still eligible for a rematch.
#[derive(Debug, Clone)]
pub struct RecentMatch {
    pub match_id: String,
    pub white: String,
    pub black: String,
    /// Last-known session slots; must be re-validated before use.
    pub white_slot: usize,
    pub black_slot: usize,
    /// Slot of the player who offered a rematch, if any.
    pub rematch_offered_by: Option<usize>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Fixed-capacity registry of live matches plus the recent-match ring.
pub struct MatchRegistry {
    matches: Mutex<Vec<Option<Match>>>,
    recent: Mutex<Vec<Option<RecentMatch>>>,
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: Mutex::new((0..MAX_MATCHES).map(|_| None).collect()),
            recent: Mutex::new((0..MAX_RECENT).map(|_| None).collect()),
        }
    }

    /// Creates a live match in the first free slot and returns `(slot index,
    /// snapshot)`. With [`ColorAssignment::Coin`] either participant may end
    /// up White; with `Fixed`, `a` plays White.
    ///
    /// Only the match table is touched here: session states, recording, and
    /// the `START_GAME` messages are the caller's steps.
    pub fn create(
        &self,
        a: Participant,
        b: Participant,
        assignment: ColorAssignment,
    ) -> Option<(usize, Match)> {
        let (white, black) = match assignment {
            ColorAssignment::Fixed => (a, b),
            ColorAssignment::Coin => {
                if rand::thread_rng().gen_bool(0.5) {
                    (a, b)
                } else {
                    (b, a)
                }
            }
        };

        let mut matches = self.matches.lock().unwrap();
        let idx = matches.iter().position(Option::is_none)?;

        let m = Match {
            match_id: generate_match_id(),
            white: white.username,
            black: black.username,
            white_slot: white.slot,
            black_slot: black.slot,
            position: Position::initial(),
        };
        log::info!(
            "Match created: {} vs {} ({})",
            m.white,
            m.black,
            m.match_id
        );
        matches[idx] = Some(m.clone());
        Some((idx, m))
    }

    /// Finds the live match with the given id.
    pub fn find_by_id(&self, match_id: &str) -> Option<usize> {
        let matches = self.matches.lock().unwrap();
        matches
            .iter()
            .position(|m| matches!(m, Some(m) if m.match_id == match_id))
    }

    /// Finds the live match a session slot participates in.
    pub fn find_by_slot(&self, slot: usize) -> Option<usize> {
        let matches = self.matches.lock().unwrap();
        matches
            .iter()
            .position(|m| matches!(m, Some(m) if m.white_slot == slot || m.black_slot == slot))
    }

    /// Runs `f` with exclusive access to the match in the given slot.
    /// Returns `None` if the slot is free (the match ended concurrently).
    pub fn with_match<R>(&self, idx: usize, f: impl FnOnce(&mut Match) -> R) -> Option<R> {
        let mut matches = self.matches.lock().unwrap();
        matches.get_mut(idx)?.as_mut().map(f)
    }

    /// Removes the match from the live table, freeing its slot for reuse.
    /// When `save_recent` is set, a snapshot enters the rematch window.
    /// Returns the removed match.
    pub fn finish(&self, idx: usize, save_recent: bool) -> Option<Match> {
        let finished = {
            let mut matches = self.matches.lock().unwrap();
            matches.get_mut(idx)?.take()?
        };

        if save_recent {
            self.save_recent(&finished);
        }
        Some(finished)
    }

    fn save_recent(&self, m: &Match) {
        let mut recent = self.recent.lock().unwrap();
        // First free slot, or slot 0 when the window is packed.
        let idx = recent.iter().position(Option::is_none).unwrap_or(0);
        recent[idx] = Some(RecentMatch {
            match_id: m.match_id.clone(),
            white: m.white.clone(),
            black: m.black.clone(),
            white_slot: m.white_slot,
            black_slot: m.black_slot,
            rematch_offered_by: None,
        });
    }

    /// Finds a finished match in the rematch window.
    pub fn recent_find(&self, match_id: &str) -> Option<usize> {
        let recent = self.recent.lock().unwrap();
        recent
            .iter()
            .position(|m| matches!(m, Some(m) if m.match_id == match_id))
    }

    /// Runs `f` with exclusive access to a rematch-window entry.
    pub fn with_recent<R>(&self, idx: usize, f: impl FnOnce(&mut RecentMatch) -> R) -> Option<R> {
        let mut recent = self.recent.lock().unwrap();
        recent.get_mut(idx)?.as_mut().map(f)
    }

    /// Drops an entry from the rematch window (rematch answered or expired).
    pub fn recent_invalidate(&self, idx: usize) -> Option<RecentMatch> {
        let mut recent = self.recent.lock().unwrap();
        recent.get_mut(idx)?.take()
    }
}

/// Generates a match id: `M` followed by eight random characters drawn from
/// digits and uppercase letters.
fn generate_match_id() -> String {
    const CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(MATCH_ID_LEN);
    id.push('M');
    for _ in 1..MATCH_ID_LEN {
        id.push(CHARSET[rng.gen_range(0..CHARSET.len())] as char);
    }
    id
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
