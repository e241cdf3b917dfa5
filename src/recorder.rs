//! Match recording and history.
//!
//! Every live match has a bounded in-memory move log. At game end the log is
//! finalized into `<data>/matches/<match_id>.json`, a pretty-printed document
//! with the players, the result, timestamps, the move list, and the final
//! board. Aborted games are discarded without touching disk. The same
//! directory backs the history and replay queries.
//!
//! The recorder has its own lock, independent of every registry, and is
//! always the last thing acquired.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum concurrently recorded matches; mirrors the live-match capacity.
pub const MAX_RECORDINGS: usize = 50;

/// Longest recorded game, in half-moves.
const MAX_MOVES: usize = 500;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// In-memory move log of one live match.
#[derive(Debug, Clone)]
struct Recording {
    match_id: String,
    /// Four-character uppercase tokens like `"E2E4"`.
    moves: Vec<String>,
    start_time: u64,
}

/// The on-disk history document for one finished match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    #[serde(rename = "matchId")]
    pub match_id: String,
    pub white: String,
    pub black: String,
    /// Winning username, `"DRAW"`, or `"ABORT"`.
    pub winner: String,
    pub reason: String,
    /// Unix seconds at match start.
    pub timestamp: u64,
    #[serde(rename = "endTime")]
    pub end_time: u64,
    #[serde(rename = "moveCount")]
    pub move_count: usize,
    pub moves: Vec<String>,
    /// 64-character row-major board string at game end.
    #[serde(rename = "finalBoard")]
    pub final_board: String,
}

/// One row of a `MATCH_HISTORY` reply.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    #[serde(rename = "matchId")]
    pub match_id: String,
    pub white: String,
    pub black: String,
    pub winner: String,
    pub timestamp: u64,
    #[serde(rename = "moveCount")]
    pub move_count: usize,
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Owns the active move logs and the match-history directory.
pub struct Recorder {
    matches_dir: PathBuf,
    active: Mutex<Vec<Recording>>,
}

impl Recorder {
    /// Creates the recorder and its `matches/` directory under `data_dir`.
    pub fn open(data_dir: &Path) -> io::Result<Recorder> {
        let matches_dir = data_dir.join("matches");
        fs::create_dir_all(&matches_dir)?;
        Ok(Recorder {
            matches_dir,
            active: Mutex::new(Vec::new()),
        })
    }

    /// Begins recording a new match.
    pub fn start(&self, match_id: &str) {
        let mut active = self.active.lock().unwrap();
        if active.len() >= MAX_RECORDINGS {
            log::warn!("Recorder full, match {match_id} will not be recorded");
            return;
        }
        active.push(Recording {
            match_id: match_id.to_string(),
            moves: Vec::new(),
            start_time: unix_timestamp(),
        });
    }

    /// Appends one move as an uppercase four-character token.
    pub fn record_move(&self, match_id: &str, from: &str, to: &str) {
        let mut active = self.active.lock().unwrap();
        if let Some(rec) = active.iter_mut().find(|r| r.match_id == match_id) {
            if rec.moves.len() >= MAX_MOVES {
                log::warn!("Match {match_id} exceeded {MAX_MOVES} recorded moves");
                return;
            }
            rec.moves
                .push(format!("{}{}", from.to_uppercase(), to.to_uppercase()));
        }
    }

    /// Drops the recording without writing anything (aborted match).
    pub fn discard(&self, match_id: &str) {
        let mut active = self.active.lock().unwrap();
        active.retain(|r| r.match_id != match_id);
    }

    /// Finalizes the recording into `<matches>/<match_id>.json`.
    pub fn finalize(
        &self,
        match_id: &str,
        white: &str,
        black: &str,
        winner: &str,
        reason: &str,
        final_board: &str,
    ) -> io::Result<()> {
        let recording = {
            let mut active = self.active.lock().unwrap();
            let idx = active.iter().position(|r| r.match_id == match_id);
            match idx {
                Some(idx) => active.swap_remove(idx),
                None => {
                    log::warn!("No move log found for match {match_id}");
                    return Ok(());
                }
            }
        };

        let record = MatchRecord {
            match_id: match_id.to_string(),
            white: white.to_string(),
            black: black.to_string(),
            winner: winner.to_string(),
            reason: reason.to_string(),
            timestamp: recording.start_time,
            end_time: unix_timestamp(),
            move_count: recording.moves.len(),
            moves: recording.moves,
            final_board: final_board.to_string(),
        };

        let path = self.record_path(match_id);
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        log::info!("Match history saved: {}", path.display());
        Ok(())
    }

    /// Scans the history directory for every match the user played in,
    /// newest file order not guaranteed.
    pub fn history_for(&self, username: &str) -> Vec<HistorySummary> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.matches_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot read match history directory: {e}");
                return out;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<MatchRecord>(&raw) else {
                log::warn!("Skipping unreadable history file {}", path.display());
                continue;
            };
            if record.white == username || record.black == username {
                out.push(HistorySummary {
                    match_id: record.match_id,
                    white: record.white,
                    black: record.black,
                    winner: record.winner,
                    timestamp: record.timestamp,
                    move_count: record.move_count,
                });
            }
        }
        out
    }

    /// Loads one history file verbatim for a replay reply.
    pub fn load_replay(&self, match_id: &str) -> Option<Value> {
        // Match ids are server-issued alphanumerics; reject anything that
        // could escape the history directory.
        if !match_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        let raw = fs::read_to_string(self.record_path(match_id)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn record_path(&self, match_id: &str) -> PathBuf {
        self.matches_dir.join(format!("{match_id}.json"))
    }
}

/// Current Unix timestamp in seconds.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (tempfile::TempDir, Recorder) {
        let dir = tempfile::tempdir().unwrap();
        let rec = Recorder::open(dir.path()).unwrap();
        (dir, rec)
    }

    const BOARD: &str = "RNBQKBNR\
                         PPPPPPPP\
                         ................................\
                         pppppppp\
                         rnbqkbnr";

    #[test]
    fn test_finalize_writes_history_file() {
        let (_dir, rec) = recorder();
        rec.start("MABC12345");
        rec.record_move("MABC12345", "e2", "e4");
        rec.record_move("MABC12345", "E7", "E5");
        rec.finalize("MABC12345", "alice", "bob", "alice", "Checkmate", BOARD)
            .unwrap();

        let replay = rec.load_replay("MABC12345").unwrap();
        assert_eq!(replay["matchId"], "MABC12345");
        assert_eq!(replay["white"], "alice");
        assert_eq!(replay["winner"], "alice");
        assert_eq!(replay["reason"], "Checkmate");
        assert_eq!(replay["moveCount"], 2);
        // Tokens are uppercased regardless of input case.
        assert_eq!(replay["moves"][0], "E2E4");
        assert_eq!(replay["moves"][1], "E7E5");
        assert_eq!(replay["finalBoard"], BOARD);
        assert!(replay["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_discard_leaves_no_file() {
        let (_dir, rec) = recorder();
        rec.start("MABANDON1");
        rec.record_move("MABANDON1", "E2", "E4");
        rec.discard("MABANDON1");
        assert!(rec.load_replay("MABANDON1").is_none());

        // Finalizing after discard is a no-op, not an error.
        rec.finalize("MABANDON1", "a", "b", "DRAW", "Stalemate", BOARD)
            .unwrap();
        assert!(rec.load_replay("MABANDON1").is_none());
    }

    #[test]
    fn test_history_filters_by_player() {
        let (_dir, rec) = recorder();
        rec.start("MGAME0001");
        rec.finalize("MGAME0001", "alice", "bob", "DRAW", "Stalemate", BOARD)
            .unwrap();
        rec.start("MGAME0002");
        rec.finalize("MGAME0002", "carol", "alice", "carol", "Checkmate", BOARD)
            .unwrap();
        rec.start("MGAME0003");
        rec.finalize("MGAME0003", "carol", "dave", "dave", "Checkmate", BOARD)
            .unwrap();

        let mut alice: Vec<String> = rec
            .history_for("alice")
            .into_iter()
            .map(|h| h.match_id)
            .collect();
        alice.sort();
        assert_eq!(alice, vec!["MGAME0001", "MGAME0002"]);

        assert!(rec.history_for("nobody").is_empty());
    }

    #[test]
    fn test_replay_rejects_path_escapes() {
        let (_dir, rec) = recorder();
        assert!(rec.load_replay("../users").is_none());
        assert!(rec.load_replay("MNOSUCH12").is_none());
    }

    #[test]
    fn test_record_roundtrip_through_serde() {
        let record = MatchRecord {
            match_id: "M12345678".into(),
            white: "alice".into(),
            black: "bob".into(),
            winner: "DRAW".into(),
            reason: "Draw by agreement".into(),
            timestamp: 1000,
            end_time: 2000,
            move_count: 1,
            moves: vec!["E2E4".into()],
            final_board: BOARD.into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: MatchRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.match_id, record.match_id);
        assert_eq!(back.end_time, 2000);
        assert_eq!(back.moves, record.moves);
    }
}
