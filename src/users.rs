//! User accounts: credentials, ratings, and persistence.
//!
//! The [`UserStore`] is a bounded registry of every account the server knows,
//! loaded from `users.json` at startup and rewritten after every mutation.
//! Passwords are stored as lowercase-hex SHA-256 digests. Ratings use the Elo
//! system with K = 32, a floor of 0, and a starting value of 1200.
//!
//! All operations run under the store's own lock; callers never hold it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Maximum number of registered accounts.
pub const MAX_USERS: usize = 1000;

/// Rating assigned to new accounts.
pub const DEFAULT_ELO: i32 = 1200;

/// Elo K-factor.
const K_FACTOR: f64 = 32.0;

/// Winner label for a drawn game.
pub const WINNER_DRAW: &str = "DRAW";

/// Winner label for an aborted game; no ratings change.
pub const WINNER_ABORT: &str = "ABORT";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One account as held in memory and in `users.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    #[serde(rename = "elo_rating")]
    pub elo: i32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    /// Live flag only; never persisted.
    #[serde(skip)]
    pub online: bool,
}

/// Read-only copy of an account's public fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    pub username: String,
    pub elo: i32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub online: bool,
}

impl From<&User> for UserSnapshot {
    fn from(u: &User) -> Self {
        Self {
            username: u.username.clone(),
            elo: u.elo,
            wins: u.wins,
            losses: u.losses,
            draws: u.draws,
            online: u.online,
        }
    }
}

/// On-disk shape of `users.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    users: Vec<User>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Registration failures, worded as sent on the wire.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Username already exists")]
    UsernameTaken,
    #[error("Invalid username")]
    InvalidUsername,
    #[error("Server full")]
    CapacityFull,
    #[error("Storage error")]
    Io(#[from] io::Error),
}

/// Login failures, worded as sent on the wire.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("User not found")]
    NotFound,
    #[error("Invalid password")]
    BadPassword,
    #[error("Already logged in")]
    AlreadyOnline,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Thread-safe registry of all accounts, backed by `users.json`.
pub struct UserStore {
    inner: Mutex<Inner>,
}

struct Inner {
    users: Vec<User>,
    file_path: PathBuf,
}

impl UserStore {
    /// Opens the store rooted at `data_dir`, creating the directory if needed
    /// and loading any existing `users.json`.
    pub fn open(data_dir: &Path) -> io::Result<UserStore> {
        fs::create_dir_all(data_dir)?;
        let file_path = data_dir.join("users.json");

        let users = if file_path.exists() {
            let raw = fs::read_to_string(&file_path)?;
            let file: UsersFile = serde_json::from_str(&raw)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            log::info!("Loaded {} users from {}", file.users.len(), file_path.display());
            file.users
        } else {
            log::info!("No existing user database at {}", file_path.display());
            Vec::new()
        };

        Ok(UserStore {
            inner: Mutex::new(Inner { users, file_path }),
        })
    }

    /// Creates a new account and flushes the store.
    pub fn register(&self, username: &str, password: &str) -> Result<(), RegisterError> {
        if username.is_empty() || username.len() > 31 {
            return Err(RegisterError::InvalidUsername);
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|u| u.username == username) {
            return Err(RegisterError::UsernameTaken);
        }
        if inner.users.len() >= MAX_USERS {
            return Err(RegisterError::CapacityFull);
        }

        inner.users.push(User {
            username: username.to_string(),
            password_hash: sha256_hex(password),
            elo: DEFAULT_ELO,
            wins: 0,
            losses: 0,
            draws: 0,
            online: false,
        });
        inner.save()?;

        log::info!("User registered: {username}");
        Ok(())
    }

    /// Verifies credentials and marks the account online.
    /// Returns the account snapshot for the login reply.
    pub fn login(&self, username: &str, password: &str) -> Result<UserSnapshot, LoginError> {
        let hash = sha256_hex(password);
        let mut inner = self.inner.lock().unwrap();

        let user = inner
            .users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or(LoginError::NotFound)?;
        if user.password_hash != hash {
            return Err(LoginError::BadPassword);
        }
        if user.online {
            return Err(LoginError::AlreadyOnline);
        }

        user.online = true;
        log::info!("User logged in: {username}");
        Ok(UserSnapshot::from(&*user))
    }

    /// Clears the online flag. Idempotent; unknown names are ignored.
    pub fn logout(&self, username: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.username == username)
            && user.online
        {
            user.online = false;
            log::info!("User logged out: {username}");
        }
    }

    /// Returns a snapshot of the named account, if it exists.
    pub fn find(&self, username: &str) -> Option<UserSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .users
            .iter()
            .find(|u| u.username == username)
            .map(UserSnapshot::from)
    }

    /// Current rating of the named account, or the default for unknown names.
    pub fn elo_of(&self, username: &str) -> i32 {
        self.find(username).map_or(DEFAULT_ELO, |u| u.elo)
    }

    /// Applies a game result to both players' ratings and counters, then
    /// flushes the store.
    ///
    /// `winner` is the winning username, [`WINNER_DRAW`], or [`WINNER_ABORT`]
    /// (a no-op: aborted games are unrated).
    pub fn apply_result(&self, white: &str, black: &str, winner: &str) -> io::Result<()> {
        if winner == WINNER_ABORT {
            log::info!("Match aborted, no rating change");
            return Ok(());
        }

        let mut inner = self.inner.lock().unwrap();

        let white_elo = match inner.users.iter().find(|u| u.username == white) {
            Some(u) => u.elo,
            None => {
                log::warn!("Rating update skipped: unknown player {white}");
                return Ok(());
            }
        };
        let black_elo = match inner.users.iter().find(|u| u.username == black) {
            Some(u) => u.elo,
            None => {
                log::warn!("Rating update skipped: unknown player {black}");
                return Ok(());
            }
        };

        if winner == WINNER_DRAW {
            // Viewed from White: the higher-rated side loses ground in a draw.
            let delta = rating_delta(white_elo, black_elo, true);
            inner.update(white, |u| {
                u.elo = (u.elo + delta).max(0);
                u.draws += 1;
            });
            inner.update(black, |u| {
                u.elo = (u.elo - delta).max(0);
                u.draws += 1;
            });
            log::info!(
                "Rating update (draw): {white} {white_elo} -> {}, {black} {black_elo} -> {}",
                (white_elo + delta).max(0),
                (black_elo - delta).max(0)
            );
        } else {
            let (winner_name, loser_name, winner_elo, loser_elo) = if winner == white {
                (white, black, white_elo, black_elo)
            } else if winner == black {
                (black, white, black_elo, white_elo)
            } else {
                log::warn!("Rating update skipped: winner {winner} is not a participant");
                return Ok(());
            };

            let delta = rating_delta(winner_elo, loser_elo, false);
            inner.update(winner_name, |u| {
                u.elo = (u.elo + delta).max(0);
                u.wins += 1;
            });
            inner.update(loser_name, |u| {
                u.elo = (u.elo - delta).max(0);
                u.losses += 1;
            });
            log::info!(
                "Rating update: {winner_name} {winner_elo} -> {} (+{delta}), \
                 {loser_name} {loser_elo} -> {} (-{delta})",
                winner_elo + delta,
                (loser_elo - delta).max(0)
            );
        }

        inner.save()
    }

    /// Number of registered accounts.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn update(&mut self, username: &str, f: impl FnOnce(&mut User)) {
        if let Some(user) = self.users.iter_mut().find(|u| u.username == username) {
            f(user);
        }
    }

    /// Rewrites `users.json` atomically: serialize to a sibling temp file,
    /// then rename over the target.
    fn save(&self) -> io::Result<()> {
        let file = UsersFile {
            users: self.users.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp_path = self.file_path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.file_path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hashing & Elo math
// ---------------------------------------------------------------------------

/// SHA-256 of the input as 64 lowercase hex characters.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Probability that `player` beats `opponent` under the Elo model.
fn expected_score(player: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - player) / 400.0))
}

/// Rating points transferred for one result.
///
/// For a win the winner gains `round(K * (1 - expected))`, never less than 1.
/// For a draw the value is `round(K * (0.5 - expected))` from the first
/// player's point of view — negative when they out-rate the opponent.
fn rating_delta(winner_elo: i32, loser_elo: i32, is_draw: bool) -> i32 {
    let expected = expected_score(winner_elo, loser_elo);
    let change = if is_draw {
        (K_FACTOR * (0.5 - expected)).round() as i32
    } else {
        (K_FACTOR * (1.0 - expected)).round() as i32
    };

    if !is_draw && change == 0 { 1 } else { change }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_register_and_login() {
        let (_dir, store) = store();
        store.register("alice", "secret").unwrap();

        let snap = store.login("alice", "secret").unwrap();
        assert_eq!(snap.elo, DEFAULT_ELO);
        assert_eq!((snap.wins, snap.losses, snap.draws), (0, 0, 0));

        // A second login on the same account is rejected until logout.
        assert!(matches!(
            store.login("alice", "secret"),
            Err(LoginError::AlreadyOnline)
        ));
        store.logout("alice");
        assert!(store.login("alice", "secret").is_ok());
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let (_dir, store) = store();
        store.register("alice", "secret").unwrap();
        assert!(matches!(
            store.register("alice", "other"),
            Err(RegisterError::UsernameTaken)
        ));
    }

    #[test]
    fn test_register_validates_username_length() {
        let (_dir, store) = store();
        assert!(matches!(
            store.register("", "pw"),
            Err(RegisterError::InvalidUsername)
        ));
        let long = "x".repeat(32);
        assert!(matches!(
            store.register(&long, "pw"),
            Err(RegisterError::InvalidUsername)
        ));
        store.register(&"x".repeat(31), "pw").unwrap();
    }

    #[test]
    fn test_login_failures() {
        let (_dir, store) = store();
        store.register("alice", "secret").unwrap();
        assert!(matches!(
            store.login("bob", "secret"),
            Err(LoginError::NotFound)
        ));
        assert!(matches!(
            store.login("alice", "wrong"),
            Err(LoginError::BadPassword)
        ));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = UserStore::open(dir.path()).unwrap();
            store.register("alice", "secret").unwrap();
            store.register("bob", "hunter2").unwrap();
            store.apply_result("alice", "bob", "alice").unwrap();
        }

        let reloaded = UserStore::open(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 2);

        let alice = reloaded.find("alice").unwrap();
        assert_eq!(alice.elo, DEFAULT_ELO + 16);
        assert_eq!(alice.wins, 1);
        assert!(!alice.online, "online flag must not persist");

        let bob = reloaded.find("bob").unwrap();
        assert_eq!(bob.elo, DEFAULT_ELO - 16);
        assert_eq!(bob.losses, 1);

        // Stored hash is the SHA-256 digest, so login still works.
        assert!(reloaded.login("alice", "secret").is_ok());
    }

    #[test]
    fn test_equal_ratings_win_transfers_16() {
        let (_dir, store) = store();
        store.register("alice", "a").unwrap();
        store.register("bob", "b").unwrap();
        store.apply_result("alice", "bob", "bob").unwrap();
        assert_eq!(store.find("alice").unwrap().elo, 1184);
        assert_eq!(store.find("bob").unwrap().elo, 1216);
    }

    #[test]
    fn test_draw_asymmetry() {
        // White 1400 vs Black 1200, drawn: the favorite gives up 8 points.
        assert_eq!(rating_delta(1400, 1200, true), -8);
        assert_eq!(rating_delta(1200, 1400, true), 8);
        // Equal ratings: a draw is free.
        assert_eq!(rating_delta(1200, 1200, true), 0);
    }

    #[test]
    fn test_draw_updates_both_counters() {
        let (_dir, store) = store();
        store.register("alice", "a").unwrap();
        store.register("bob", "b").unwrap();
        store.apply_result("alice", "bob", WINNER_DRAW).unwrap();

        let alice = store.find("alice").unwrap();
        let bob = store.find("bob").unwrap();
        assert_eq!(alice.draws, 1);
        assert_eq!(bob.draws, 1);
        // Equal ratings: a draw moves nothing.
        assert_eq!(alice.elo, DEFAULT_ELO);
        assert_eq!(bob.elo, DEFAULT_ELO);
    }

    #[test]
    fn test_win_delta_is_at_least_one() {
        // A gigantic favorite still takes a point off the board.
        assert_eq!(rating_delta(3000, 200, false), 1);
    }

    #[test]
    fn test_abort_changes_nothing() {
        let (_dir, store) = store();
        store.register("alice", "a").unwrap();
        store.register("bob", "b").unwrap();
        store.apply_result("alice", "bob", WINNER_ABORT).unwrap();

        let alice = store.find("alice").unwrap();
        assert_eq!(alice.elo, DEFAULT_ELO);
        assert_eq!((alice.wins, alice.losses, alice.draws), (0, 0, 0));
    }

    #[test]
    fn test_rating_floor() {
        let (_dir, store) = store();
        store.register("low", "l").unwrap();
        store.register("high", "h").unwrap();
        // Drain "low" to the floor with repeated losses.
        for _ in 0..100 {
            store.apply_result("low", "high", "high").unwrap();
        }
        assert_eq!(store.find("low").unwrap().elo, 0);
        // Losses at the floor stay at the floor.
        store.apply_result("low", "high", "high").unwrap();
        assert_eq!(store.find("low").unwrap().elo, 0);
    }
}
