//! # chessd — Multiplayer Chess Server
//!
//! chessd is a TCP server for rated multiplayer chess. Clients connect over
//! plain TCP, speak newline-delimited JSON, and can register accounts,
//! browse and challenge other players, queue for rating-based matchmaking,
//! play rule-enforced games, and review finished matches.
//!
//! ## Features
//!
//! - **Full rules enforcement**: legal-move validation on the server,
//!   including castling, en passant, promotion, check, checkmate, stalemate,
//!   and insufficient-material draws.
//! - **Accounts & ratings**: SHA-256 hashed credentials, Elo ratings
//!   (K = 32, floor 0) with win/loss/draw tallies, persisted to
//!   `users.json`.
//! - **Matchmaking**: a background pairer matches queued players whose
//!   ratings are within 100 points of each other, closest first.
//! - **Challenges, draws, resignation, rematches**: direct challenges with
//!   accept/decline, draw offers, immediate resignation, and a bounded
//!   rematch window with color swap.
//! - **History & replay**: every finished game is written to
//!   `matches/<match_id>.json` and can be listed per player or replayed in
//!   full.
//!
//! ## Wire protocol
//!
//! Each message is one JSON object per line:
//!
//! ```text
//! {"action": "LOGIN", "data": {"username": "alice", "password": "…"}}
//! ```
//!
//! Replies use the same envelope (`LOGIN_SUCCESS`, `MOVE_OK`, `GAME_RESULT`,
//! `ERROR`, …). Lines are capped at 4096 bytes.
//!
//! ## Usage
//!
//! ```bash
//! # Start the server on the default port 8888
//! chessd
//!
//! # Custom port and data directory
//! chessd --port 9000 --data-dir /var/lib/chessd
//! ```

pub mod matches;
pub mod matchmaking;
pub mod protocol;
pub mod recorder;
pub mod router;
pub mod rules;
pub mod server;
pub mod sessions;
pub mod types;
pub mod users;
