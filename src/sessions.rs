//! Live connection registry.
//!
//! Every accepted connection occupies one of [`MAX_SESSIONS`] fixed slots for
//! its whole lifetime; the slot index is the session's identity everywhere
//! else in the server. Each slot owns the write half of its TCP stream behind
//! its own async lock, so concurrent responders to the same client never
//! interleave bytes on the wire.
//!
//! Lock discipline: the registry lock is only ever held to copy or mutate
//! slot metadata, never across a socket write. [`SessionRegistry::send`]
//! clones the writer handle under the registry lock, releases it, and only
//! then awaits the per-slot send lock.

use crate::protocol::Envelope;
use crate::types::SessionState;
use rand::Rng;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

/// Maximum concurrently connected clients.
pub const MAX_SESSIONS: usize = 100;

/// Length of the random hex session id handed out at login.
const SESSION_ID_LEN: usize = 15;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

struct SessionSlot {
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    /// Empty until login.
    username: String,
    session_id: String,
    state: SessionState,
}

/// Public snapshot of one logged-in session, as listed to other players.
#[derive(Debug, Clone)]
pub struct PlayerEntry {
    pub slot: usize,
    pub username: String,
    pub state: SessionState,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Fixed-capacity table of live connections.
pub struct SessionRegistry {
    slots: Mutex<Vec<Option<SessionSlot>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new((0..MAX_SESSIONS).map(|_| None).collect()),
        }
    }

    /// Occupies the first free slot with a fresh connection and returns its
    /// index, or `None` when the table is full.
    pub fn accept(&self, writer: OwnedWriteHalf) -> Option<usize> {
        let mut slots = self.slots.lock().unwrap();
        let idx = slots.iter().position(Option::is_none)?;
        slots[idx] = Some(SessionSlot {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            username: String::new(),
            session_id: String::new(),
            state: SessionState::Offline,
        });
        Some(idx)
    }

    /// Frees the slot and returns the username that was bound to it, if any.
    /// Dropping the writer closes the write half of the connection.
    pub fn release(&self, slot: usize) -> Option<String> {
        let mut slots = self.slots.lock().unwrap();
        let taken = slots.get_mut(slot)?.take()?;
        if taken.username.is_empty() {
            None
        } else {
            Some(taken.username)
        }
    }

    /// Serializes the message as one compact JSON line and writes it fully to
    /// the client, holding only that slot's send lock for the duration.
    pub async fn send(&self, slot: usize, message: &Envelope) -> io::Result<()> {
        let writer = {
            let slots = self.slots.lock().unwrap();
            match slots.get(slot).and_then(Option::as_ref) {
                Some(s) => Arc::clone(&s.writer),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "session slot is empty",
                    ));
                }
            }
        };

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        // write_all loops until every byte is out or the transport fails.
        let mut writer = writer.lock().await;
        writer.write_all(&line).await
    }

    /// Binds a successful login to the slot and marks it online.
    pub fn bind_login(&self, slot: usize, username: &str, session_id: &str) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(Some(s)) = slots.get_mut(slot) {
            s.username = username.to_string();
            s.session_id = session_id.to_string();
            s.state = SessionState::Online;
        }
    }

    pub fn set_state(&self, slot: usize, state: SessionState) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(Some(s)) = slots.get_mut(slot) {
            s.state = state;
        }
    }

    pub fn state_of(&self, slot: usize) -> Option<SessionState> {
        let slots = self.slots.lock().unwrap();
        slots.get(slot).and_then(Option::as_ref).map(|s| s.state)
    }

    /// Username bound to the slot, or `None` before login.
    pub fn username_of(&self, slot: usize) -> Option<String> {
        let slots = self.slots.lock().unwrap();
        slots
            .get(slot)
            .and_then(Option::as_ref)
            .filter(|s| !s.username.is_empty())
            .map(|s| s.username.clone())
    }

    /// Finds the slot a user is logged in on.
    pub fn find_by_username(&self, username: &str) -> Option<usize> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .position(|s| matches!(s, Some(s) if s.username == username))
    }

    /// Returns `true` if the slot is still occupied by the expected user.
    /// Used to validate weak slot references held by finished matches.
    pub fn is_live(&self, slot: usize, expected_username: &str) -> bool {
        let slots = self.slots.lock().unwrap();
        matches!(
            slots.get(slot).and_then(Option::as_ref),
            Some(s) if s.username == expected_username
        )
    }

    /// Snapshots every logged-in session except `exclude`, for `PLAYER_LIST`.
    pub fn logged_in_players(&self, exclude: usize) -> Vec<PlayerEntry> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .enumerate()
            .filter(|&(idx, _)| idx != exclude)
            .filter_map(|(idx, s)| {
                let s = s.as_ref()?;
                if s.username.is_empty() {
                    return None;
                }
                Some(PlayerEntry {
                    slot: idx,
                    username: s.username.clone(),
                    state: s.state,
                })
            })
            .collect()
    }
}

/// Generates a random lowercase-hex session id.
pub fn generate_session_id() -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..SESSION_ID_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::{TcpListener, TcpStream};

    /// A connected (client stream, server-side write half) pair on loopback.
    async fn socket_pair() -> (TcpStream, OwnedWriteHalf) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let (_read, write) = server_stream.into_split();
        (client, write)
    }

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id();
        assert_eq!(id.len(), 15);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn test_accept_release_reuses_slot() {
        let registry = SessionRegistry::new();
        let (_c1, w1) = socket_pair().await;
        let (_c2, w2) = socket_pair().await;

        let a = registry.accept(w1).unwrap();
        let b = registry.accept(w2).unwrap();
        assert_ne!(a, b);

        registry.bind_login(a, "alice", "0123456789abcde");
        assert_eq!(registry.release(a), Some("alice".to_string()));

        // Freed slot is handed out again.
        let (_c3, w3) = socket_pair().await;
        assert_eq!(registry.accept(w3), Some(a));
        // The new occupant has no login bound.
        assert_eq!(registry.username_of(a), None);
    }

    #[tokio::test]
    async fn test_login_binding_and_lookup() {
        let registry = SessionRegistry::new();
        let (_c, w) = socket_pair().await;
        let slot = registry.accept(w).unwrap();

        assert_eq!(registry.state_of(slot), Some(SessionState::Offline));
        registry.bind_login(slot, "alice", "0123456789abcde");
        assert_eq!(registry.state_of(slot), Some(SessionState::Online));
        assert_eq!(registry.find_by_username("alice"), Some(slot));
        assert!(registry.is_live(slot, "alice"));
        assert!(!registry.is_live(slot, "bob"));
    }

    #[tokio::test]
    async fn test_send_writes_newline_framed_json() {
        let registry = SessionRegistry::new();
        let (client, w) = socket_pair().await;
        let slot = registry.accept(w).unwrap();

        let msg = Envelope::new("PONG", json!({}));
        registry.send(slot, &msg).await.unwrap();

        let mut reader = tokio::io::BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{\"action\":\"PONG\",\"data\":{}}\n");
    }

    #[tokio::test]
    async fn test_send_to_empty_slot_fails() {
        let registry = SessionRegistry::new();
        let msg = Envelope::new("PONG", json!({}));
        assert!(registry.send(7, &msg).await.is_err());
    }

    #[tokio::test]
    async fn test_player_list_excludes_requester_and_anonymous() {
        let registry = SessionRegistry::new();
        let (_c1, w1) = socket_pair().await;
        let (_c2, w2) = socket_pair().await;
        let (_c3, w3) = socket_pair().await;

        let a = registry.accept(w1).unwrap();
        let b = registry.accept(w2).unwrap();
        let _anon = registry.accept(w3).unwrap();

        registry.bind_login(a, "alice", "0123456789abcde");
        registry.bind_login(b, "bob", "fedcba987654321");
        registry.set_state(b, SessionState::InMatch);

        let listed = registry.logged_in_players(a);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].username, "bob");
        assert_eq!(listed[0].state, SessionState::InMatch);
    }
}
