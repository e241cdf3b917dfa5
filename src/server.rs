//! TCP listener and per-connection lifecycle.
//!
//! The accept loop hands each connection a session slot and a task of its own
//! running the newline-framed read loop. Request lines are capped at 4096
//! bytes; anything longer is answered with `ERROR {"Invalid JSON"}` and
//! skipped. A read error or EOF tears down only that session: it is purged
//! from the matchmaking queue, any live match it was playing is aborted, and
//! its account is logged out.

use crate::matchmaking::{self, MatchQueue};
use crate::matches::MatchRegistry;
use crate::protocol::{Envelope, MAX_LINE_BYTES};
use crate::recorder::Recorder;
use crate::router;
use crate::sessions::SessionRegistry;
use crate::users::{self, UserStore};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything the handlers share: one registry per concern, each with its own
/// lock. Cloned around as `Arc<Server>`.
pub struct Server {
    pub users: UserStore,
    pub sessions: SessionRegistry,
    pub matches: MatchRegistry,
    pub queue: MatchQueue,
    pub recorder: Recorder,
}

impl Server {
    /// Builds the shared state, loading `users.json` and creating the data
    /// directories under `data_dir`.
    pub fn open(data_dir: &Path) -> io::Result<Arc<Server>> {
        Ok(Arc::new(Server {
            users: UserStore::open(data_dir)?,
            sessions: SessionRegistry::new(),
            matches: MatchRegistry::new(),
            queue: MatchQueue::new(),
            recorder: Recorder::open(data_dir)?,
        }))
    }
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

/// Binds the listener and serves until ctrl-c. Bind failures propagate to
/// the caller.
pub async fn run(server: Arc<Server>, host: &str, port: u16) -> io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    serve(server, listener).await
}

/// Accept loop over an already-bound listener, with the matchmaking tick
/// running alongside.
pub async fn serve(server: Arc<Server>, listener: TcpListener) -> io::Result<()> {
    log::info!("Chess server listening on {}", listener.local_addr()?);

    tokio::spawn(matchmaking::run(server.clone()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => spawn_connection(server.clone(), stream, peer),
                    Err(e) => log::warn!("Accept failed: {e}"),
                }
            }
        }
    }
}

fn spawn_connection(server: Arc<Server>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = stream.into_split();

    let Some(slot) = server.sessions.accept(write_half) else {
        // Dropping both halves closes the rejected connection.
        log::warn!("Session table full, rejecting {peer}");
        return;
    };

    log::info!("New connection from {peer} (slot {slot})");
    tokio::spawn(async move {
        connection_loop(&server, slot, read_half).await;
        disconnect(&server, slot).await;
    });
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

enum Frame {
    Line,
    Oversize,
    Eof,
}

/// Reads newline-delimited frames and routes each one until the client goes
/// away.
async fn connection_loop(server: &Arc<Server>, slot: usize, read_half: OwnedReadHalf) {
    let mut reader = BufReader::new(read_half);
    let mut buf: Vec<u8> = Vec::with_capacity(512);

    loop {
        match read_frame(&mut reader, &mut buf).await {
            Ok(Frame::Line) => {
                let line = String::from_utf8_lossy(&buf);
                router::handle_message(server, slot, line.trim_end()).await;
            }
            Ok(Frame::Oversize) => {
                let _ = server
                    .sessions
                    .send(slot, &Envelope::error("Invalid JSON"))
                    .await;
            }
            Ok(Frame::Eof) => break,
            Err(e) => {
                log::debug!("Read error on slot {slot}: {e}");
                break;
            }
        }
    }
}

/// Reads one newline-terminated frame into `buf`, enforcing the line cap.
///
/// Returns `Oversize` when the cap is hit before a newline; the remainder of
/// that line is drained and discarded so framing stays intact.
async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    buf: &mut Vec<u8>,
) -> io::Result<Frame> {
    buf.clear();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', buf)
        .await?;

    if n == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        return Ok(Frame::Line);
    }
    if n < MAX_LINE_BYTES {
        // Stream ended mid-line; drop the fragment.
        return Ok(Frame::Eof);
    }

    // Cap reached without a newline: swallow the rest of the line, stopping
    // exactly at the delimiter so the next frame parses cleanly.
    let mut scratch: Vec<u8> = Vec::with_capacity(1024);
    loop {
        scratch.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut scratch)
            .await?;
        if read == 0 {
            return Ok(Frame::Eof);
        }
        if scratch.last() == Some(&b'\n') {
            return Ok(Frame::Oversize);
        }
    }
}

// ---------------------------------------------------------------------------
// Disconnect cleanup
// ---------------------------------------------------------------------------

/// Tears down one session: queue purge, live-match abort, slot release,
/// account logout.
async fn disconnect(server: &Arc<Server>, slot: usize) {
    log::info!("Slot {slot} disconnected");

    server.queue.dequeue(slot);

    // A player vanishing mid-game aborts the match: the opponent is told,
    // nothing is recorded, no ratings move.
    if let Some(idx) = server.matches.find_by_slot(slot) {
        router::terminal_flow(server, idx, users::WINNER_ABORT, "Opponent disconnected").await;
    }

    if let Some(username) = server.sessions.release(slot) {
        server.users.logout(&username);
    }
}
