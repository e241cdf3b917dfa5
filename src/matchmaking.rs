//! Automatic matchmaking.
//!
//! Players enter a bounded waiting pool with a snapshot of their rating. A
//! background task wakes every two seconds and pairs waiting players whose
//! ratings differ by strictly less than [`ELO_THRESHOLD`], closest rating
//! first, earlier arrival winning ties. The tick is driven by wall-clock, not
//! by enqueue, so two eligible players may wait up to one interval before
//! being paired.

use crate::matches::{ColorAssignment, Participant};
use crate::protocol::Envelope;
use crate::router;
use crate::server::Server;
use crate::types::SessionState;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Maximum players waiting for a pairing.
pub const MAX_QUEUE: usize = 100;

/// Ratings must differ by strictly less than this to pair.
pub const ELO_THRESHOLD: i32 = 100;

/// Wall-clock pause between pairing attempts.
pub const TICK_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// One waiting player.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub slot: usize,
    /// Rating at the moment of joining; pairing does not chase live updates.
    pub elo: i32,
    pub joined_at: Instant,
}

/// Reasons a player cannot join the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    AlreadyQueued,
    Full,
}

/// The waiting pool, in join order.
pub struct MatchQueue {
    entries: Mutex<Vec<QueueEntry>>,
}

impl Default for MatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Adds a session to the pool with its current rating snapshot.
    pub fn enqueue(&self, slot: usize, elo: i32) -> Result<(), EnqueueError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.slot == slot) {
            return Err(EnqueueError::AlreadyQueued);
        }
        if entries.len() >= MAX_QUEUE {
            return Err(EnqueueError::Full);
        }
        entries.push(QueueEntry {
            slot,
            elo,
            joined_at: Instant::now(),
        });
        log::info!("Matchmaking queue: slot {slot} joined (elo {elo}), {} waiting", entries.len());
        Ok(())
    }

    /// Removes a session from the pool. Returns whether it was present.
    pub fn dequeue(&self, slot: usize) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.slot != slot);
        if entries.len() != before {
            log::info!("Matchmaking queue: slot {slot} left, {} waiting", entries.len());
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns the next pairable couple, or `None` when no two
    /// waiting players are within the rating threshold.
    ///
    /// Scans waiters in join order; for each, picks the later entry with the
    /// smallest rating distance under the threshold, earlier join winning
    /// ties.
    pub fn pop_pair(&self) -> Option<(QueueEntry, QueueEntry)> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() < 2 {
            return None;
        }

        for i in 0..entries.len() {
            let mut best: Option<usize> = None;
            let mut best_diff = ELO_THRESHOLD;
            for j in (i + 1)..entries.len() {
                let diff = (entries[j].elo - entries[i].elo).abs();
                let better = diff < best_diff
                    || (diff == best_diff
                        && best.is_some_and(|b| entries[j].joined_at < entries[b].joined_at));
                if better {
                    best = Some(j);
                    best_diff = diff;
                }
            }
            if let Some(j) = best {
                // Remove the later index first so `i` stays valid.
                let b = entries.remove(j);
                let a = entries.remove(i);
                return Some((a, b));
            }
        }

        None
    }
}

// ---------------------------------------------------------------------------
// Background tick
// ---------------------------------------------------------------------------

/// Runs the matchmaking loop forever: sleep one interval, then pair as many
/// couples as the pool allows.
pub async fn run(server: Arc<Server>) {
    log::info!(
        "Matchmaking started (interval {}s, rating threshold {})",
        TICK_INTERVAL.as_secs(),
        ELO_THRESHOLD
    );
    loop {
        tokio::time::sleep(TICK_INTERVAL).await;
        process_queue(&server).await;
    }
}

/// One pairing pass: keep popping pairs until none remain.
pub async fn process_queue(server: &Arc<Server>) {
    while let Some((a, b)) = server.queue.pop_pair() {
        // Entries can go stale between queue purge and pairing (disconnect,
        // accepted challenge). Keep whichever side is still free.
        let a_free = server.sessions.state_of(a.slot) == Some(SessionState::Online);
        let b_free = server.sessions.state_of(b.slot) == Some(SessionState::Online);
        if !(a_free && b_free) {
            log::warn!("Matchmaking: dropped stale pairing");
            if a_free {
                let _ = server.queue.enqueue(a.slot, a.elo);
            }
            if b_free {
                let _ = server.queue.enqueue(b.slot, b.elo);
            }
            continue;
        }

        let (Some(a_name), Some(b_name)) = (
            server.sessions.username_of(a.slot),
            server.sessions.username_of(b.slot),
        ) else {
            log::warn!("Matchmaking: dropped pair with stale session");
            continue;
        };

        log::info!(
            "Matchmaking: paired {a_name} (elo {}) with {b_name} (elo {}), diff {}",
            a.elo,
            b.elo,
            (a.elo - b.elo).abs()
        );

        let found_a = Envelope::new(
            "MATCHMAKING_STATUS",
            json!({ "status": "FOUND", "opponent": b_name }),
        );
        let found_b = Envelope::new(
            "MATCHMAKING_STATUS",
            json!({ "status": "FOUND", "opponent": a_name }),
        );
        let _ = server.sessions.send(a.slot, &found_a).await;
        let _ = server.sessions.send(b.slot, &found_b).await;

        let result = router::start_match(
            server,
            Participant {
                slot: a.slot,
                username: a_name,
            },
            Participant {
                slot: b.slot,
                username: b_name,
            },
            ColorAssignment::Coin,
        )
        .await;

        if let Err(e) = result {
            log::error!("Matchmaking: failed to start match: {e}");
            let _ = server.sessions.send(a.slot, &Envelope::error(&e.to_string())).await;
            let _ = server.sessions.send(b.slot, &Envelope::error(&e.to_string())).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_rejects_duplicates() {
        let queue = MatchQueue::new();
        queue.enqueue(1, 1200).unwrap();
        assert_eq!(queue.enqueue(1, 1200), Err(EnqueueError::AlreadyQueued));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_enqueue_respects_capacity() {
        let queue = MatchQueue::new();
        for slot in 0..MAX_QUEUE {
            queue.enqueue(slot, 1200).unwrap();
        }
        assert_eq!(queue.enqueue(MAX_QUEUE, 1200), Err(EnqueueError::Full));
    }

    #[test]
    fn test_dequeue() {
        let queue = MatchQueue::new();
        queue.enqueue(1, 1200).unwrap();
        assert!(queue.dequeue(1));
        assert!(!queue.dequeue(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_pair_requires_close_ratings() {
        let queue = MatchQueue::new();
        queue.enqueue(1, 1200).unwrap();
        queue.enqueue(2, 1301).unwrap();
        // 101 apart: no pairing.
        assert!(queue.pop_pair().is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_threshold_is_strict() {
        let queue = MatchQueue::new();
        queue.enqueue(1, 1200).unwrap();
        queue.enqueue(2, 1300).unwrap();
        // Exactly 100 apart is still too far.
        assert!(queue.pop_pair().is_none());
        queue.enqueue(3, 1299).unwrap();
        let (a, b) = queue.pop_pair().unwrap();
        assert_eq!((a.slot, b.slot), (1, 3));
    }

    #[test]
    fn test_pop_pair_prefers_closest_rating() {
        let queue = MatchQueue::new();
        queue.enqueue(1, 1250).unwrap();
        queue.enqueue(2, 1340).unwrap();
        queue.enqueue(3, 1260).unwrap();

        let (a, b) = queue.pop_pair().unwrap();
        assert_eq!((a.slot, b.slot), (1, 3));

        // The outlier stays queued.
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_pair().is_none());
    }

    #[test]
    fn test_equal_distance_prefers_earlier_join() {
        let queue = MatchQueue::new();
        queue.enqueue(1, 1250).unwrap();
        queue.enqueue(2, 1280).unwrap();
        queue.enqueue(3, 1280).unwrap();

        let (a, b) = queue.pop_pair().unwrap();
        assert_eq!((a.slot, b.slot), (1, 2));
    }

    #[test]
    fn test_pop_pair_drains_in_waves() {
        let queue = MatchQueue::new();
        queue.enqueue(1, 1250).unwrap();
        queue.enqueue(2, 1290).unwrap();
        queue.enqueue(3, 2000).unwrap();
        queue.enqueue(4, 2050).unwrap();

        let (a, b) = queue.pop_pair().unwrap();
        assert_eq!((a.slot, b.slot), (1, 2));
        let (c, d) = queue.pop_pair().unwrap();
        assert_eq!((c.slot, d.slot), (3, 4));
        assert!(queue.pop_pair().is_none());
    }
}
