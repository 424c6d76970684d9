//! Pending-reply registry.
//!
//! Each backend keeps one registry mapping the in-flight sequence id to the
//! reply slot of the request waiting on it. A slot is a `oneshot` sender, so
//! completing a reply exactly once is structural: the second completion path
//! simply finds the entry gone, and a slot that is dropped (backend torn
//! down) resolves the waiting side with an error instead of hanging it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use binrelay_common::wire::Message;
use binrelay_common::{RelayError, Result};
use tokio::sync::oneshot;

/// Completes one waiting request with its response or failure.
pub type ReplySender = oneshot::Sender<Result<Message>>;

struct PendingEntry {
    reply: ReplySender,
    deadline: Instant,
}

/// Thread-safe `seq_id -> (reply slot, deadline)` table.
#[derive(Default)]
pub struct PendingReplies {
    entries: Mutex<HashMap<i32, PendingEntry>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reply slot. A duplicate sequence id overwrites the old
    /// entry; the displaced sender is dropped, which resolves its receiver
    /// with an error.
    pub fn insert(&self, seq_id: i32, reply: ReplySender, deadline: Instant) {
        self.entries
            .lock()
            .unwrap()
            .insert(seq_id, PendingEntry { reply, deadline });
    }

    /// Atomically fetches and deletes the reply slot for `seq_id`.
    pub fn remove(&self, seq_id: i32) -> Option<ReplySender> {
        self.entries
            .lock()
            .unwrap()
            .remove(&seq_id)
            .map(|entry| entry.reply)
    }

    /// Expires every entry whose deadline has passed, completing each with a
    /// timeout error. Completion happens outside the lock. Returns how many
    /// entries expired.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<ReplySender> = {
            let mut entries = self.entries.lock().unwrap();
            let seq_ids: Vec<i32> = entries
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(seq_id, _)| *seq_id)
                .collect();
            seq_ids
                .into_iter()
                .filter_map(|seq_id| entries.remove(&seq_id))
                .map(|entry| entry.reply)
                .collect()
        };

        let count = expired.len();
        for reply in expired {
            let _ = reply.send(Err(RelayError::RequestTimeout));
        }
        count
    }

    /// Fails every remaining entry with a not-connected error. Used when a
    /// backend is stopped so no waiting request outlives it.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<ReplySender> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain().map(|(_, entry)| entry.reply).collect()
        };
        let count = drained.len();
        for reply in drained {
            let _ = reply.send(Err(RelayError::NotConnected));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_remove_completes_exactly_once() {
        let pending = PendingReplies::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(7, tx, far_future());

        let reply = pending.remove(7).unwrap();
        reply
            .send(Ok(Message::new(vec![0x80, 0x01, 0x00, 0x02])))
            .unwrap();
        assert!(rx.await.unwrap().is_ok());

        // Gone after the fetch-and-delete.
        assert!(pending.remove(7).is_none());
    }

    #[tokio::test]
    async fn test_sweep_expires_only_past_deadlines() {
        let pending = PendingReplies::new();
        let (expired_tx, expired_rx) = oneshot::channel();
        let (live_tx, _live_rx) = oneshot::channel();
        pending.insert(1, expired_tx, Instant::now() - Duration::from_millis(1));
        pending.insert(2, live_tx, far_future());

        assert_eq!(pending.sweep(), 1);
        assert_eq!(pending.len(), 1);

        match expired_rx.await.unwrap() {
            Err(RelayError::RequestTimeout) => {}
            other => panic!("expected timeout, got {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn test_no_entry_survives_two_sweeps_past_deadline() {
        let pending = PendingReplies::new();
        let (tx, _rx) = oneshot::channel();
        pending.insert(1, tx, Instant::now() - Duration::from_millis(1));
        pending.sweep();
        assert_eq!(pending.sweep(), 0);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_overwrites() {
        let pending = PendingReplies::new();
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, _second_rx) = oneshot::channel();
        pending.insert(5, first_tx, far_future());
        pending.insert(5, second_tx, far_future());

        assert_eq!(pending.len(), 1);
        // The displaced sender was dropped, so the first waiter resolves
        // with a channel error rather than hanging.
        assert!(first_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_fail_all_drains_everything() {
        let pending = PendingReplies::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        pending.insert(1, tx_a, far_future());
        pending.insert(2, tx_b, far_future());

        assert_eq!(pending.fail_all(), 2);
        assert!(pending.is_empty());
        assert!(matches!(rx_a.await.unwrap(), Err(RelayError::NotConnected)));
        assert!(matches!(rx_b.await.unwrap(), Err(RelayError::NotConnected)));
    }
}
