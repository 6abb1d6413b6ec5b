//! Ordered fan-out of committed transactions
//!
//! Commits on different objects finish in any order, but subscribers must
//! see them in sequence order. The broadcaster keeps a reorder buffer keyed
//! by sequence and releases entries only once every earlier sequence has
//! been published. Each subscriber has its own channel, so a subscriber that
//! never drains does not block the others.

use doctx_storage::CommittedTx;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{trace, warn};

struct State {
    next: u64,
    pending: BTreeMap<u64, Arc<CommittedTx>>,
    subscribers: Vec<(u64, Sender<Arc<CommittedTx>>)>,
    next_id: u64,
}

/// Sequence-ordered publisher of committed transactions
pub struct Broadcaster {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Broadcaster")
            .field("next", &state.next)
            .field("pending", &state.pending.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl Broadcaster {
    /// Broadcaster whose first expected sequence is `last + 1`
    pub fn starting_after(last: u64) -> Self {
        Broadcaster {
            state: Arc::new(Mutex::new(State {
                next: last + 1,
                pending: BTreeMap::new(),
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Sequence the broadcaster waits for next
    pub fn next_sequence(&self) -> u64 {
        self.state.lock().next
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Publish a committed transaction; delivery waits for earlier gaps
    pub fn publish(&self, entry: CommittedTx) {
        let mut state = self.state.lock();
        if entry.sequence < state.next {
            warn!(
                target: "doctx::pipeline",
                sequence = entry.sequence,
                next = state.next,
                "stale broadcast dropped"
            );
            return;
        }
        state.pending.insert(entry.sequence, Arc::new(entry));

        loop {
            let next = state.next;
            let Some(ready) = state.pending.remove(&next) else {
                break;
            };
            state.next += 1;
            // a closed receiver means the subscription is gone
            state
                .subscribers
                .retain(|(_, sender)| sender.send(Arc::clone(&ready)).is_ok());
            trace!(target: "doctx::pipeline", sequence = next, "broadcast");
        }
    }

    /// New subscription receiving every sequence published from now on
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push((id, sender));
        Subscription {
            id,
            receiver,
            state: Arc::downgrade(&self.state),
        }
    }
}

/// Receiving end of a broadcaster subscription; unsubscribes on drop
pub struct Subscription {
    id: u64,
    receiver: Receiver<Arc<CommittedTx>>,
    state: Weak<Mutex<State>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Block until the next entry; `None` once the broadcaster is gone
    pub fn recv(&self) -> Option<Arc<CommittedTx>> {
        self.receiver.recv().ok()
    }

    /// Next entry if one is queued
    pub fn try_recv(&self) -> Option<Arc<CommittedTx>> {
        match self.receiver.try_recv() {
            Ok(entry) => Some(entry),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next entry
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<CommittedTx>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(entry) => Some(entry),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued right now
    pub fn drain(&self) -> Vec<Arc<CommittedTx>> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.lock().subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}
