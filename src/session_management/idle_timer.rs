//! Idle timers for streaming analysis.
//!
//! Each armed key owns one `tokio::time::sleep` task. Re-arming aborts the
//! previous task and bumps the generation, so an expiry that raced with new
//! activity is recognised as stale by [`IdleTimers::is_current`].

use log::trace;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Buffered expiries before timer tasks wait on the consumer.
pub const EXPIRY_CHANNEL_CAPACITY: usize = 100;

/// Deadline offset used when the timeout does not fit an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleExpiry<K> {
    pub key: K,
    pub generation: u64,
}

/// Idle timers keyed by `K` (an identity, or a host and identity pair).
pub struct IdleTimers<K> {
    timeout: Duration,
    expiry_tx: Sender<IdleExpiry<K>>,
    timers: HashMap<K, (u64, JoinHandle<()>)>,
    next_generation: u64,
}

impl<K> IdleTimers<K>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
{
    /// Must be used from within a tokio runtime.
    pub fn new(timeout: Duration) -> (Self, Receiver<IdleExpiry<K>>) {
        let (expiry_tx, expiry_rx) = mpsc::channel(EXPIRY_CHANNEL_CAPACITY);
        (
            Self {
                timeout,
                expiry_tx,
                timers: HashMap::new(),
                next_generation: 0,
            },
            expiry_rx,
        )
    }

    /// Starts (or restarts) the idle countdown of `key`.
    pub fn arm(&mut self, key: K) {
        if let Some((_, handle)) = self.timers.remove(&key) {
            handle.abort();
        }
        let generation = self.next_generation;
        self.next_generation += 1;

        let tx = self.expiry_tx.clone();
        let now = Instant::now();
        let deadline = now.checked_add(self.timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let expiry = IdleExpiry {
            key: key.clone(),
            generation,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // The receiver is gone only after shutdown.
            let _ = tx.send(expiry).await;
        });
        trace!("idle timer armed for {:?} (generation {})", key, generation);
        self.timers.insert(key, (generation, handle));
    }

    /// True when `expiry` comes from the latest timer armed for its key.
    pub fn is_current(&self, expiry: &IdleExpiry<K>) -> bool {
        self.timers
            .get(&expiry.key)
            .is_some_and(|(generation, _)| *generation == expiry.generation)
    }

    /// Aborts the timer of `key`, if any.
    pub fn disarm(&mut self, key: &K) {
        if let Some((_, handle)) = self.timers.remove(key) {
            handle.abort();
        }
    }

    pub fn armed(&self) -> usize {
        self.timers.len()
    }

    /// Aborts every timer.
    pub fn shutdown(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl<K> Drop for IdleTimers<K> {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
    }
}
