//! # Work Queue
//!
//! Deduplicating, delay-aware queue of reconciliation keys with a bounded requeue count.
//!
//! Guarantees:
//! - a key is pending at most once, however many times it is enqueued
//! - a key is handed to at most one worker at a time; enqueues that arrive while it is
//!   being processed are deferred and become visible on [`WorkQueue::done`]
//! - a key that fails more than `max_num_requeues` times in one episode is dropped and
//!   stays dropped until a fresh [`WorkQueue::enqueue`]
//! - a fresh enqueue that arrives while the key is being processed starts a new episode;
//!   a failure of the pass already in flight cannot drop it
//!
//! All bookkeeping sits behind one `std::sync::Mutex` that is never held across an await.

use super::backoff::ExponentialBackoff;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Outcome of [`WorkQueue::requeue_with_backoff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueDecision {
    /// Scheduled again after the given delay
    Requeued(Duration),
    /// Retry budget exhausted; the key will not run again until a fresh enqueue
    Dropped,
}

/// Shared handle to the queue; clones point at the same queue
pub struct WorkQueue<K> {
    inner: Arc<WorkQueueInner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct WorkQueueInner<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    backoff: ExponentialBackoff,
    max_num_requeues: u32,
}

struct QueueState<K> {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing: either in `queue` or deferred behind `processing`
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Not-before timestamps; `seq` keeps entries with equal deadlines distinct
    delayed: BTreeMap<(Instant, u64), K>,
    waiting: HashMap<K, (Instant, u64)>,
    seq: u64,
    requeues: HashMap<K, u32>,
    dropped: HashSet<K>,
    /// Processing keys that received a fresh enqueue since they were handed out
    fresh_in_flight: HashSet<K>,
    shutting_down: bool,
}

impl<K> QueueState<K>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            delayed: BTreeMap::new(),
            waiting: HashMap::new(),
            seq: 0,
            requeues: HashMap::new(),
            dropped: HashSet::new(),
            fresh_in_flight: HashSet::new(),
            shutting_down: false,
        }
    }

    /// Returns `true` if a waiting worker should be woken
    fn add(&mut self, key: K) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn add_after(&mut self, key: K, at: Instant) {
        if let Some(existing) = self.waiting.get(&key) {
            if existing.0 <= at {
                return;
            }
            let existing = *existing;
            self.delayed.remove(&existing);
        }
        self.seq += 1;
        let slot = (at, self.seq);
        self.delayed.insert(slot, key.clone());
        self.waiting.insert(key, slot);
    }

    fn cancel_delayed(&mut self, key: &K) {
        if let Some(slot) = self.waiting.remove(key) {
            self.delayed.remove(&slot);
        }
    }

    /// Move every delayed key whose deadline has passed into the ready queue
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.waiting.remove(&key);
            self.add(key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.keys().next().map(|(at, _)| *at)
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    #[must_use]
    pub fn new(backoff: ExponentialBackoff, max_num_requeues: u32) -> Self {
        Self {
            inner: Arc::new(WorkQueueInner {
                state: Mutex::new(QueueState::new()),
                notify: Notify::new(),
                backoff,
                max_num_requeues,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn wake(&self) {
        self.inner.notify.notify_waiters();
    }

    /// Fresh, watch-driven enqueue
    ///
    /// Resets the requeue counter and revives a dropped key.
    pub fn enqueue(&self, key: K) {
        let wake = {
            let mut state = self.lock();
            state.requeues.remove(&key);
            state.dropped.remove(&key);
            if state.processing.contains(&key) && !state.shutting_down {
                state.fresh_in_flight.insert(key.clone());
            }
            state.add(key)
        };
        if wake {
            self.wake();
        }
    }

    /// Timer-driven enqueue
    ///
    /// Keeps the requeue counter and ignores keys dropped in the current failure episode.
    pub fn enqueue_periodic(&self, key: K) {
        let wake = {
            let mut state = self.lock();
            if state.dropped.contains(&key) {
                return;
            }
            state.add(key)
        };
        if wake {
            self.wake();
        }
    }

    /// Make the key visible after `delay`
    pub fn enqueue_after(&self, key: K, delay: Duration) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            if delay.is_zero() {
                if !state.add(key) {
                    return;
                }
            } else {
                state.add_after(key, Instant::now() + delay);
            }
        }
        // Sleeping workers recompute their deadline
        self.wake();
    }

    /// Wait for the next ready key
    ///
    /// The returned key is marked as processing until [`WorkQueue::done`] is called.
    /// Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a wake between the check and the await is not lost
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.fresh_in_flight.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                state.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release the processing mark; a deferred enqueue becomes visible
    pub fn done(&self, key: &K) {
        let wake = {
            let mut state = self.lock();
            state.processing.remove(key);
            state.fresh_in_flight.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if wake {
            self.wake();
        }
    }

    /// Count a failure and either schedule a retry or drop the key
    pub fn requeue_with_backoff(&self, key: &K) -> RequeueDecision {
        let delay = {
            let mut state = self.lock();
            let count = {
                let counter = state.requeues.entry(key.clone()).or_insert(0);
                *counter = counter.saturating_add(1);
                *counter
            };
            if count > self.inner.max_num_requeues {
                state.requeues.remove(key);
                if state.fresh_in_flight.contains(key) {
                    // The deferred pass already pending belongs to the new episode
                    return RequeueDecision::Requeued(Duration::ZERO);
                }
                state.dropped.insert(key.clone());
                state.dirty.remove(key);
                state.queue.retain(|k| k != key);
                state.cancel_delayed(key);
                return RequeueDecision::Dropped;
            }
            self.inner.backoff.delay(count)
        };
        self.enqueue_after(key.clone(), delay);
        RequeueDecision::Requeued(delay)
    }

    /// Reset the requeue counter after a success
    pub fn forget(&self, key: &K) {
        let mut state = self.lock();
        state.requeues.remove(key);
        state.dropped.remove(key);
    }

    /// Stop admitting keys and release every waiting worker
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.wake();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Failures counted for the key in the current episode
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_dropped(&self, key: &K) -> bool {
        self.lock().dropped.contains(key)
    }

    /// Keys ready to be handed out right now
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.try_lock() {
            Ok(state) => f
                .debug_struct("WorkQueue")
                .field("ready", &state.queue.len())
                .field("processing", &state.processing.len())
                .field("delayed", &state.delayed.len())
                .field("dropped", &state.dropped.len())
                .field("shutting_down", &state.shutting_down)
                .finish(),
            Err(_) => f.debug_struct("WorkQueue").finish_non_exhaustive(),
        }
    }
}
