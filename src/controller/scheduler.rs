//! # Poll Scheduler
//!
//! Per-binding state machine that decides when the next vault check is due.
//!
//! Each tracked binding has a [`SyncState`] that moves between two poll rates:
//!
//! | Event   | Next state                                                    |
//! |---------|---------------------------------------------------------------|
//! | initial | Normal, due immediately                                       |
//! | success | Normal, failures reset, due after the normal interval         |
//! | failure | failures + 1, Slow once the threshold is reached, due after the interval of the new state |
//!
//! The scheduler never talks to the queue. The reconciler feeds outcomes in and asks
//! `is_due` before touching the vault.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Poll cadence settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollFrequency {
    pub normal: Duration,
    pub slow: Duration,
    pub max_failures_before_slowing_down: u32,
}

impl PollFrequency {
    fn interval(&self, interval: PollInterval) -> Duration {
        match interval {
            PollInterval::Normal => self.normal,
            PollInterval::Slow => self.slow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollInterval {
    #[default]
    Normal,
    Slow,
}

/// In-memory sync bookkeeping for one binding
///
/// Rebuilt from scratch on restart; the first check after a restart is always due.
#[derive(Debug, Clone)]
pub struct SyncState {
    /// Empty until the first successful apply
    pub last_applied_version: String,
    pub consecutive_failures: u32,
    pub interval: PollInterval,
    pub next_due_at: Instant,
    /// Binding generation the state was recorded for
    pub observed_generation: Option<i64>,
    /// Destination secret name last written for this binding
    pub destination: Option<String>,
}

impl SyncState {
    fn new(now: Instant) -> Self {
        Self {
            last_applied_version: String::new(),
            consecutive_failures: 0,
            interval: PollInterval::Normal,
            next_due_at: now,
            observed_generation: None,
            destination: None,
        }
    }
}

/// Thread-safe map of [`SyncState`] keyed by binding
///
/// The lock is only held for map operations. Per-key exclusivity comes from the work
/// queue, so two workers never race on the same entry.
#[derive(Debug)]
pub struct PollScheduler<K> {
    frequency: PollFrequency,
    states: Mutex<HashMap<K, SyncState>>,
}

impl<K> PollScheduler<K>
where
    K: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new(frequency: PollFrequency) -> Self {
        Self {
            frequency,
            states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn frequency(&self) -> PollFrequency {
        self.frequency
    }

    fn with_states<R>(&self, f: impl FnOnce(&mut HashMap<K, SyncState>) -> R) -> R {
        // A panic while holding the lock cannot leave the map half-updated
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut states)
    }

    /// Whether the binding should be checked against the vault now
    ///
    /// Unknown keys are due; a key with no state has never been checked.
    pub fn is_due(&self, key: &K, now: Instant) -> bool {
        self.with_states(|states| states.get(key).map_or(true, |s| now >= s.next_due_at))
    }

    /// Feed a reconciliation outcome into the state machine
    pub fn record_outcome(&self, key: &K, success: bool, now: Instant) {
        let frequency = self.frequency;
        self.with_states(|states| {
            let state = states
                .entry(key.clone())
                .or_insert_with(|| SyncState::new(now));
            if success {
                state.consecutive_failures = 0;
                state.interval = PollInterval::Normal;
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if state.consecutive_failures >= frequency.max_failures_before_slowing_down {
                    state.interval = PollInterval::Slow;
                }
            }
            state.next_due_at = now + frequency.interval(state.interval);
        });
    }

    /// Record the binding generation; when it moved, make the binding due now and clear
    /// the applied version so the edited binding is written on this pass.
    ///
    /// Returns `true` when a previously observed generation changed.
    pub fn observe_generation(&self, key: &K, generation: Option<i64>, now: Instant) -> bool {
        self.with_states(|states| {
            let state = states
                .entry(key.clone())
                .or_insert_with(|| SyncState::new(now));
            if state.observed_generation == generation {
                return false;
            }
            let first_sight = state.observed_generation.is_none();
            state.observed_generation = generation;
            if !first_sight {
                state.last_applied_version.clear();
                state.next_due_at = now;
            }
            !first_sight
        })
    }

    /// Drop all state for a binding
    pub fn forget(&self, key: &K) {
        self.with_states(|states| {
            states.remove(key);
        });
    }

    pub fn last_applied_version(&self, key: &K) -> Option<String> {
        self.with_states(|states| {
            states
                .get(key)
                .map(|s| s.last_applied_version.clone())
                .filter(|v| !v.is_empty())
        })
    }

    pub fn set_applied_version(&self, key: &K, version: &str, now: Instant) {
        self.with_states(|states| {
            states
                .entry(key.clone())
                .or_insert_with(|| SyncState::new(now))
                .last_applied_version = version.to_string();
        });
    }

    pub fn destination(&self, key: &K) -> Option<String> {
        self.with_states(|states| states.get(key).and_then(|s| s.destination.clone()))
    }

    pub fn set_destination(&self, key: &K, destination: &str, now: Instant) {
        self.with_states(|states| {
            states
                .entry(key.clone())
                .or_insert_with(|| SyncState::new(now))
                .destination = Some(destination.to_string());
        });
    }

    /// Snapshot of one binding's state
    pub fn state(&self, key: &K) -> Option<SyncState> {
        self.with_states(|states| states.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.with_states(|states| states.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
