//! timer - named countdowns with a bounded retry budget

use anyhow::{Result, ensure};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use stop_token::{StopSource, StopToken, prelude::*};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, interval: Duration) -> Result<Self> {
        ensure!(!interval.is_zero(), "Timer interval must be non-zero");
        Ok(RetryPolicy {
            max_retries,
            interval,
        })
    }

    /// A timer that is exhausted the first time it expires.
    pub fn one_shot(interval: Duration) -> Result<Self> {
        Self::new(0, interval)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of expiries up to and including the exhausting one.  A zero retry budget
    /// still waits for one interval.
    pub fn expiries(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn total_wait(&self) -> Duration {
        self.interval * self.expiries()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    // The nth expiry, with budget left.
    Retry(u32),
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Continue,
    Stop,
}

/// Identifies one arming of a named timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct ArmedTimer {
    id: TimerId,
    // Dropping this cancels the countdown task.
    _stop_source: StopSource,
}

/// The timers of one procedure instance, keyed by name.  Owned by the procedure's locked state,
/// so arming, stopping and checking happen under the same lock as every other state change.
pub struct NamedTimers<K> {
    next_id: u64,
    armed: HashMap<K, ArmedTimer>,
}

impl<K> Default for NamedTimers<K> {
    fn default() -> Self {
        NamedTimers {
            next_id: 0,
            armed: HashMap::new(),
        }
    }
}

impl<K> NamedTimers<K>
where
    K: Copy + Eq + Hash + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the named timer, replacing (and cancelling) any earlier arming of the same name.
    /// `on_expiry` runs on a background task after each interval until it returns
    /// TimerAction::Stop or the budget is exhausted.  It must check `is_current` under the
    /// owner's lock before acting, since a stop can race with an expiry already in flight.
    pub fn start<F, Fut>(&mut self, name: K, policy: RetryPolicy, on_expiry: F) -> TimerId
    where
        F: FnMut(TimerId, Expiry) -> Fut + Send + 'static,
        Fut: Future<Output = TimerAction> + Send + 'static,
    {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let stop_source = StopSource::new();
        async_std::task::spawn(run_timer(id, policy, stop_source.token(), on_expiry));
        self.armed.insert(
            name,
            ArmedTimer {
                id,
                _stop_source: stop_source,
            },
        );
        id
    }

    /// Returns false if there was no running timer of this name.
    pub fn stop(&mut self, name: K) -> bool {
        self.armed.remove(&name).is_some()
    }

    pub fn stop_all(&mut self) {
        self.armed.clear();
    }

    pub fn is_armed(&self, name: K) -> bool {
        self.armed.contains_key(&name)
    }

    pub fn is_current(&self, name: K, id: TimerId) -> bool {
        self.armed.get(&name).is_some_and(|t| t.id == id)
    }
}

async fn run_timer<F, Fut>(
    id: TimerId,
    policy: RetryPolicy,
    stop_token: StopToken,
    mut on_expiry: F,
)
where
    F: FnMut(TimerId, Expiry) -> Fut,
    Fut: Future<Output = TimerAction>,
{
    let expiries = policy.expiries();
    for n in 1..=expiries {
        if async_std::task::sleep(policy.interval())
            .timeout_at(stop_token.clone())
            .await
            .is_err()
        {
            return;
        }
        let expiry = if n == expiries {
            Expiry::Exhausted
        } else {
            Expiry::Retry(n)
        };
        if on_expiry(id, expiry).await == TimerAction::Stop {
            return;
        }
    }
}
