// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Non-blocking cache in front of a slow or flaky measurement.
//!
//! [`ProbeCache::poll`] never waits on the probe. It harvests a finished
//! result if there is one, schedules the next run on the cache's own worker
//! thread when the interval has passed, and returns whatever value it holds.
//! Consecutive failures open a cooldown window during which nothing is
//! dispatched.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use crate::common::config::ProbePolicy;
use crate::error::{Error, Result};

/// A value a [`ProbeCache`] can hold.
pub trait ProbeValue: Clone + Send + 'static {
    /// Folds a fresh measurement into the cached one.
    ///
    /// The default replaces the cached value. Multi-field values override
    /// this to keep fields the fresh measurement could not produce.
    fn merge(&mut self, fresh: Self) {
        *self = fresh;
    }
}

impl ProbeValue for f64 {}

type ProbeFn<V> = Arc<dyn Fn() -> Result<V> + Send + Sync>;
type Reply<V> = Sender<Result<V>>;

struct CacheState<V> {
    value: V,
    last_update: Option<Instant>,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    /// Bumped by every reset; results dispatched under an older one are dropped
    generation: u64,
    /// Completion handle of the dispatched probe and its generation; `Some` while in flight
    pending: Option<(u64, Receiver<Result<V>>)>,
    /// Job queue of the worker thread, spawned on first dispatch
    jobs: Option<Sender<Reply<V>>>,
}

impl<V: ProbeValue> CacheState<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            last_update: None,
            consecutive_failures: 0,
            cooldown_until: None,
            generation: 0,
            pending: None,
            jobs: None,
        }
    }
}

pub struct ProbeCache<V: ProbeValue> {
    name: &'static str,
    initial: V,
    policy: ProbePolicy,
    probe: ProbeFn<V>,
    state: Mutex<CacheState<V>>,
}

impl<V: ProbeValue> ProbeCache<V> {
    /// `initial` is returned until the first successful probe.
    pub fn new<F>(name: &'static str, initial: V, policy: ProbePolicy, probe: F) -> Self
    where
        F: Fn() -> Result<V> + Send + Sync + 'static,
    {
        Self {
            name,
            state: Mutex::new(CacheState::new(initial.clone())),
            initial,
            policy,
            probe: Arc::new(probe),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        // A poisoned lock still holds a consistent state: every update is a
        // plain field assignment.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the cached value immediately, scheduling a refresh if one is due.
    pub fn poll(&self) -> V {
        let now = Instant::now();
        let mut state = self.lock();

        self.collect(&mut state, now);
        if state.pending.is_none() && self.due(&mut state, now) {
            self.dispatch(&mut state, now);
        }

        state.value.clone()
    }

    fn collect(&self, state: &mut CacheState<V>, now: Instant) {
        let Some((generation, pending)) = state.pending.as_ref() else {
            return;
        };
        let stale = *generation != state.generation;

        let result = match pending.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                state.jobs = None;
                Err(Error::Probe("probe worker exited".to_string()))
            }
        };
        state.pending = None;
        if stale {
            tracing::debug!("{} probe result from before reset discarded", self.name);
            return;
        }
        self.apply(state, result, now);
    }

    fn apply(&self, state: &mut CacheState<V>, result: Result<V>, now: Instant) {
        match result {
            Ok(fresh) => {
                state.value.merge(fresh);
                state.consecutive_failures = 0;
                state.cooldown_until = None;
            }
            Err(e) => {
                state.consecutive_failures += 1;
                tracing::debug!(
                    "{} probe failed ({} in a row): {e}",
                    self.name,
                    state.consecutive_failures
                );
                if state.consecutive_failures >= self.policy.failure_threshold {
                    state.cooldown_until = Some(now + self.policy.cooldown);
                    tracing::warn!(
                        "{} probe failed {} times, pausing for {:?}",
                        self.name,
                        state.consecutive_failures,
                        self.policy.cooldown
                    );
                }
            }
        }
        state.last_update = Some(now);
    }

    fn due(&self, state: &mut CacheState<V>, now: Instant) -> bool {
        if let Some(until) = state.cooldown_until {
            if now < until {
                return false;
            }
            state.cooldown_until = None;
            state.consecutive_failures = 0;
            tracing::info!("{} probe cooldown expired, resuming", self.name);
        }

        match state.last_update {
            Some(last) => now.duration_since(last) >= self.policy.min_interval,
            None => true,
        }
    }

    fn dispatch(&self, state: &mut CacheState<V>, now: Instant) {
        if state.jobs.is_none() {
            match spawn_worker(self.name, self.probe.clone()) {
                Ok(jobs) => state.jobs = Some(jobs),
                Err(e) => {
                    self.apply(state, Err(e), now);
                    return;
                }
            }
        }
        let Some(jobs) = state.jobs.as_ref() else {
            return;
        };

        let (reply, pending) = mpsc::channel();
        if jobs.send(reply).is_err() {
            state.jobs = None;
            self.apply(state, Err(Error::Probe("probe worker exited".to_string())), now);
            return;
        }
        state.pending = Some((state.generation, pending));
    }

    /// Drops the cached value and breaker state.
    ///
    /// A probe still running keeps its slot until it finishes, so no second
    /// probe starts alongside it; its result is then discarded.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.value = self.initial.clone();
        state.last_update = None;
        state.consecutive_failures = 0;
        state.cooldown_until = None;
        state.generation += 1;
    }

    pub fn in_flight(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn in_cooldown(&self) -> bool {
        self.lock()
            .cooldown_until
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn policy(&self) -> &ProbePolicy {
        &self.policy
    }

    /// Harvests a finished probe without scheduling another one.
    #[cfg(test)]
    fn harvest(&self) {
        let mut state = self.lock();
        self.collect(&mut state, Instant::now());
    }
}

/// Worker loop: one job at a time until every job sender is gone.
fn spawn_worker<V: ProbeValue>(name: &'static str, probe: ProbeFn<V>) -> Result<Sender<Reply<V>>> {
    let (jobs, queue) = mpsc::channel::<Reply<V>>();

    thread::Builder::new()
        .name(format!("{name}-probe"))
        .spawn(move || {
            for reply in queue {
                let result = run_probe(&*probe);
                // The cache may have been reset or dropped meanwhile
                let _ = reply.send(result);
            }
            tracing::debug!("{name} probe worker stopped");
        })?;

    Ok(jobs)
}

/// Runs the probe, turning a panic into an ordinary failure.
fn run_probe<V>(probe: &(dyn Fn() -> Result<V> + Send + Sync)) -> Result<V> {
    match panic::catch_unwind(AssertUnwindSafe(probe)) {
        Ok(result) => result,
        Err(payload) => Err(Error::Probe(format!(
            "probe panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn policy(min_interval_ms: u64, threshold: u32, cooldown_ms: u64) -> ProbePolicy {
        ProbePolicy {
            min_interval: Duration::from_millis(min_interval_ms),
            failure_threshold: threshold,
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    /// Waits until the in-flight probe has been harvested.
    fn settle<V: ProbeValue>(cache: &ProbeCache<V>) {
        for _ in 0..200 {
            cache.harvest();
            if !cache.in_flight() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("probe never completed");
    }

    #[test]
    fn test_poll_does_not_block_on_slow_probe() {
        let cache = ProbeCache::new("slow", -1.0, policy(0, 3, 1000), || {
            thread::sleep(Duration::from_secs(5));
            Ok(1.0)
        });

        let start = Instant::now();
        assert_eq!(cache.poll(), -1.0);
        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(cache.in_flight());

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        assert_eq!(cache.poll(), -1.0);
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_at_most_one_probe_in_flight() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let cache = ProbeCache::new("single", -1.0, policy(0, 3, 1000), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            Ok(2.0)
        });

        for _ in 0..100 {
            cache.poll();
        }
        thread::sleep(Duration::from_millis(50));
        for _ in 0..100 {
            cache.poll();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_min_interval_gates_dispatch() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let cache = ProbeCache::new("interval", -1.0, policy(60_000, 3, 1000), move || {
            Ok(counter.fetch_add(1, Ordering::SeqCst) as f64)
        });

        cache.poll();
        settle(&cache);
        assert_eq!(cache.poll(), 0.0);
        for _ in 0..10 {
            cache.poll();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!cache.in_flight());
    }

    #[test]
    fn test_cooldown_after_consecutive_failures() {
        let runs = Arc::new(AtomicUsize::new(0));
        let healthy = Arc::new(AtomicBool::new(false));
        let (counter, ok) = (runs.clone(), healthy.clone());
        let cache = ProbeCache::new("breaker", -1.0, policy(0, 2, 300), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            if ok.load(Ordering::SeqCst) {
                Ok(5.0)
            } else {
                Err(Error::Probe("device busy".to_string()))
            }
        });

        cache.poll();
        settle(&cache);
        assert_eq!(cache.consecutive_failures(), 1);
        assert!(!cache.in_cooldown());

        cache.poll();
        settle(&cache);
        assert_eq!(cache.consecutive_failures(), 2);
        assert!(cache.in_cooldown());
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        for _ in 0..20 {
            assert_eq!(cache.poll(), -1.0);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!cache.in_flight());

        thread::sleep(Duration::from_millis(350));
        healthy.store(true, Ordering::SeqCst);
        cache.poll();
        assert_eq!(cache.consecutive_failures(), 0);
        settle(&cache);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(cache.poll(), 5.0);
        assert_eq!(cache.consecutive_failures(), 0);
        assert!(!cache.in_cooldown());
    }

    #[test]
    fn test_failure_keeps_last_good_value() {
        let healthy = Arc::new(AtomicBool::new(true));
        let ok = healthy.clone();
        let cache = ProbeCache::new("retain", -1.0, policy(0, 1, 100), move || {
            if ok.load(Ordering::SeqCst) {
                Ok(1000.0)
            } else {
                Err(Error::Probe("query failed".to_string()))
            }
        });

        cache.poll();
        settle(&cache);
        healthy.store(false, Ordering::SeqCst);
        assert_eq!(cache.poll(), 1000.0);

        settle(&cache);
        assert!(cache.in_cooldown());
        assert_eq!(cache.poll(), 1000.0);
        assert!(!cache.in_flight());

        thread::sleep(Duration::from_millis(150));
        assert_eq!(cache.poll(), 1000.0);
        settle(&cache);
        assert_eq!(cache.consecutive_failures(), 1);
        assert_eq!(cache.poll(), 1000.0);
    }

    #[test]
    fn test_panicking_probe_counts_as_failure() {
        let cache: ProbeCache<f64> = ProbeCache::new("panicky", 7.0, policy(0, 5, 1000), || {
            panic!("driver exploded")
        });

        cache.poll();
        settle(&cache);
        assert!(cache.consecutive_failures() >= 1);
        assert_eq!(cache.poll(), 7.0);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let cache = ProbeCache::new("reset", -1.0, policy(60_000, 3, 1000), || Ok(3.0));
        cache.poll();
        settle(&cache);
        assert_eq!(cache.poll(), 3.0);

        cache.reset();
        assert!(!cache.in_flight());
        assert_eq!(cache.consecutive_failures(), 0);
        // Never updated after a reset, so the next poll dispatches right away
        assert_eq!(cache.poll(), -1.0);
        settle(&cache);
        assert_eq!(cache.poll(), 3.0);
    }

    #[test]
    fn test_reset_waits_for_running_probe() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let (a, p, r) = (active.clone(), peak.clone(), runs.clone());
        let cache = ProbeCache::new("overlap", -1.0, policy(0, 3, 1000), move || {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok((r.fetch_add(1, Ordering::SeqCst) + 1) as f64)
        });

        cache.poll();
        thread::sleep(Duration::from_millis(20));
        cache.reset();
        assert!(cache.in_flight());
        for _ in 0..10 {
            assert_eq!(cache.poll(), -1.0);
        }

        // The run started before the reset never lands in the cache
        settle(&cache);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.poll(), -1.0);
        settle(&cache);
        assert_eq!(cache.poll(), 2.0);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Pair {
        left: f64,
        right: f64,
    }

    impl ProbeValue for Pair {
        fn merge(&mut self, fresh: Self) {
            if fresh.left >= 0.0 {
                self.left = fresh.left;
            }
            if fresh.right >= 0.0 {
                self.right = fresh.right;
            }
        }
    }

    #[test]
    fn test_partial_result_merges_measured_fields() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let initial = Pair {
            left: -1.0,
            right: -1.0,
        };
        let cache = ProbeCache::new("pair", initial, policy(0, 3, 1000), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Pair {
                    left: 10.0,
                    right: 20.0,
                })
            } else {
                Ok(Pair {
                    left: 11.0,
                    right: -1.0,
                })
            }
        });

        cache.poll();
        settle(&cache);
        cache.poll();
        settle(&cache);
        assert_eq!(
            cache.poll(),
            Pair {
                left: 11.0,
                right: 20.0
            }
        );
    }
}
