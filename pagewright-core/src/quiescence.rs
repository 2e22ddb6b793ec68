//! Quiescence detection for bursts of concurrent work.
//!
//! Three pieces cooperate here:
//!
//! - [`CountingGate`] counts in-flight units of work and signals the first
//!   time the count drains back to zero.
//! - [`RestartableDeadline`] fires once a fixed period passes without a
//!   restart. It bounds inactivity, not total build time.
//! - [`IdleMonitor`] polls an activity flag and drives the externally
//!   visible [`IdleSignal`] that read-only queries wait on.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("counting gate decremented below zero")]
    Underflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no activity for {0:?}")]
pub struct DeadlineElapsed(pub Duration);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Pending,
    Drained,
    Violated,
}

/// Counts outstanding work and signals when it has drained
#[derive(Debug)]
pub struct CountingGate {
    count: Mutex<usize>,
    state: watch::Sender<GateState>,
}

impl Default for CountingGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Pending);
        Self {
            count: Mutex::new(0),
            state,
        }
    }

    pub fn increment(&self) {
        *self.count.lock() += 1;
    }

    /// Release one unit of work.
    ///
    /// Going below zero is an invariant violation: it is reported to every
    /// waiter instead of being clamped.
    pub fn decrement(&self) -> Result<(), GateError> {
        let mut count = self.count.lock();
        if *count == 0 {
            tracing::error!("counting gate decremented below zero");
            self.state.send_replace(GateState::Violated);
            return Err(GateError::Underflow);
        }
        *count -= 1;
        if *count == 0 {
            self.state.send_if_modified(|state| {
                if *state == GateState::Pending {
                    *state = GateState::Drained;
                    true
                } else {
                    false
                }
            });
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Whether the completion signal has fired
    pub fn is_drained(&self) -> bool {
        *self.state.borrow() == GateState::Drained
    }

    /// Wait for the count to return to zero
    pub async fn drained(&self) -> Result<(), GateError> {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let state = match rx.wait_for(|state| *state != GateState::Pending).await {
            Ok(state) => *state,
            Err(_) => GateState::Violated,
        };
        match state {
            GateState::Violated => Err(GateError::Underflow),
            _ => Ok(()),
        }
    }
}

/// A timer of fixed period that can be pushed back
#[derive(Debug)]
pub struct RestartableDeadline {
    period: Duration,
    deadline: Mutex<Instant>,
}

impl RestartableDeadline {
    /// Create a deadline that is already running
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: Mutex::new(Instant::now() + period),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Reset the timer to a full period from now
    pub fn restart(&self) {
        *self.deadline.lock() = Instant::now() + self.period;
    }

    /// Resolve once a full period elapses without a restart
    pub async fn expired(&self) -> DeadlineElapsed {
        loop {
            let target = *self.deadline.lock();
            tokio::time::sleep_until(target).await;
            if *self.deadline.lock() <= Instant::now() {
                return DeadlineElapsed(self.period);
            }
        }
    }
}

/// Observable "no work is arriving" flag shared with queries
#[derive(Debug, Clone)]
pub struct IdleSignal(Arc<watch::Sender<bool>>);

impl Default for IdleSignal {
    fn default() -> Self {
        let (tx, _) = watch::channel(true);
        Self(Arc::new(tx))
    }
}

impl IdleSignal {
    pub fn set(&self, idle: bool) {
        self.0.send_if_modified(|current| {
            let changed = *current != idle;
            *current = idle;
            changed
        });
    }

    pub fn is_idle(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }
}

/// Flips the idle signal based on recent activity
#[derive(Debug)]
pub struct IdleMonitor {
    activity: AtomicBool,
    signal: IdleSignal,
}

impl IdleMonitor {
    pub fn new(signal: IdleSignal) -> Self {
        Self {
            activity: AtomicBool::new(false),
            signal,
        }
    }

    /// Note that a unit of work just completed
    pub fn mark_active(&self) {
        self.activity.store(true, Ordering::Release);
    }

    /// Poll every `interval`: any activity since the last tick clears the
    /// idle signal, a quiet tick sets it.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let busy = monitor.activity.swap(false, Ordering::AcqRel);
                monitor.signal.set(!busy);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_fires_once_after_balanced_calls() {
        let gate = Arc::new(CountingGate::new());
        for _ in 0..3 {
            gate.increment();
        }
        assert!(!gate.is_drained());

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.drained().await })
        };

        gate.decrement().unwrap();
        gate.increment();
        gate.decrement().unwrap();
        gate.decrement().unwrap();
        assert!(!gate.is_drained());
        gate.decrement().unwrap();

        assert!(waiter.await.unwrap().is_ok());
        assert!(gate.is_drained());
        assert_eq!(gate.count(), 0);
    }

    #[tokio::test]
    async fn test_gate_underflow_is_reported() {
        let gate = CountingGate::new();
        assert_eq!(gate.decrement(), Err(GateError::Underflow));
        assert_eq!(gate.drained().await, Err(GateError::Underflow));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_after_period() {
        let deadline = RestartableDeadline::new(Duration::from_millis(100));
        let started = Instant::now();
        let elapsed = deadline.expired().await;
        assert_eq!(elapsed.0, Duration::from_millis(100));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_restart_postpones_expiry() {
        let deadline = Arc::new(RestartableDeadline::new(Duration::from_millis(100)));
        let started = Instant::now();

        let restarter = {
            let deadline = Arc::clone(&deadline);
            tokio::spawn(async move {
                for _ in 0..5 {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    deadline.restart();
                }
            })
        };

        deadline.expired().await;
        restarter.await.unwrap();
        // Last restart happens at 300ms, so expiry lands at 400ms
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_monitor_tracks_activity() {
        let signal = IdleSignal::default();
        signal.set(false);
        let monitor = Arc::new(IdleMonitor::new(signal.clone()));
        let task = monitor.spawn(Duration::from_millis(50));

        monitor.mark_active();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!signal.is_idle());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(signal.is_idle());

        task.abort();
    }
}
