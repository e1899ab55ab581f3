//! Three-state circuit breaker guarding bit store calls.
//!
//! ```text
//! Closed --(failure_threshold failures)--> Open
//! Open --(open_timeout elapsed, next can_execute)--> HalfOpen
//! HalfOpen --(success_threshold successes)--> Closed
//! HalfOpen --(any failure)--> Open
//! ```
//!
//! The state and the time it was entered share one `AtomicU64`, and every
//! transition is a single `compare_exchange` on that word, so when several
//! callers cross a threshold at once only one of them applies the transition
//! and no caller can observe a new state with a stale stamp. Counters are
//! reset by the winner.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::breaker::BreakerConfig;
use crate::services::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the breaker, for stats and shutdown logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub transitions: u64,
    pub since_last_change: Duration,
}

pub struct CircuitBreaker {
    /// State in the low two bits, nanoseconds since `epoch` of the last change above them.
    status: AtomicU64,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    transitions: AtomicU64,
    epoch: Instant,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
}

const STATE_BITS: u32 = 2;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

#[inline]
fn pack(state: BreakerState, changed_at: u64) -> u64 {
    (changed_at << STATE_BITS) | state as u64
}

#[inline]
fn unpack(status: u64) -> (BreakerState, u64) {
    (BreakerState::from_u8((status & STATE_MASK) as u8), status >> STATE_BITS)
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self::with_thresholds(
            config.failure_threshold,
            config.success_threshold,
            config.open_timeout(),
        )
    }

    pub fn with_thresholds(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            status: AtomicU64::new(pack(BreakerState::Closed, 0)),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            transitions: AtomicU64::new(0),
            epoch: Instant::now(),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_timeout,
        }
    }

    #[inline]
    pub fn state(&self) -> BreakerState {
        unpack(self.status.load(Ordering::Acquire)).0
    }

    /// Whether a store call may proceed. May move Open to HalfOpen.
    pub fn can_execute(&self) -> bool {
        let status = self.status.load(Ordering::Acquire);
        match unpack(status) {
            (BreakerState::Closed | BreakerState::HalfOpen, _) => true,
            (BreakerState::Open, changed_at) => {
                if self.elapsed_since(changed_at) <= self.open_timeout {
                    return false;
                }
                if self.transition(status, BreakerState::HalfOpen) {
                    return true;
                }
                // Lost the race; follow whoever won.
                self.state() != BreakerState::Open
            }
        }
    }

    pub fn record_success(&self) {
        let status = self.status.load(Ordering::Acquire);
        match unpack(status).0 {
            BreakerState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            BreakerState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.success_threshold {
                    self.transition(status, BreakerState::Closed);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let status = self.status.load(Ordering::Acquire);
        match unpack(status).0 {
            BreakerState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold {
                    self.transition(status, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                self.transition(status, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    /// Forces the breaker Open from any state, restarting the open timeout.
    pub fn trip(&self) {
        loop {
            let status = self.status.load(Ordering::Acquire);
            if unpack(status).0 == BreakerState::Open {
                let restamped = pack(BreakerState::Open, self.now_nanos());
                if self
                    .status
                    .compare_exchange(status, restamped, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
            } else if self.transition(status, BreakerState::Open) {
                return;
            }
        }
    }

    /// Forces the breaker Closed from any state.
    pub fn reset(&self) {
        loop {
            let status = self.status.load(Ordering::Acquire);
            if unpack(status).0 == BreakerState::Closed || self.transition(status, BreakerState::Closed) {
                return;
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (state, changed_at) = unpack(self.status.load(Ordering::Acquire));
        BreakerSnapshot {
            state,
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            transitions: self.transitions.load(Ordering::Acquire),
            since_last_change: self.elapsed_since(changed_at),
        }
    }

    fn elapsed_since(&self, changed_at: u64) -> Duration {
        Duration::from_nanos(self.now_nanos().saturating_sub(changed_at))
    }

    #[inline]
    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Swaps `expected` for `to` stamped with the current time, so state and
    /// stamp change together. Returns `true` for the winning caller.
    fn transition(&self, expected: u64, to: BreakerState) -> bool {
        let from = unpack(expected).0;
        if self
            .status
            .compare_exchange(expected, pack(to, self.now_nanos()), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.transitions.fetch_add(1, Ordering::AcqRel);
        metrics::record_breaker_transition(to.as_str());

        match to {
            BreakerState::Open => warn!(from = %from, to = %to, "Circuit breaker opened"),
            _ => info!(from = %from, to = %to, "Circuit breaker state changed"),
        }
        true
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(&BreakerConfig::default())
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("snapshot", &self.snapshot())
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("open_timeout", &self.open_timeout)
            .finish()
    }
}
