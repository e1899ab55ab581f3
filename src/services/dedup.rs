//! Rotating, breaker-guarded Bloom filter over a remote bit store.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::breaker::BreakerConfig;
use crate::config::filter::FilterConfig;
use crate::errors::{DedupError, StoreError, StorePhase};
use crate::services::bloom::{BloomHasher, BloomParams};
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::metrics;
use crate::services::storage::BitStore;

/// Counters since the filter was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterStats {
    pub checks: u64,
    /// Probable duplicates.
    pub hits: u64,
    /// First sightings, including degraded "assume new" answers.
    pub misses: u64,
    /// Answers produced without consulting the store.
    pub degraded: u64,
}

impl FilterStats {
    pub fn hit_ratio(&self) -> f64 {
        if self.checks == 0 {
            return 0.0;
        }
        self.hits as f64 / self.checks as f64
    }
}

pub struct DedupFilter<S: BitStore, C: Clock = SystemClock> {
    store: Arc<S>,
    breaker: Arc<CircuitBreaker>,
    hasher: BloomHasher,
    params: BloomParams,
    config: FilterConfig,
    base_timeout: Duration,
    clock: C,
    checks: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    degraded: AtomicU64,
    closed: AtomicBool,
}

impl<S: BitStore> DedupFilter<S, SystemClock> {
    /// # Errors
    /// [`DedupError::Configuration`] when the filter cannot be sized from `config`.
    pub fn new(
        config: FilterConfig,
        breaker: &BreakerConfig,
        store: Arc<S>,
        base_timeout: Duration,
    ) -> Result<Self, DedupError> {
        Self::with_clock(config, breaker, store, base_timeout, SystemClock)
    }
}

impl<S: BitStore, C: Clock> DedupFilter<S, C> {
    /// # Errors
    /// [`DedupError::Configuration`] when the filter cannot be sized from `config`
    /// or needs more bits than `store` can hold under one key.
    pub fn with_clock(
        config: FilterConfig,
        breaker: &BreakerConfig,
        store: Arc<S>,
        base_timeout: Duration,
        clock: C,
    ) -> Result<Self, DedupError> {
        let params = BloomParams::new(config.expected_items, config.false_positive_rate)?;
        if config.ttl_secs == 0 {
            return Err(DedupError::Configuration("ttl_secs must be at least 1".into()));
        }
        if let Some(max_bits) = store.max_bits()
            && params.bit_size > max_bits
        {
            return Err(DedupError::Configuration(format!(
                "filter needs {} bits for {} items at rate {}, store allows {} per key",
                params.bit_size, config.expected_items, config.false_positive_rate, max_bits
            )));
        }

        info!(
            expected_items = config.expected_items,
            false_positive_rate = config.false_positive_rate,
            bit_size = params.bit_size,
            hash_count = params.hash_count,
            memory_bytes = params.memory_bytes(),
            key_prefix = %config.key_prefix,
            enable_degrade = config.enable_degrade,
            "Dedup filter sized"
        );

        Ok(Self {
            store,
            breaker: Arc::new(CircuitBreaker::new(breaker)),
            hasher: BloomHasher::new(&params),
            params,
            config,
            base_timeout,
            clock,
            checks: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn params(&self) -> &BloomParams {
        &self.params
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// `{key_prefix}{YYYY-MM-DD}` for the UTC day containing `at`.
    pub fn filter_key_at(&self, at: DateTime<Utc>) -> String {
        format!("{}{}", self.config.key_prefix, at.format("%Y-%m-%d"))
    }

    pub fn current_filter_key(&self) -> String {
        self.filter_key_at(self.clock.now())
    }

    /// Deadline for one pipelined batch: `base_timeout * (hash_count + 1)`.
    pub fn round_trip_timeout(&self) -> Duration {
        self.base_timeout * (self.params.hash_count + 1)
    }

    /// Returns `Ok(true)` the first time `item_key` is seen in the current
    /// rotation period and `Ok(false)` when it is probably a duplicate.
    ///
    /// Two concurrent first-time checks of the same key may both return `true`.
    /// In degrade mode a write failure after a successful read also returns
    /// `true` without setting the bits, so duplicates are under-counted for
    /// the length of the outage.
    ///
    /// # Errors
    /// - [`DedupError::BreakerOpen`] when the breaker rejects the call and degrade is off.
    /// - [`DedupError::StoreUnavailable`] when a round trip fails and degrade is off.
    /// - [`DedupError::Closed`] after [`close`](Self::close).
    pub async fn check_and_set(&self, item_key: &str) -> Result<bool, DedupError> {
        self.check_and_set_with_cancel(item_key, std::future::pending()).await
    }

    /// Like [`check_and_set`](Self::check_and_set), aborting the in-flight round
    /// trip when `cancel` resolves. A cancelled round trip counts as a store failure.
    ///
    /// # Errors
    /// See [`check_and_set`](Self::check_and_set).
    pub async fn check_and_set_with_cancel<F>(&self, item_key: &str, cancel: F) -> Result<bool, DedupError>
    where
        F: Future<Output = ()>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(DedupError::Closed);
        }
        self.checks.fetch_add(1, Ordering::Relaxed);

        if !self.breaker.can_execute() {
            if self.config.enable_degrade {
                warn!(item_key, "Circuit breaker open, assuming new");
                return Ok(self.assume_new());
            }
            metrics::record_check("rejected");
            return Err(DedupError::BreakerOpen);
        }

        let filter_key = self.current_filter_key();
        let offsets = self.hasher.offsets(item_key.as_bytes());
        let mut cancel = pin!(cancel);

        let bits = match self
            .bounded(self.store.get_bits(&filter_key, &offsets), cancel.as_mut())
            .await
        {
            Ok(bits) => bits,
            Err(e) => return self.store_failed(&filter_key, item_key, StorePhase::Read, e),
        };

        if bits.iter().all(|&bit| bit) {
            self.breaker.record_success();
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_check("hit");
            return Ok(false);
        }

        if let Err(e) = self
            .bounded(
                self.store.set_bits(&filter_key, &offsets, self.config.ttl_secs),
                cancel.as_mut(),
            )
            .await
        {
            return self.store_failed(&filter_key, item_key, StorePhase::Write, e);
        }

        self.breaker.record_success();
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_check("miss");
        Ok(true)
    }

    /// Re-applies the configured ttl to the current filter key.
    ///
    /// # Errors
    /// [`DedupError::StoreUnavailable`] with phase `Expire` when the round trip fails.
    pub async fn refresh_expiry(&self) -> Result<(), DedupError> {
        let filter_key = self.current_filter_key();
        self.bounded(
            self.store.expire(&filter_key, self.config.ttl_secs),
            pin!(std::future::pending::<()>()),
        )
        .await
        .map_err(|e| DedupError::store(filter_key, StorePhase::Expire, e))
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            checks: self.checks.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    pub fn memory_usage_bytes(&self) -> u64 {
        self.params.memory_bytes()
    }

    /// Logs the final stats and breaker state, then closes the store.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    /// [`DedupError::StoreUnavailable`] with phase `Close` when the store fails to shut down.
    pub async fn close(&self) -> Result<(), DedupError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let stats = self.stats();
        let inserted = stats.misses.saturating_sub(stats.degraded);
        let breaker = self.breaker.snapshot();
        info!(
            checks = stats.checks,
            hits = stats.hits,
            misses = stats.misses,
            degraded = stats.degraded,
            hit_ratio = stats.hit_ratio(),
            estimated_fpr = self.params.estimated_fpr(inserted),
            target_fpr = self.config.false_positive_rate,
            breaker_state = %breaker.state,
            breaker_transitions = breaker.transitions,
            "Dedup filter closed"
        );
        if inserted > self.params.expected_items() {
            warn!(
                inserted,
                expected_items = self.params.expected_items(),
                "Filter saw more insertions than it was sized for; false-positive rate above target"
            );
        }

        self.store
            .close()
            .await
            .map_err(|e| DedupError::store(self.config.key_prefix.clone(), StorePhase::Close, e))
    }

    fn assume_new(&self) -> bool {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.degraded.fetch_add(1, Ordering::Relaxed);
        metrics::record_check("degraded");
        true
    }

    fn store_failed(
        &self,
        filter_key: &str,
        item_key: &str,
        phase: StorePhase,
        error: StoreError,
    ) -> Result<bool, DedupError> {
        self.breaker.record_failure();
        if self.config.enable_degrade {
            warn!(filter_key, item_key, phase = %phase, error = %error, "Bit store unavailable, assuming new");
            return Ok(self.assume_new());
        }
        metrics::record_check("rejected");
        Err(DedupError::store(filter_key, phase, error))
    }

    async fn bounded<T, Op, F>(&self, op: Op, cancel: Pin<&mut F>) -> Result<T, StoreError>
    where
        Op: Future<Output = Result<T, StoreError>>,
        F: Future<Output = ()>,
    {
        let deadline = self.round_trip_timeout();
        tokio::select! {
            biased;
            _ = cancel => Err(StoreError::cancelled()),
            res = tokio::time::timeout(deadline, op) => match res {
                Ok(result) => result,
                Err(_) => Err(StoreError::timeout(format!("round trip exceeded {:?}", deadline))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::services::storage::{MemoryBitStore, REDIS_MAX_BITS};
    use chrono::TimeZone;
    use test_case::test_case;

    fn filter(n: u64) -> DedupFilter<MemoryBitStore, MockClock> {
        let config = FilterConfig {
            expected_items: n,
            ..FilterConfig::default()
        };
        let clock = MockClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap());
        DedupFilter::with_clock(
            config,
            &BreakerConfig::default(),
            Arc::new(MemoryBitStore::new()),
            Duration::from_millis(50),
            clock,
        )
        .unwrap()
    }

    #[test]
    fn test_filter_key_format() {
        let f = filter(10);
        assert_eq!(f.current_filter_key(), "bloom:2026-10-18");
        let at = Utc.with_ymd_and_hms(2027, 1, 2, 23, 59, 59).unwrap();
        assert_eq!(f.filter_key_at(at), "bloom:2027-01-02");
    }

    #[test]
    fn test_round_trip_timeout_scales_with_hash_count() {
        let f = filter(10);
        assert_eq!(f.params().hash_count, 7);
        assert_eq!(f.round_trip_timeout(), Duration::from_millis(400));
    }

    #[test]
    fn test_memory_usage() {
        let f = filter(10);
        assert_eq!(f.memory_usage_bytes(), 12);
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = FilterConfig {
            expected_items: 0,
            ..FilterConfig::default()
        };
        let res = DedupFilter::new(
            config,
            &BreakerConfig::default(),
            Arc::new(MemoryBitStore::new()),
            Duration::from_millis(50),
        );
        assert!(matches!(res, Err(DedupError::Configuration(_))));
    }

    fn sized_for(store: MemoryBitStore, expected_items: u64) -> Result<DedupFilter<MemoryBitStore>, DedupError> {
        let config = FilterConfig {
            expected_items,
            false_positive_rate: 0.01,
            ..FilterConfig::default()
        };
        DedupFilter::new(config, &BreakerConfig::default(), Arc::new(store), Duration::from_millis(50))
    }

    // 500M items at 1% needs ~4.79e9 bits, 400M needs ~3.83e9
    #[test_case(500_000_000, false ; "beyond redis bit limit")]
    #[test_case(400_000_000, true ; "within redis bit limit")]
    #[test_case(1_000_000, true ; "default sized filter")]
    fn test_filter_size_checked_against_store_limit(expected_items: u64, accepted: bool) {
        let res = sized_for(MemoryBitStore::with_max_bits(REDIS_MAX_BITS), expected_items);
        match res {
            Ok(f) => {
                assert!(accepted, "{} items should not fit", expected_items);
                assert!(f.params().bit_size <= REDIS_MAX_BITS);
            }
            Err(DedupError::Configuration(msg)) => {
                assert!(!accepted, "{} items rejected: {}", expected_items, msg);
                assert!(msg.contains(&REDIS_MAX_BITS.to_string()));
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unbounded_store_accepts_large_filter() {
        let f = sized_for(MemoryBitStore::new(), 500_000_000).unwrap();
        assert!(f.params().bit_size > REDIS_MAX_BITS);
    }

    #[tokio::test]
    async fn test_breaker_open_degrade_is_counted() {
        metrics::init_metrics();
        let degraded = || metrics::CHECKS.get().unwrap().with_label_values(&["degraded"]).get();
        let config = FilterConfig {
            expected_items: 1_000,
            enable_degrade: true,
            ..FilterConfig::default()
        };
        let store = Arc::new(MemoryBitStore::new());
        let f = DedupFilter::new(config, &BreakerConfig::default(), Arc::clone(&store), Duration::from_millis(50))
            .unwrap();
        f.breaker().trip();

        let before = degraded();
        for i in 0..10 {
            assert!(f.check_and_set(&format!("evt-{}", i)).await.unwrap());
        }
        assert!(degraded() - before >= 10);
        assert_eq!(f.stats().degraded, 10);
        assert_eq!(store.round_trips(), 0);
    }

    #[tokio::test]
    async fn test_first_check_new_second_duplicate() {
        let f = filter(1_000);
        assert!(f.check_and_set("evt-1").await.unwrap());
        assert!(!f.check_and_set("evt-1").await.unwrap());
        assert_eq!(
            f.stats(),
            FilterStats { checks: 2, hits: 1, misses: 1, degraded: 0 }
        );
    }
}
