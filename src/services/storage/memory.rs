use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::BitStore;
use crate::errors::StoreError;

#[derive(Debug, Default)]
struct BitArray {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl BitArray {
    fn get(&self, offset: u64) -> bool {
        let byte = (offset / 8) as usize;
        // Redis addresses bits from the most significant end of each byte
        let mask = 0x80u8 >> (offset % 8);
        self.bytes.get(byte).is_some_and(|b| b & mask != 0)
    }

    fn set(&mut self, offset: u64) {
        let byte = (offset / 8) as usize;
        if byte >= self.bytes.len() {
            self.bytes.resize(byte + 1, 0);
        }
        self.bytes[byte] |= 0x80u8 >> (offset % 8);
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process bit store with Redis-like lazy allocation and expiry.
///
/// Used for local runs without a server and for tests, which can inject
/// failures and latency to drive the circuit breaker.
#[derive(Debug, Default)]
pub struct MemoryBitStore {
    keys: Mutex<HashMap<String, BitArray>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    latency_ms: AtomicU64,
    round_trips: AtomicU64,
    closed: AtomicBool,
    max_bits: Option<u64>,
}

impl MemoryBitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that advertises the same per-key limit as a server, e.g. [`super::REDIS_MAX_BITS`].
    pub fn with_max_bits(limit: u64) -> Self {
        Self {
            max_bits: Some(limit),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay applied before every round trip.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of round trips attempted, including failed ones.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.keys.lock().get(key).is_some_and(|a| !a.is_expired(now))
    }

    /// Remaining time to live of `key`, `None` if absent or without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.keys
            .lock()
            .get(key)
            .filter(|a| !a.is_expired(now))
            .and_then(|a| a.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn count_set_bits(&self, key: &str) -> u64 {
        self.keys
            .lock()
            .get(key)
            .map(|a| a.bytes.iter().map(|b| b.count_ones() as u64).sum())
            .unwrap_or(0)
    }

    async fn round_trip(&self, fail: &AtomicBool, op: &str) -> Result<(), StoreError> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::connection("store closed"));
        }
        if fail.load(Ordering::SeqCst) {
            return Err(StoreError::connection(format!("injected {} failure", op)));
        }
        Ok(())
    }

    fn with_live_key<R>(&self, key: &str, f: impl FnOnce(&mut BitArray) -> R) -> R {
        let now = Instant::now();
        let mut keys = self.keys.lock();
        if keys.get(key).is_some_and(|a| a.is_expired(now)) {
            keys.remove(key);
        }
        f(keys.entry(key.to_string()).or_default())
    }
}

#[async_trait]
impl BitStore for MemoryBitStore {
    async fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>, StoreError> {
        self.round_trip(&self.fail_reads, "read").await?;
        let now = Instant::now();
        let keys = self.keys.lock();
        Ok(match keys.get(key).filter(|a| !a.is_expired(now)) {
            Some(array) => offsets.iter().map(|&o| array.get(o)).collect(),
            None => vec![false; offsets.len()],
        })
    }

    async fn set_bits(&self, key: &str, offsets: &[u64], ttl_secs: u64) -> Result<(), StoreError> {
        self.round_trip(&self.fail_writes, "write").await?;
        if let Some(limit) = self.max_bits
            && let Some(&offset) = offsets.iter().find(|&&o| o >= limit)
        {
            return Err(StoreError::command(format!("bit offset {} out of range", offset)));
        }
        self.with_live_key(key, |array| {
            for &offset in offsets {
                array.set(offset);
            }
            array.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        });
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.round_trip(&self.fail_writes, "expire").await?;
        let now = Instant::now();
        let mut keys = self.keys.lock();
        // EXPIRE on a missing key is a no-op, as in Redis
        if let Some(array) = keys.get_mut(key).filter(|a| !a.is_expired(now)) {
            array.expires_at = Some(now + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn max_bits(&self) -> Option<u64> {
        self.max_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_key_reads_as_zero() {
        let store = MemoryBitStore::new();
        let bits = store.get_bits("bloom:2026-01-01", &[0, 7, 4096]).await.unwrap();
        assert_eq!(bits, vec![false, false, false]);
        assert!(!store.contains_key("bloom:2026-01-01"));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryBitStore::new();
        store.set_bits("k", &[1, 9, 300], 60).await.unwrap();
        let bits = store.get_bits("k", &[0, 1, 9, 300, 301]).await.unwrap();
        assert_eq!(bits, vec![false, true, true, true, false]);
        assert_eq!(store.count_set_bits("k"), 3);
        assert!(store.ttl("k").unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryBitStore::new();
        store.set_fail_reads(true);
        assert!(store.get_bits("k", &[1]).await.is_err());
        store.set_fail_reads(false);
        store.set_fail_writes(true);
        assert!(store.set_bits("k", &[1], 60).await.is_err());
        assert_eq!(store.round_trips(), 2);
    }

    #[tokio::test]
    async fn test_bounded_store_rejects_out_of_range_offsets() {
        let store = MemoryBitStore::with_max_bits(64);
        assert_eq!(store.max_bits(), Some(64));
        assert_eq!(MemoryBitStore::new().max_bits(), None);

        let err = store.set_bits("k", &[3, 64], 60).await.unwrap_err();
        assert_eq!(err.kind, crate::errors::StoreErrorKind::Command);
        assert_eq!(store.count_set_bits("k"), 0);
        store.set_bits("k", &[63], 60).await.unwrap();
        assert_eq!(store.count_set_bits("k"), 1);
    }

    #[tokio::test]
    async fn test_expire_missing_key_is_noop() {
        let store = MemoryBitStore::new();
        store.expire("missing", 60).await.unwrap();
        assert!(!store.contains_key("missing"));
        assert_eq!(store.ttl("missing"), None);
    }
}
