pub mod dragonfly;
pub mod memory;

use async_trait::async_trait;

use crate::errors::StoreError;

pub use dragonfly::{REDIS_MAX_BITS, RedisBitStore};
pub use memory::MemoryBitStore;

/// A remote bit-addressable store (Redis, Dragonfly, ...).
///
/// Keys are allocated lazily as all-zero bit arrays on first touch. Each
/// batch method is expected to cost a single pipelined round trip.
#[async_trait]
pub trait BitStore: Send + Sync {
    /// Reads the bits at `offsets`, returned in the same order.
    async fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>, StoreError>;

    /// Sets every bit at `offsets` to 1 and (re)applies a `ttl_secs` expiry to `key`.
    async fn set_bits(&self, key: &str, offsets: &[u64], ttl_secs: u64) -> Result<(), StoreError>;

    /// Re-issues a `ttl_secs` expiry on `key`. Repeating the call is harmless.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;

    /// Largest bit array a single key can hold, `None` when unbounded.
    fn max_bits(&self) -> Option<u64> {
        None
    }
}
