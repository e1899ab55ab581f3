use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use super::params::BloomParams;

/// Appended to the key before computing the second base hash.
const SALT_SUFFIX: &[u8] = b"#bloomguard-h2";

/// Maps keys to bit offsets with double hashing: `(h1 + i * h2) mod m`.
#[derive(Debug, Clone, Copy)]
pub struct BloomHasher {
    bit_size: u64,
    hash_count: u32,
}

impl BloomHasher {
    pub fn new(params: &BloomParams) -> Self {
        Self {
            bit_size: params.bit_size,
            hash_count: params.hash_count,
        }
    }

    #[inline]
    pub fn base_hashes(key: &[u8]) -> (u64, u64) {
        let h1 = xxh3_64(key);
        let mut salted = Xxh3::new();
        salted.update(key);
        salted.update(SALT_SUFFIX);
        (h1, salted.digest())
    }

    #[inline(always)]
    fn offset_from(&self, h1: u64, h2: u64, index: u32) -> u64 {
        h1.wrapping_add((index as u64).wrapping_mul(h2)) % self.bit_size
    }

    /// All `hash_count` offsets for `key`, in hash index order.
    pub fn offsets(&self, key: &[u8]) -> Vec<u64> {
        let (h1, h2) = Self::base_hashes(key);
        (0..self.hash_count)
            .map(|i| self.offset_from(h1, h2, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn hasher(n: u64, p: f64) -> BloomHasher {
        BloomHasher::new(&BloomParams::new(n, p).unwrap())
    }

    #[test]
    fn test_offsets_within_bit_size() {
        let h = hasher(10, 0.01);
        for i in 0..1_000 {
            let key = format!("msg-{}", i);
            let offsets = h.offsets(key.as_bytes());
            assert_eq!(offsets.len(), 7);
            assert!(offsets.iter().all(|&o| o < 96));
        }
    }

    #[test]
    fn test_offsets_are_deterministic() {
        let h = hasher(1_000, 0.01);
        assert_eq!(h.offsets(b"order:42"), h.offsets(b"order:42"));
        let (h1, h2) = BloomHasher::base_hashes(b"order:42");
        for (i, &offset) in h.offsets(b"order:42").iter().enumerate() {
            assert_eq!(offset, h1.wrapping_add((i as u64).wrapping_mul(h2)) % h.bit_size);
        }
    }

    #[test]
    fn test_base_hashes_are_independent() {
        let (h1, h2) = BloomHasher::base_hashes(b"payment-7781");
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_distinct_keys_touch_distinct_bits() {
        let h = hasher(100_000, 0.01);
        let a: HashSet<u64> = h.offsets(b"alpha").into_iter().collect();
        let b: HashSet<u64> = h.offsets(b"beta").into_iter().collect();
        assert!(a != b);
    }

    #[test]
    fn test_bits_spread_across_array() {
        let h = hasher(1_000, 0.01);
        let mut touched = HashSet::new();
        for i in 0..1_000 {
            touched.extend(h.offsets(format!("k{}", i).as_bytes()));
        }
        // 7 000 offsets into ~9 600 bits, roughly half of them set
        assert!(touched.len() as u64 > h.bit_size / 3);
    }
}
