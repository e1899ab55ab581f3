//! Filter sizing.
//!
//! - m = ceil(-n * ln(p) / (ln 2)^2)
//! - k = max(ceil((m / n) * ln 2), 1)

use std::f64::consts::LN_2;

use crate::errors::DedupError;

/// Sizing derived once from the expected item count and target false-positive rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomParams {
    /// Number of addressable bits (m).
    pub bit_size: u64,
    /// Number of bits set per key (k).
    pub hash_count: u32,
    expected_items: u64,
}

impl BloomParams {
    /// # Errors
    /// [`DedupError::Configuration`] when `expected_items` is zero or
    /// `false_positive_rate` lies outside the open interval (0, 1).
    pub fn new(expected_items: u64, false_positive_rate: f64) -> Result<Self, DedupError> {
        if expected_items == 0 {
            return Err(DedupError::Configuration(
                "expected_items must be at least 1".into(),
            ));
        }
        if !false_positive_rate.is_finite() || false_positive_rate <= 0.0 || false_positive_rate >= 1.0 {
            return Err(DedupError::Configuration(format!(
                "false_positive_rate must be in (0, 1), got {}",
                false_positive_rate
            )));
        }

        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / (LN_2 * LN_2)).ceil();
        let k = ((m / n) * LN_2).ceil().max(1.0);

        Ok(Self {
            bit_size: m as u64,
            hash_count: k as u32,
            expected_items,
        })
    }

    pub fn expected_items(&self) -> u64 {
        self.expected_items
    }

    /// Size of the backing bit array in bytes.
    pub fn memory_bytes(&self) -> u64 {
        self.bit_size / 8
    }

    /// Theoretical false-positive rate after `inserted` distinct keys:
    /// (1 - e^(-k*n/m))^k
    pub fn estimated_fpr(&self, inserted: u64) -> f64 {
        if inserted == 0 {
            return 0.0;
        }
        let k = self.hash_count as f64;
        let exponent = -k * inserted as f64 / self.bit_size as f64;
        (1.0 - exponent.exp()).powf(k)
    }
}
