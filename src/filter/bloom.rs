//! Fixed-size Bloom filter.

use sha2::{Digest, Sha256};
use std::f64::consts::LN_2;

const MIN_FALSE_POSITIVE_RATE: f64 = 1e-9;
const MAX_FALSE_POSITIVE_RATE: f64 = 0.5;

/// Probabilistic set membership with no false negatives.
///
/// Sized once from `(expected_items, false_positive_rate)`; never resized.
/// Inserting more than `expected_items` keys only raises the false-positive
/// rate, it never produces a false negative.
#[derive(Debug, Clone)]
pub struct MembershipFilter {
  bits: Vec<u64>,
  num_bits: u64,
  hash_count: u32,
  inserted: usize,
}

impl MembershipFilter {
  /// Create a filter. Out of range parameters are clamped.
  pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
    let n = expected_items.max(1) as f64;
    let p = if false_positive_rate.is_nan() {
      MAX_FALSE_POSITIVE_RATE
    } else {
      false_positive_rate.clamp(MIN_FALSE_POSITIVE_RATE, MAX_FALSE_POSITIVE_RATE)
    };

    let num_bits = (-(n * p.ln()) / (LN_2 * LN_2)).ceil().max(64.0) as u64;
    let hash_count = ((num_bits as f64 / n) * LN_2).round().max(1.0) as u32;
    let words = num_bits.div_ceil(64) as usize;

    Self {
      bits: vec![0; words],
      num_bits,
      hash_count,
      inserted: 0,
    }
  }

  pub fn num_bits(&self) -> u64 {
    self.num_bits
  }

  pub fn hash_count(&self) -> u32 {
    self.hash_count
  }

  /// Number of `add` calls so far.
  pub fn inserted(&self) -> usize {
    self.inserted
  }

  pub fn add(&mut self, key: &str) {
    let (h1, h2) = Self::hash_pair(key);
    for i in 0..self.hash_count {
      let bit = self.index(h1, h2, i);
      self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
    }
    self.inserted += 1;
  }

  /// False means `key` was definitely never added. True means probably added.
  pub fn test(&self, key: &str) -> bool {
    let (h1, h2) = Self::hash_pair(key);
    (0..self.hash_count).all(|i| {
      let bit = self.index(h1, h2, i);
      self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0
    })
  }

  /// Double hashing: the i-th hash is `h1 + i * h2`.
  fn index(&self, h1: u64, h2: u64, i: u32) -> u64 {
    h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.num_bits
  }

  fn hash_pair(key: &str) -> (u64, u64) {
    let digest = Sha256::digest(key.as_bytes());
    let mut first = [0u8; 8];
    let mut second = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    second.copy_from_slice(&digest[8..16]);
    // Odd step so successive probes never collapse onto one bit
    (u64::from_le_bytes(first), u64::from_le_bytes(second) | 1)
  }
}
