//! A fixed-size bloom filter over byte strings, sized once from the number of
//! items it's expected to hold.
//!
//! Each item is hashed twice with differently seeded hashes, and the
//! `hashes` bit positions are `h1 + i * h2` (mod the bit count) for
//! `i` in `0..hashes`. A filter that holds more items than it was sized for
//! keeps working; it just answers "maybe" more often.

/// The false positive rate each filter is sized for
pub(crate) const FALSE_POSITIVE_RATE: f64 = 0.01;

const MAX_HASHES: u32 = 16;
const MIN_BITS: f64 = 1024.0;

#[derive(Debug, Clone)]
pub(crate) struct BloomFilter {
    words: Vec<u64>,
    bit_count: u64,
    hashes: u32,
}

impl BloomFilter {
    /// A filter sized to hold `expected` items with the given false positive
    /// rate
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn with_capacity(expected: u64, false_positive_rate: f64) -> Self {
        let n = expected.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let bits = (-n * false_positive_rate.ln() / (ln2 * ln2)).ceil().max(MIN_BITS) as u64;
        let hashes = ((bits as f64 / n) * ln2).round().clamp(1.0, f64::from(MAX_HASHES)) as u32;
        let words = vec![0_u64; bits.div_ceil(64) as usize];
        BloomFilter { bit_count: words.len() as u64 * 64, words, hashes }
    }

    pub(crate) fn insert(&mut self, data: &[u8]) {
        let (h1, h2) = hash_pair(data);
        for i in 0..self.hashes {
            let (word, mask) = self.position(h1, h2, i);
            self.words[word] |= mask;
        }
    }

    pub(crate) fn contains(&self, data: &[u8]) -> bool {
        let (h1, h2) = hash_pair(data);
        (0..self.hashes).all(|i| {
            let (word, mask) = self.position(h1, h2, i);
            self.words[word] & mask != 0
        })
    }

    /// Add every item of `other` to `self`. Both must have been built with
    /// the same sizing.
    pub(crate) fn union_with(&mut self, other: &BloomFilter) {
        debug_assert_eq!(self.bit_count, other.bit_count);
        debug_assert_eq!(self.hashes, other.hashes);
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            *mine |= *theirs;
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn position(&self, h1: u64, h2: u64, i: u32) -> (usize, u64) {
        let idx = h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.bit_count;
        ((idx / 64) as usize, 1_u64 << (idx % 64))
    }

    #[cfg(test)]
    pub(crate) fn hashes(&self) -> u32 {
        self.hashes
    }
}

const SEEDS: [u64; 2] = [0x517c_c1b7_2722_0a95, 0x9e37_79b1_85eb_ca87];

fn hash_pair(data: &[u8]) -> (u64, u64) {
    // A zero step would probe the same bit `hashes` times
    (seeded_hash(data, SEEDS[0]), seeded_hash(data, SEEDS[1]) | 1)
}

fn seeded_hash(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed ^ data.len() as u64;
    for &byte in data {
        hash ^= u64::from(byte).wrapping_mul(0x1000_0000_01b3);
        hash = hash.rotate_left(13).wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    // murmur3's 64-bit finalizer
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^ (hash >> 33)
}
