//! Provides the `MembershipSet` trait, which answers "have we seen this token
//! before?", and its two implementations:
//! * `ExactSet` remembers every token, so it's always right, and its memory
//!   use grows with the number of distinct tokens.
//! * `MixedBloomSet` chains bloom filters. Its memory is fixed up front; it
//!   never forgets a token, but will occasionally claim to have seen one it
//!   hasn't.
//!
//! Also provides `CountedSet`, used to count how often each token occurs.
use anyhow::Result;
use fxhash::FxBuildHasher;
use indexmap::{IndexMap, IndexSet};

use crate::bloom::{BloomFilter, FALSE_POSITIVE_RATE};
use crate::io::TokenSink;

/// A set of tokens that only grows.
pub trait MembershipSet: Send {
    /// Add `token` to the set
    fn insert(&mut self, token: &[u8]);
    /// Is `token` in the set? Must be `true` for every token previously
    /// inserted.
    fn contains(&self, token: &[u8]) -> bool;
    /// Add every token of `other` to `self`. `other` must have come from the
    /// same `SetFactory` as `self`.
    fn absorb(&mut self, other: Self)
    where
        Self: Sized;
}

/// The driver asks a `SetFactory` for every set it needs, so all the sets of
/// a run are the same kind, sized the same way.
pub trait SetFactory: Sync {
    /// The kind of set made
    type Set: MembershipSet;
    /// Make a new empty set
    fn make(&self) -> Self::Set;
}

/// Makes `ExactSet`s
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactSets;

impl SetFactory for ExactSets {
    type Set = ExactSet;
    fn make(&self) -> ExactSet {
        ExactSet::default()
    }
}

/// A hash set of owned tokens.
#[derive(Debug, Default)]
pub struct ExactSet {
    set: IndexSet<Box<[u8]>, FxBuildHasher>,
}

impl ExactSet {
    /// The number of distinct tokens in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }
    /// Is the set empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl MembershipSet for ExactSet {
    fn insert(&mut self, token: &[u8]) {
        if !self.set.contains(token) {
            self.set.insert(token.into());
        }
    }
    fn contains(&self, token: &[u8]) -> bool {
        self.set.contains(token)
    }
    fn absorb(&mut self, other: Self) {
        self.set.extend(other.set);
    }
}

/// Makes `MixedBloomSet`s of `filters` chained filters, each sized for
/// `expected_tokens` tokens.
#[derive(Debug, Clone, Copy)]
pub struct BloomSets {
    expected_tokens: u64,
    filters: usize,
}

impl BloomSets {
    /// Sets will be sized for `expected_tokens` tokens and chain `filters`
    /// filters (at least one).
    #[must_use]
    pub fn new(expected_tokens: u64, filters: usize) -> Self {
        BloomSets { expected_tokens, filters: filters.max(1) }
    }
}

impl SetFactory for BloomSets {
    type Set = MixedBloomSet;
    fn make(&self) -> MixedBloomSet {
        let filters = (0..self.filters)
            .map(|_| BloomFilter::with_capacity(self.expected_tokens, FALSE_POSITIVE_RATE))
            .collect();
        MixedBloomSet { filters }
    }
}

/// A `MixedBloomSet` is a chain of bloom filters. Filter 0 sees a token's
/// bytes as they are; filter `i + 1` sees the bytes of filter `i` passed
/// through `mix`. `mix` never maps two tokens to the same bytes, and two
/// tokens that collide in one filter are unlikely to collide in the next, so with `k` filters each with false positive rate
/// `p`, the set's false positive rate approaches `p^k`.
#[derive(Debug, Clone)]
pub struct MixedBloomSet {
    filters: Vec<BloomFilter>,
}

impl MixedBloomSet {
    /// Calls `probe` with each filter's form of `token` until it returns
    /// `false`. Returns whether every call returned `true`.
    fn walk(token: &[u8], filter_count: usize, mut probe: impl FnMut(usize, &[u8]) -> bool) -> bool {
        if filter_count <= 1 {
            return probe(0, token);
        }
        let mut bytes = token.to_vec();
        for i in 0..filter_count {
            if i > 0 {
                mix(&mut bytes);
            }
            if !probe(i, &bytes) {
                return false;
            }
        }
        true
    }
}

impl MembershipSet for MixedBloomSet {
    fn insert(&mut self, token: &[u8]) {
        let filters = &mut self.filters;
        MixedBloomSet::walk(token, filters.len(), |i, bytes| {
            filters[i].insert(bytes);
            true
        });
    }
    fn contains(&self, token: &[u8]) -> bool {
        MixedBloomSet::walk(token, self.filters.len(), |i, bytes| self.filters[i].contains(bytes))
    }
    fn absorb(&mut self, other: Self) {
        for (mine, theirs) in self.filters.iter_mut().zip(&other.filters) {
            mine.union_with(theirs);
        }
    }
}

const MIX: u8 = 0x9d;

/// Replaces each byte `b` at position `j` with `x ^ (x >> 3)`, where
/// `x = (b ^ key(j)) * MIX`. Each step is a bijection on byte values, so two
/// tokens that differ before mixing still differ after it.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn mix(bytes: &mut [u8]) {
    for (j, b) in bytes.iter_mut().enumerate() {
        let key = (j as u8).wrapping_mul(0x3b) ^ 0xa5;
        let x = (*b ^ key).wrapping_mul(MIX);
        *b = x ^ (x >> 3);
    }
}

/// A `CountedSet` keeps each token it's given, in order of first insertion,
/// along with the number of times it was inserted.
#[derive(Debug, Default)]
pub struct CountedSet {
    set: IndexMap<Box<[u8]>, u32, FxBuildHasher>,
}

impl CountedSet {
    /// Insert `token`, or bump its count if it's already present
    pub fn insert(&mut self, token: &[u8]) {
        match self.set.get_mut(token) {
            Some(count) => *count = count.saturating_add(1),
            None => {
                self.set.insert(token.into(), 1);
            }
        }
    }

    /// Write each token with its count, in order of first insertion
    pub fn output_with_count_to(&self, out: &mut impl TokenSink) -> Result<u64> {
        let mut written = 0;
        for (token, count) in &self.set {
            out.write_counted(*count, token)?;
            written += 1;
        }
        Ok(written)
    }
}
