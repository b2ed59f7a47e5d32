/// Seed of the interval permutation applied when writing reference blocks
///
/// A fixed seed makes repeated builds from identical input bit-reproducible.
pub const RNG_SEED: u64 = 42;

/// Policy for retaining interval trees once they have been loaded from disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Keep every loaded tree for the lifetime of the reader
    #[default]
    Unbounded,
    /// Keep at most this many trees, discarding the oldest loaded first
    ///
    /// Discarding only drops the cache's own handle: a tree that a caller is
    /// still querying stays alive until that caller releases it.
    Bounded(usize),
}
impl CachePolicy {
    /// Returns true if a cache holding `len` trees must discard one
    #[must_use]
    pub fn is_over(&self, len: usize) -> bool {
        match self {
            Self::Unbounded => false,
            Self::Bounded(max) => len > *max,
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_bounds() {
        assert!(!CachePolicy::Unbounded.is_over(usize::MAX));
        assert!(!CachePolicy::Bounded(2).is_over(2));
        assert!(CachePolicy::Bounded(2).is_over(3));
        assert!(CachePolicy::Bounded(0).is_over(1));
    }
}
