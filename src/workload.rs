//! Random data for the benchmark: the baseline entries the table is seeded with, and the buffers
//! of random indices that drive lookups during the timed loop.

use crate::error::{ConfigError, Result};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use std::sync::Arc;

/// Default number of indices a worker draws at a time.
///
/// Large enough that refilling is rare, small enough to stay out of the way of the table itself.
pub const INDEX_BUFFER_CAPACITY: usize = 100_000;

/// Key type stored in [`Storage`] and in the benchmarked table.
///
/// Reference counted so that seeding the table does not copy key bytes.
pub type Key = Arc<[u8]>;

/// Returns `len` uniformly random bytes.
pub fn uniform_key<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Box<[u8]> {
    let mut bytes = vec![0u8; len].into_boxed_slice();
    rng.fill(&mut bytes[..]);
    bytes
}

/// The baseline entries: fixed-length random keys paired with full-range random values.
///
/// Built once per configuration and never modified afterwards, so it can be shared between
/// worker threads by reference.
#[derive(Clone, Debug, Default)]
pub struct Storage {
    entries: Vec<(Key, u64)>,
}

impl Storage {
    /// Generates `table_size` entries, each with a `string_len` byte key.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, string_len: usize, table_size: usize) -> Self {
        let entries = (0..table_size)
            .map(|_| {
                let key: Key = uniform_key(rng, string_len).into();
                (key, rng.gen::<u64>())
            })
            .collect();
        Self { entries }
    }

    /// All entries, in generation order.
    pub fn entries(&self) -> &[(Key, u64)] {
        &self.entries
    }

    /// The entry at `index`, if there is one.
    pub fn entry(&self, index: usize) -> Option<&(Key, u64)> {
        self.entries.get(index)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Key, u64)> for Storage {
    fn from_iter<I: IntoIterator<Item = (Key, u64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A fixed-capacity buffer of random indices in `[0, upper)`, consumed front to back and refilled
/// in place once exhausted.
///
/// Each worker owns its own buffer.
#[derive(Clone, Debug)]
pub struct IndexBuffer {
    indices: Box<[usize]>,
    dist: Uniform<usize>,
    pos: usize,
}

impl IndexBuffer {
    /// Creates a buffer of `capacity` indices drawn uniformly from `[0, upper)`.
    ///
    /// Fails if `upper` is zero, since there is no index to draw, or if `capacity` is zero.
    pub fn new<R: Rng + ?Sized>(rng: &mut R, capacity: usize, upper: usize) -> Result<Self> {
        if upper == 0 {
            return Err(ConfigError::EmptyTable);
        }
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let dist = Uniform::from(0..upper);
        let indices = dist.sample_iter(&mut *rng).take(capacity).collect();
        Ok(Self {
            indices,
            dist,
            pos: 0,
        })
    }

    /// The index at the current position.
    #[inline]
    pub fn current(&self) -> usize {
        // `pos` is always < capacity: `advance` reports exhaustion at the end and `refill` rewinds.
        self.indices[self.pos]
    }

    /// Moves to the next index. Returns `true` if that exhausted the buffer, in which case it
    /// must be [refilled](Self::refill) before [`current`](Self::current) is called again.
    #[inline]
    pub fn advance(&mut self) -> bool {
        self.pos += 1;
        self.pos == self.indices.len()
    }

    /// Draws a fresh set of indices into the buffer and rewinds to its start.
    pub fn refill<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for index in self.indices.iter_mut() {
            *index = self.dist.sample(rng);
        }
        self.pos = 0;
    }

    /// Number of indices the buffer holds.
    pub fn capacity(&self) -> usize {
        self.indices.len()
    }

    /// Read-only view of the buffered indices.
    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn keys_have_requested_length() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(uniform_key(&mut rng, 0).len(), 0);
        assert_eq!(uniform_key(&mut rng, 4096).len(), 4096);
    }

    #[test]
    fn storage_shape() {
        let mut rng = StdRng::seed_from_u64(2);
        let storage = Storage::generate(&mut rng, 8, 100);
        assert_eq!(storage.len(), 100);
        assert!(storage.entries().iter().all(|(k, _)| k.len() == 8));
        let distinct: HashSet<_> = storage.entries().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(distinct.len(), 100);
        assert!(storage.entry(100).is_none());
    }

    #[test]
    fn single_byte_keys_cover_full_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let storage = Storage::generate(&mut rng, 1, 20_000);
        let seen: HashSet<u8> = storage.entries().iter().map(|(k, _)| k[0]).collect();
        assert_eq!(seen.len(), 256);
    }

    #[test]
    fn indices_in_range() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut buf = IndexBuffer::new(&mut rng, 1000, 3).unwrap();
        assert!(buf.as_slice().iter().all(|&i| i < 3));
        // the last index is reachable too
        assert!(buf.as_slice().contains(&2));
        buf.refill(&mut rng);
        assert!(buf.as_slice().iter().all(|&i| i < 3));
    }

    #[test]
    fn advance_reports_exhaustion_and_refill_rewinds() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut buf = IndexBuffer::new(&mut rng, 4, 10).unwrap();
        let first = buf.current();
        assert_eq!(first, buf.as_slice()[0]);
        assert!(!buf.advance());
        assert!(!buf.advance());
        assert!(!buf.advance());
        assert!(buf.advance());
        buf.refill(&mut rng);
        assert_eq!(buf.current(), buf.as_slice()[0]);
        assert_eq!(buf.capacity(), 4);
    }

    #[test]
    fn empty_range_rejected() {
        let mut rng = StdRng::seed_from_u64(6);
        assert_eq!(
            IndexBuffer::new(&mut rng, 10, 0).unwrap_err(),
            ConfigError::EmptyTable
        );
        assert_eq!(
            IndexBuffer::new(&mut rng, 0, 10).unwrap_err(),
            ConfigError::ZeroCapacity
        );
    }
}
