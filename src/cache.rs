//! Bounded caches used by the sparse image decoders.
//!
//! There's no eviction policy: when inserting a new entry would go
//! over the budget the whole cache is dropped and filling starts over.

use std::collections::HashMap;
use std::hash::Hash;

/// Default budget for decompressed chunk and grain caches
pub const DEFAULT_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Default number of cached sectors
pub const DEFAULT_SECTOR_ENTRIES: usize = 8192;

/// Cache limits used when opening an image
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheLimits {
    /// Maximum number of bytes of decompressed chunks or grains
    pub chunk_bytes: usize,
    /// Maximum number of individual sectors
    pub sector_entries: usize,
}

impl Default for CacheLimits {
    fn default() -> CacheLimits {
        CacheLimits {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            sector_entries: DEFAULT_SECTOR_ENTRIES,
        }
    }
}

/// How the size of a cache is measured
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Budget {
    Bytes(usize),
    Entries(usize),
}

/// Map of byte buffers cleared wholesale when it grows past its budget
pub struct BoundedCache<K, V> {
    entries: HashMap<K, V>,
    budget: Budget,
    /// Bytes or entries currently accounted for
    used: usize,
    clears: usize,
}

impl<K: Hash + Eq, V: AsRef<[u8]>> BoundedCache<K, V> {
    /// Create a cache holding at most `max` bytes of data
    pub fn by_bytes(max: usize) -> BoundedCache<K, V> {
        BoundedCache::with_budget(Budget::Bytes(max))
    }

    /// Create a cache holding at most `max` entries
    pub fn by_entries(max: usize) -> BoundedCache<K, V> {
        BoundedCache::with_budget(Budget::Entries(max))
    }

    fn with_budget(budget: Budget) -> BoundedCache<K, V> {
        BoundedCache {
            entries: HashMap::new(),
            budget,
            used: 0,
            clears: 0,
        }
    }

    /// Look up a cached entry
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert `value`, clearing the cache first if it wouldn't fit
    pub fn insert(&mut self, key: K, value: V) {
        let (weight, max) = match self.budget {
            Budget::Bytes(max) => (value.as_ref().len(), max),
            Budget::Entries(max) => (1, max),
        };

        if self.used + weight > max && !self.entries.is_empty() {
            log::trace!("Cache full ({} used, {} max), clearing", self.used, max);
            self.clear();
        }

        if let Some(old) = self.entries.insert(key, value) {
            self.used -= match self.budget {
                Budget::Bytes(_) => old.as_ref().len(),
                Budget::Entries(_) => 1,
            };
        }

        self.used += weight;
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.used = 0;
        self.clears += 1;
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes or entries currently used, depending on how the budget is measured
    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of times the cache has been cleared
    pub fn clears(&self) -> usize {
        self.clears
    }
}
