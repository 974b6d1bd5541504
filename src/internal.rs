//! This module provides generic reusable structures to easily store
//! and lookup the sector layout of a sparse image.
//!
//! Those are only useful for implementing a new image format backend.

use std::fmt;

/// A sorted map from the first sector of an extent to its description,
/// used to quickly look up where an arbitrary sector lives in the image.
pub struct ExtentMap<T> {
    /// Extents sorted by their first sector
    extents: Vec<(u64, T)>,
}

impl<T> ExtentMap<T> {
    /// Create a new `ExtentMap` from a list of `(first_sector, extent)`
    /// pairs. The list doesn't have to be sorted. If two extents start
    /// at the same sector the last one wins.
    pub fn new(mut extents: Vec<(u64, T)>) -> ExtentMap<T> {
        // Stable sort so that `dedup` keeps insertion order among equal keys
        extents.sort_by_key(|&(start, _)| start);

        let mut deduped: Vec<(u64, T)> = Vec::with_capacity(extents.len());

        for e in extents {
            match deduped.last_mut() {
                Some(last) if last.0 == e.0 => *last = e,
                _ => deduped.push(e),
            }
        }

        ExtentMap { extents: deduped }
    }

    /// Return the number of extents
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    /// Return true if the map contains no extent
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Locate the extent starting at or directly before `sector` and
    /// return its first sector along with a reference to it.
    pub fn find(&self, sector: u64) -> Option<(u64, &T)> {
        let pos = match self
            .extents
            .binary_search_by(|&(start, _)| start.cmp(&sector))
        {
            // The sector matched the start of an extent exactly
            Ok(i) => i,
            // No extent starts at or before `sector`
            Err(0) => return None,
            // No exact match, the function returns the index of
            // the first element greater than `sector` (on one
            // past the end if no greater element is found).
            Err(i) => i - 1,
        };

        let (start, ref extent) = self.extents[pos];

        Some((start, extent))
    }

    /// Iterate over the extents in sector order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.extents.iter().map(|(s, e)| (*s, e))
    }
}

impl<T: fmt::Debug> fmt::Debug for ExtentMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (start, e) in &self.extents {
            writeln!(f, "  {:>10}: {:?}", start, e)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn floor_lookup() {
        let map = ExtentMap::new(vec![(100, 'b'), (0, 'a'), (250, 'c')]);

        assert_eq!(map.find(0), Some((0, &'a')));
        assert_eq!(map.find(99), Some((0, &'a')));
        assert_eq!(map.find(100), Some((100, &'b')));
        assert_eq!(map.find(1000), Some((250, &'c')));
    }

    #[test]
    fn before_first_extent() {
        let map = ExtentMap::new(vec![(10, ())]);

        assert_eq!(map.find(9), None);
        assert!(ExtentMap::<()>::new(Vec::new()).find(0).is_none());
    }

    #[test]
    fn duplicates_keep_last() {
        let map = ExtentMap::new(vec![(0, 1), (0, 2)]);

        assert_eq!(map.len(), 1);
        assert_eq!(map.find(5), Some((0, &2)));
    }
}
