use std::path::PathBuf;

use crate::engine::tsm1::file_store::{KeyRange, TimeRange};

/// FileStat holds information about a TSM file on disk.
#[derive(Debug, Clone)]
pub struct FileStat {
    pub path: PathBuf,
    pub generation: u64,
    pub sequence: u64,
    pub has_tombstone: bool,
    pub size: u64,
    pub last_modified: i64,

    pub time_range: TimeRange,
    pub key_range: KeyRange,
}

impl FileStat {
    /// level is the compaction level of the file. Snapshots are written at level 1 and every
    /// compaction of a level raises it by one.
    pub fn level(&self) -> u64 {
        self.sequence
    }

    /// overlaps_time_range returns true if the time range of the file intersect min and max.
    pub fn overlaps_time_range(&self, min: i64, max: i64) -> bool {
        self.time_range.min <= max && self.time_range.max >= min
    }

    /// overlaps_key_range returns true if the min and max keys of the file overlap the arguments min and max.
    pub fn overlaps_key_range(&self, min: &[u8], max: &[u8]) -> bool {
        !min.is_empty()
            && !max.is_empty()
            && self.key_range.min.as_slice() <= max
            && self.key_range.max.as_slice() >= min
    }

    /// contains_key returns true if key falls within the key range of the file.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.key_range.contains(key)
    }
}

/// TombstoneStat holds information about a possible tombstone file on disk.
#[derive(Debug, Clone, Default)]
pub struct TombstoneStat {
    pub tombstone_exists: bool,
    pub path: PathBuf,
    pub last_modified: i64,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(min_key: &str, max_key: &str) -> FileStat {
        FileStat {
            path: PathBuf::from("000000001-000000002.tsm"),
            generation: 1,
            sequence: 2,
            has_tombstone: false,
            size: 100,
            last_modified: 0,
            time_range: TimeRange::new(10, 20),
            key_range: KeyRange::new(min_key.as_bytes().to_vec(), max_key.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_file_stat_ranges() {
        let s = stat("cpu", "mem");
        assert_eq!(s.level(), 2);

        assert!(s.contains_key(b"cpu"));
        assert!(s.contains_key(b"disk"));
        assert!(s.contains_key(b"mem"));
        assert!(!s.contains_key(b"net"));
        assert!(!s.contains_key(b"a"));

        assert!(s.overlaps_key_range(b"a", b"cpu"));
        assert!(!s.overlaps_key_range(b"n", b"z"));
        assert!(!s.overlaps_key_range(b"", b"z"));

        assert!(s.overlaps_time_range(0, 10));
        assert!(!s.overlaps_time_range(21, 30));
    }
}
