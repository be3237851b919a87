use std::path::Path;

use regex::Regex;

pub mod file_set;
pub mod index;
pub mod reader;
pub mod stat;
pub mod tombstone;
pub mod writer;

pub use file_set::{FileSet, FileStore};

/// MAGIC_NUMBER is written as the first 4 bytes of a data file to
/// identify the file as a tsm1 formatted file
pub(crate) const MAGIC_NUMBER: u32 = 0x16D116D1;

/// VERSION indicates the version of the TSM file format.
pub(crate) const VERSION: u8 = 1;

/// Block's header: | magic number(4B) | VERSION(1B) |
pub(crate) const HEADER: [u8; 5] = [22, 209, 22, 209, 1];

pub(crate) const HEADER_SIZE: usize = HEADER.len();

/// Footer: | index offset(8B) |
pub(crate) const FOOTER_SIZE: usize = 8;

/// size in bytes of an index entry
pub(crate) const INDEX_ENTRY_SIZE: usize = 32;

/// size in bytes used to store the count of index entries for a key
pub(crate) const INDEX_COUNT_SIZE: usize = 2;

/// size in bytes used to store the type of block encoded
pub(crate) const INDEX_TYPE_SIZE: usize = 1;

/// size in bytes used to store the length of a key
pub(crate) const INDEX_KEY_LEN_SIZE: usize = 2;

/// Max number of blocks for a given key that can exist in a single file
pub(crate) const MAX_INDEX_ENTRIES: usize = (1 << (INDEX_COUNT_SIZE * 8)) - 1;

/// max length of a key in an index entry (measurement + tags)
pub(crate) const MAX_KEY_LENGTH: usize = (1 << (INDEX_KEY_LEN_SIZE * 8)) - 1;

/// The threshold amount data written before we periodically fsync a TSM file.  This helps avoid
/// long pauses due to very large fsyncs at the end of writing a TSM file.
pub(crate) const FSYNC_EVERY: u64 = 25 * 1024 * 1024;

/// Compaction output rolls over to a new file once it reaches this size.
pub(crate) const MAX_TSMFILE_SIZE: u64 = 2048 * 1024 * 1024; // 2GB

lazy_static! {
    static ref TSM_FILE_NAME: Regex = Regex::new(r"^(\d{9,})-(\d{9,})\.tsm$").unwrap();
}

/// TimeRange holds an inclusive min and max timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub min: i64,
    pub max: i64,
}

impl TimeRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn unbound() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.min <= other.max && self.max >= other.min
    }

    pub fn contains(&self, t: i64) -> bool {
        self.min <= t && t <= self.max
    }
}

/// KeyRange holds the smallest and largest key of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub min: Vec<u8>,
    pub max: Vec<u8>,
}

impl KeyRange {
    pub fn new(min: Vec<u8>, max: Vec<u8>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.min.as_slice() <= key && key <= self.max.as_slice()
    }
}

/// tsm_file_name formats the name of a TSM file for a generation and sequence.
pub fn tsm_file_name(generation: u64, sequence: u64) -> String {
    format!(
        "{:09}-{:09}.{}",
        generation,
        sequence,
        crate::TSM_FILE_EXTENSION
    )
}

/// parse_tsm_file_name returns the generation and sequence encoded in a TSM file name.
pub fn parse_tsm_file_name(path: impl AsRef<Path>) -> Option<(u64, u64)> {
    let name = path.as_ref().file_name()?.to_str()?;
    let caps = TSM_FILE_NAME.captures(name)?;

    let generation = caps.get(1)?.as_str().parse().ok()?;
    let sequence = caps.get(2)?.as_str().parse().ok()?;
    Some((generation, sequence))
}
