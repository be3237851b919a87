use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::tsm1::block::block_type_name;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The header, footer or index of a TSM file cannot be parsed. The file is unusable.
    #[error("invalid TSM file {}: {reason}", .path.display())]
    InvalidFormat { path: PathBuf, reason: String },

    /// A stored block no longer matches the checksum recorded in the index.
    #[error(
        "checksum mismatch in {} for key {} block {block_index}: got {actual} but expected {expected}",
        .path.display(),
        String::from_utf8_lossy(.key)
    )]
    ChecksumMismatch {
        path: PathBuf,
        key: Vec<u8>,
        block_index: usize,
        expected: u32,
        actual: u32,
    },

    /// A block passed its checksum but could not be decoded.
    #[error(
        "corrupt block in {} for key {} block {block_index}: {reason}",
        .path.display(),
        String::from_utf8_lossy(.key)
    )]
    CorruptBlock {
        path: PathBuf,
        key: Vec<u8>,
        block_index: usize,
        reason: String,
    },

    #[error("io failure on {}: {source}", .path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Nothing was published, the inputs are still authoritative.
    #[error("compaction aborted: {reason}")]
    CompactionAborted { reason: String },

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error(
        "field type conflict: expected {}, got {}",
        type_name(.expected),
        type_name(.actual)
    )]
    FieldTypeConflict { expected: u8, actual: u8 },

    #[error("cache-max-memory-size exceeded: ({size}/{max})")]
    CacheMaxMemorySizeExceeded { size: u64, max: u64 },

    #[error(
        "keys must be added in sorted order: {} after {}",
        String::from_utf8_lossy(.key),
        String::from_utf8_lossy(.last)
    )]
    UnsortedKeys { key: Vec<u8>, last: Vec<u8> },

    #[error("max key length exceeded: {0}")]
    MaxKeyLengthExceeded(usize),

    #[error("max blocks exceeded for key {}", String::from_utf8_lossy(.0))]
    MaxBlocksExceeded(Vec<u8>),

    #[error("no values written")]
    NoValues,

    /// A tombstone file could not be walked to the end. `processed` entries were visited successfully.
    #[error("{} failed to walk tombstone entries: {reason}. Last okay entry: {processed}", .path.display())]
    TombstoneWalk {
        path: PathBuf,
        processed: u64,
        reason: String,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("engine is closed")]
    EngineClosed,
}

impl Error {
    /// is_integrity reports whether the error describes damaged data rather than an operational failure.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat { .. } | Error::ChecksumMismatch { .. } | Error::CorruptBlock { .. }
        )
    }
}

fn type_name(typ: &u8) -> &'static str {
    block_type_name(*typ)
}

/// io_err wraps an io::Error with the path it happened on, for use with `map_err`.
pub(crate) fn io_err(path: impl AsRef<Path>) -> impl FnOnce(io::Error) -> Error {
    let path = path.as_ref().to_path_buf();
    move |source| Error::IoFailure { path, source }
}

pub(crate) fn invalid_format(path: impl AsRef<Path>, reason: impl Into<String>) -> Error {
    Error::InvalidFormat {
        path: path.as_ref().to_path_buf(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::ChecksumMismatch {
            path: PathBuf::from("/data/000000001-000000001.tsm"),
            key: b"cpu".to_vec(),
            block_index: 2,
            expected: 10,
            actual: 11,
        };
        assert_eq!(
            e.to_string(),
            "checksum mismatch in /data/000000001-000000001.tsm for key cpu block 2: got 11 but expected 10"
        );
        assert!(e.is_integrity());

        let e = Error::FieldTypeConflict {
            expected: 0,
            actual: 1,
        };
        assert_eq!(e.to_string(), "field type conflict: expected float, got integer");
        assert!(!e.is_integrity());

        let e = io_err("/x")(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(e.to_string(), "io failure on /x: boom");
    }
}
