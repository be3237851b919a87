#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate async_trait;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate tracing;

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod inspect;

pub use error::{Error, Result};

/// COMPACTION_TEMP_EXTENSION is the extension used for temporary files created during compaction.
pub const COMPACTION_TEMP_EXTENSION: &str = "tmp";

/// BAD_TSM_FILE_EXTENSION is appended to TSM files that fail to open so they are skipped on restart.
pub const BAD_TSM_FILE_EXTENSION: &str = "bad";

/// TSM_FILE_EXTENSION is the extension used for TSM files.
pub const TSM_FILE_EXTENSION: &str = "tsm";

/// TOMBSTONE_FILE_EXTENSION is the extension used for the tombstone file of a TSM file.
pub const TOMBSTONE_FILE_EXTENSION: &str = "tombstone";

/// WAL_FILE_EXTENSION is the extension used for WAL segment files.
pub const WAL_FILE_EXTENSION: &str = "wal";
