use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// DEFAULT_WRITE_TIMEOUT bounds how long a WAL append may take before the write fails.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// DEFAULT_CACHE_MAX_MEMORY_SIZE is the maximum size a shard's cache can reach before it starts
/// rejecting writes.
pub const DEFAULT_CACHE_MAX_MEMORY_SIZE: u64 = 1024 * 1024 * 1024; // 1GB

/// DEFAULT_CACHE_SNAPSHOT_MEMORY_SIZE is the size at which the engine will snapshot the cache
/// and write it to a TSM file, freeing up memory
pub const DEFAULT_CACHE_SNAPSHOT_MEMORY_SIZE: u64 = 25 * 1024 * 1024; // 25MB

/// DEFAULT_CACHE_SNAPSHOT_WRITE_COLD_DURATION is the length of time at which the engine will
/// snapshot the cache and write it to a new TSM file if the shard hasn't received writes or deletes
pub const DEFAULT_CACHE_SNAPSHOT_WRITE_COLD_DURATION: Duration = Duration::from_secs(10 * 60);

/// DEFAULT_COMPACT_FULL_WRITE_COLD_DURATION is the duration at which the engine will compact all
/// TSM files in a shard if it hasn't received a write or delete
pub const DEFAULT_COMPACT_FULL_WRITE_COLD_DURATION: Duration = Duration::from_secs(4 * 60 * 60);

/// DEFAULT_MAX_POINTS_PER_BLOCK is the maximum number of points in an encoded block in a TSM file
pub const DEFAULT_MAX_POINTS_PER_BLOCK: usize = 1000;

/// DEFAULT_WAL_SEGMENT_SIZE is the file size at which a WAL segment is closed and a new one opened.
pub const DEFAULT_WAL_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;

/// DEFAULT_COMPACT_MIN_FILES is the number of same-level files that triggers a level compaction.
pub const DEFAULT_COMPACT_MIN_FILES: usize = 4;

const ENV_ENGINE_PATH: &str = "TSMDB_ENGINE_PATH";
const ENV_WRITE_TIMEOUT: &str = "TSMDB_WRITE_TIMEOUT";

/// Config holds the storage engine settings. It is passed into the engine at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// dir is the data root. Shards live under `<dir>/data/<shard>` and `<dir>/wal/<shard>`.
    pub dir: PathBuf,

    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,

    pub cache_max_memory_size: u64,
    pub cache_snapshot_memory_size: u64,

    #[serde(with = "duration_secs")]
    pub cache_snapshot_write_cold_duration: Duration,

    #[serde(with = "duration_secs")]
    pub compact_full_write_cold_duration: Duration,

    pub max_points_per_block: usize,
    pub wal_segment_size: u64,
    pub compact_min_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: default_engine_path(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            cache_max_memory_size: DEFAULT_CACHE_MAX_MEMORY_SIZE,
            cache_snapshot_memory_size: DEFAULT_CACHE_SNAPSHOT_MEMORY_SIZE,
            cache_snapshot_write_cold_duration: DEFAULT_CACHE_SNAPSHOT_WRITE_COLD_DURATION,
            compact_full_write_cold_duration: DEFAULT_COMPACT_FULL_WRITE_COLD_DURATION,
            max_points_per_block: DEFAULT_MAX_POINTS_PER_BLOCK,
            wal_segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            compact_min_files: DEFAULT_COMPACT_MIN_FILES,
        }
    }
}

impl Config {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// from_env builds the default config and applies `TSMDB_ENGINE_PATH` and
    /// `TSMDB_WRITE_TIMEOUT` (seconds) overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var(ENV_ENGINE_PATH) {
            if !dir.is_empty() {
                config.dir = PathBuf::from(dir);
            }
        }

        if let Ok(timeout) = std::env::var(ENV_WRITE_TIMEOUT) {
            let secs = timeout.trim().parse::<u64>().map_err(|e| {
                Error::InvalidConfig(format!("{}={:?}: {}", ENV_WRITE_TIMEOUT, timeout, e))
            })?;
            config.write_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_timeout.is_zero() {
            return Err(Error::InvalidConfig("write-timeout must be positive".to_string()));
        }
        if self.max_points_per_block == 0 {
            return Err(Error::InvalidConfig(
                "max-points-per-block must be positive".to_string(),
            ));
        }
        if self.cache_max_memory_size > 0
            && self.cache_snapshot_memory_size > self.cache_max_memory_size
        {
            return Err(Error::InvalidConfig(format!(
                "cache-snapshot-memory-size {} exceeds cache-max-memory-size {}",
                self.cache_snapshot_memory_size, self.cache_max_memory_size
            )));
        }
        if self.compact_min_files < 2 {
            return Err(Error::InvalidConfig(
                "compact-min-files must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    pub fn data_dir(&self, shard_id: u64) -> PathBuf {
        self.dir.join("data").join(shard_id.to_string())
    }

    pub fn wal_dir(&self, shard_id: u64) -> PathBuf {
        self.dir.join("wal").join(shard_id.to_string())
    }
}

/// default_engine_path is `$HOME/.tsmdb/engine`, or a relative `.tsmdb/engine` without a home.
pub fn default_engine_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default();
    home.join(".tsmdb").join("engine")
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::new("/var/lib/tsmdb");
        assert_eq!(c.write_timeout, Duration::from_secs(10));
        assert_eq!(c.max_points_per_block, 1000);
        assert_eq!(c.data_dir(3), PathBuf::from("/var/lib/tsmdb/data/3"));
        assert_eq!(c.wal_dir(3), PathBuf::from("/var/lib/tsmdb/wal/3"));
        c.validate().unwrap();
    }

    #[test]
    fn test_serde_partial() {
        let c: Config =
            serde_json::from_str(r#"{"dir": "/tmp/e", "write_timeout": 3}"#).unwrap();
        assert_eq!(c.dir, PathBuf::from("/tmp/e"));
        assert_eq!(c.write_timeout, Duration::from_secs(3));
        assert_eq!(c.wal_segment_size, DEFAULT_WAL_SEGMENT_SIZE);

        let s = serde_json::to_string(&c).unwrap();
        let back: Config = serde_json::from_str(&s).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_validate() {
        let mut c = Config::new("/tmp");
        c.write_timeout = Duration::ZERO;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));

        let mut c = Config::new("/tmp");
        c.cache_snapshot_memory_size = c.cache_max_memory_size + 1;
        assert!(c.validate().is_err());
    }
}
