use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tsmdb_storage::mmap::MmapReadableFile;
use tsmdb_storage::{RandomAccessFile, RandomAccessFileExt};

use crate::engine::tsm1::block::{checksum, decode_block};
use crate::engine::tsm1::file_store::index::{IndexEntries, IndexEntry};
use crate::engine::tsm1::file_store::reader::block_iterator::BlockIterator;
use crate::engine::tsm1::file_store::reader::index_reader::TSMIndex;
use crate::engine::tsm1::file_store::stat::FileStat;
use crate::engine::tsm1::file_store::tombstone::{Tombstone, TombstoneSet, Tombstoner};
use crate::engine::tsm1::file_store::{
    parse_tsm_file_name, KeyRange, TimeRange, FOOTER_SIZE, HEADER_SIZE, MAGIC_NUMBER, VERSION,
};
use crate::engine::tsm1::value::Values;
use crate::error::{invalid_format, io_err, Error, Result};

/// TSMReader is the read surface of an on-disk TSM file.
#[async_trait]
pub trait TSMReader: Send + Sync {
    /// path returns the underlying file path for the TSMFile.
    fn path(&self) -> &Path;

    /// read returns the points of key within the time range in ascending time order, with
    /// tombstones applied. Returns None if the file does not contain the key.
    async fn read(&self, key: &[u8], time_range: TimeRange) -> Result<Option<Values>>;

    /// read_block returns the raw bytes of one block of key after verifying its checksum.
    async fn read_block(&self, key: &[u8], block_index: usize, entry: &IndexEntry)
        -> Result<Vec<u8>>;

    /// read_entries returns the index entries for all blocks for the given key.
    fn read_entries(&self, key: &[u8]) -> Option<&IndexEntries>;

    /// contains returns true if the file contains any values for the given key.
    fn contains(&self, key: &[u8]) -> bool;

    /// block_type returns the block type of the values stored for the key.
    fn block_type(&self, key: &[u8]) -> Option<u8>;

    /// key_count returns the number of distinct keys in the file.
    fn key_count(&self) -> usize;

    /// key_at returns the key and block type located at index position idx.
    fn key_at(&self, idx: usize) -> Option<(&[u8], u8)>;

    /// time_range returns the min and max time across all keys in the file.
    fn time_range(&self) -> TimeRange;

    /// key_range returns the min and max keys in the file.
    fn key_range(&self) -> KeyRange;

    /// tombstone_range returns ranges of time that are deleted for the given key.
    fn tombstone_range(&self, key: &[u8]) -> Vec<TimeRange>;

    /// has_tombstones returns true if there are any tombstone entries recorded.
    fn has_tombstones(&self) -> bool;

    /// delete_range records tombstones for the keys between min and max.
    async fn delete_range(&self, keys: &[Vec<u8>], min: i64, max: i64) -> Result<()>;

    /// stats returns the FileStat for the file.
    fn stats(&self) -> FileStat;
}

/// DefaultTSMReader maps a TSM file in memory and keeps its parsed index and tombstones.
pub struct DefaultTSMReader {
    path: PathBuf,
    generation: u64,
    sequence: u64,
    last_modified: i64,

    accessor: MmapReadableFile,
    index: TSMIndex,

    tombstoner: Tombstoner,
    tombstones: RwLock<TombstoneSet>,
    // serializes tombstone appends, holds the readable length of a damaged tombstone file
    // until it is cut back before the next append
    tombstone_lock: tokio::sync::Mutex<Option<u64>>,
    // bumped on every recorded deletion
    tombstone_version: AtomicU64,
}

impl DefaultTSMReader {
    /// open maps the file, validates its header and footer and loads the index and tombstones.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (generation, sequence) = parse_tsm_file_name(&path).unwrap_or_default();

        let accessor = MmapReadableFile::open(&path)
            .await
            .map_err(io_err(&path))?;
        let len = accessor.len();
        if len < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(invalid_format(
                &path,
                format!("file size {} too small", len),
            ));
        }

        let magic = accessor.read_u32(0).await.map_err(io_err(&path))?;
        if magic != MAGIC_NUMBER {
            return Err(invalid_format(
                &path,
                format!("can only read from tsm file, got magic {:#x}", magic),
            ));
        }
        let version = accessor.read_u8(4).await.map_err(io_err(&path))?;
        if version != VERSION {
            return Err(invalid_format(
                &path,
                format!(
                    "unsupported version {}, expected version {}",
                    version, VERSION
                ),
            ));
        }

        let footer_pos = len - FOOTER_SIZE as u64;
        let index_offset = accessor.read_u64(footer_pos).await.map_err(io_err(&path))?;
        if index_offset < HEADER_SIZE as u64 || index_offset > footer_pos {
            return Err(invalid_format(
                &path,
                format!("index offset {} outside of file", index_offset),
            ));
        }

        let index = {
            let b = accessor
                .bytes(index_offset, (footer_pos - index_offset) as usize)
                .map_err(io_err(&path))?;
            TSMIndex::parse(&path, b, index_offset)?
        };

        let tombstoner = Tombstoner::new(&path);
        let (tombstones, damaged_at) = tombstoner.load().await?;
        let tombstones = TombstoneSet::new(tombstones);

        let last_modified = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default();

        Ok(Self {
            path,
            generation,
            sequence,
            last_modified,
            accessor,
            index,
            tombstoner,
            tombstones: RwLock::new(tombstones),
            tombstone_lock: tokio::sync::Mutex::new(damaged_at),
            tombstone_version: AtomicU64::new(0),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn size(&self) -> u64 {
        self.accessor.len()
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn index(&self) -> &TSMIndex {
        &self.index
    }

    pub fn tombstoner(&self) -> &Tombstoner {
        &self.tombstoner
    }

    /// tombstone_version changes every time a deletion is recorded against the file.
    pub fn tombstone_version(&self) -> u64 {
        self.tombstone_version.load(Ordering::SeqCst)
    }

    /// tombstone_set returns a copy of the deleted ranges currently applied to the file.
    pub fn tombstone_set(&self) -> TombstoneSet {
        self.tombstones.read().clone()
    }

    /// block_iterator returns a new iterator over every block of the file in file order.
    pub fn block_iterator(&self) -> BlockIterator<'_> {
        BlockIterator::new(self)
    }

    /// block_bytes returns the stored bytes of a block without verifying them.
    pub fn block_bytes(&self, entry: &IndexEntry) -> Result<&[u8]> {
        self.accessor
            .bytes(entry.offset, entry.size as usize)
            .map_err(io_err(&self.path))
    }

    /// verify_block checks the checksum of a block against its index entry.
    pub fn verify_block(&self, key: &[u8], block_index: usize, entry: &IndexEntry) -> Result<&[u8]> {
        let block = self.block_bytes(entry)?;
        let actual = checksum(block);
        if actual != entry.checksum {
            return Err(Error::ChecksumMismatch {
                path: self.path.clone(),
                key: key.to_vec(),
                block_index,
                expected: entry.checksum,
                actual,
            });
        }
        Ok(block)
    }

    /// decode_block verifies and decodes one block of key.
    pub fn decode_block(&self, key: &[u8], block_index: usize, entry: &IndexEntry) -> Result<Values> {
        let block = self.verify_block(key, block_index, entry)?;
        decode_block(block).map_err(|e| Error::CorruptBlock {
            path: self.path.clone(),
            key: key.to_vec(),
            block_index,
            reason: e.to_string(),
        })
    }

    /// read_all returns every live point of key.
    pub async fn read_all(&self, key: &[u8]) -> Result<Option<Values>> {
        self.read(key, TimeRange::unbound()).await
    }

    /// delete removes the keys from the file for all time.
    pub async fn delete(&self, keys: &[Vec<u8>]) -> Result<()> {
        self.delete_range(keys, i64::MIN, i64::MAX).await
    }

    /// remove deletes the file and its tombstone from disk. The mapping stays valid for
    /// readers that still hold this reader.
    pub async fn remove(&self) -> Result<()> {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(io_err(&self.path)(e));
            }
        }
        self.tombstoner.delete().await
    }
}

#[async_trait]
impl TSMReader for DefaultTSMReader {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self, key: &[u8], time_range: TimeRange) -> Result<Option<Values>> {
        let entries = match self.index.entries(key) {
            Some(entries) => entries,
            None => return Ok(None),
        };

        let mut values = match Values::with_block_type(entries.typ) {
            Some(values) => values,
            None => {
                return Err(invalid_format(
                    &self.path,
                    format!("unknown block type {}", entries.typ),
                ))
            }
        };

        let tombstones = self.tombstones.read().ranges(key).to_vec();

        for (i, entry) in entries.overlapping(time_range.min, time_range.max) {
            if tombstones
                .iter()
                .any(|r| r.min <= entry.min_time && r.max >= entry.max_time)
            {
                continue;
            }

            let mut v = self.decode_block(key, i, entry)?;
            for r in &tombstones {
                v = v.exclude(r.min, r.max);
            }
            values.append(v.include(time_range.min, time_range.max))?;
        }

        Ok(Some(values.deduplicate()))
    }

    async fn read_block(
        &self,
        key: &[u8],
        block_index: usize,
        entry: &IndexEntry,
    ) -> Result<Vec<u8>> {
        self.verify_block(key, block_index, entry).map(|b| b.to_vec())
    }

    fn read_entries(&self, key: &[u8]) -> Option<&IndexEntries> {
        self.index.entries(key)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.index.contains(key)
    }

    fn block_type(&self, key: &[u8]) -> Option<u8> {
        self.index.entries(key).map(|e| e.typ)
    }

    fn key_count(&self) -> usize {
        self.index.key_count()
    }

    fn key_at(&self, idx: usize) -> Option<(&[u8], u8)> {
        self.index.key_at(idx)
    }

    fn time_range(&self) -> TimeRange {
        self.index.time_range()
    }

    fn key_range(&self) -> KeyRange {
        self.index.key_range()
    }

    fn tombstone_range(&self, key: &[u8]) -> Vec<TimeRange> {
        self.tombstones.read().ranges(key).to_vec()
    }

    fn has_tombstones(&self) -> bool {
        !self.tombstones.read().is_empty()
    }

    async fn delete_range(&self, keys: &[Vec<u8>], min: i64, max: i64) -> Result<()> {
        let keys: Vec<&Vec<u8>> = keys
            .iter()
            .filter(|key| {
                self.index
                    .entries(key)
                    .map(|e| e.overlapping(min, max).next().is_some())
                    .unwrap_or_default()
            })
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let mut damaged_at = self.tombstone_lock.lock().await;
        if let Some(len) = *damaged_at {
            self.tombstoner.truncate(len).await?;
            *damaged_at = None;
        }
        self.tombstoner.add_range(&keys, min, max).await?;

        {
            let mut tombstones = self.tombstones.write();
            for key in keys {
                tombstones.add(Tombstone::new(key.clone(), min, max));
            }
        }
        self.tombstone_version.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    fn stats(&self) -> FileStat {
        FileStat {
            path: self.path.clone(),
            generation: self.generation,
            sequence: self.sequence,
            has_tombstone: self.has_tombstones(),
            size: self.size(),
            last_modified: self.last_modified,
            time_range: self.time_range(),
            key_range: self.key_range(),
        }
    }
}
