use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common_base::point::series_field_key;
use tokio_util::sync::CancellationToken;
use tsmdb_utils::time::now_unix_nano;

use crate::cache::Cache;
use crate::config::Config;
use crate::engine::tsm1::compact::{CompactionState, Compactor, Planner};
use crate::engine::tsm1::file_store::file_set::remove_files;
use crate::engine::tsm1::file_store::reader::{DefaultTSMReader, TSMReader};
use crate::engine::tsm1::file_store::writer::write_tsm_file;
use crate::engine::tsm1::file_store::{tsm_file_name, FileStore, TimeRange};
use crate::engine::tsm1::value::Values;
use crate::engine::tsm1::wal::{Wal, WalEntry};
use crate::error::{Error, Result};

/// Engine is the storage engine of one shard. Writes go to the WAL and then the cache, the
/// cache is periodically snapshotted into TSM files and those are compacted in the
/// background.
pub struct Engine {
    id: u64,
    config: Config,

    file_store: FileStore,
    cache: Cache,
    wal: Wal,

    planner: Planner,
    compactor: Compactor,
    compaction_state: parking_lot::Mutex<CompactionState>,

    /// serializes changes of the file set: snapshots, compaction publishing and deletes.
    structure: tokio::sync::Mutex<()>,

    /// held by a write from validation until the cache holds its values, and by a snapshot
    /// while it rolls the WAL and swaps the cache. A WAL segment a snapshot removes then
    /// never holds values the snapshot missed.
    writes: tokio::sync::Mutex<()>,

    closed: AtomicBool,
}

impl Engine {
    /// open loads the TSM files of the shard and replays its WAL into the cache.
    pub async fn open(config: Config, id: u64) -> Result<Self> {
        config.validate()?;

        let data_dir = config.data_dir(id);
        let file_store = FileStore::open(&data_dir).await?;
        let wal = Wal::open(
            config.wal_dir(id),
            config.wal_segment_size,
            config.write_timeout,
        )
        .await?;

        // replay is not bounded by the memory limit, the points were already acknowledged
        let cache = Cache::new(0);
        let replayed = wal
            .replay(|entry| {
                match entry {
                    WalEntry::Write(values) => {
                        if let Err(e) = cache.write_multi(values) {
                            warn!("shard {}: skipping wal values on replay: {}", id, e);
                        }
                    }
                    WalEntry::DeleteRange { keys, min, max } => {
                        cache.delete_range(&keys, min, max);
                    }
                }
                Ok(())
            })
            .await?;
        cache.set_max_size(config.cache_max_memory_size);

        info!(
            "shard {} opened: {} tsm files, {} wal entries replayed, cache size {}",
            id,
            file_store.files().len(),
            replayed,
            cache.size()
        );

        Ok(Self {
            id,
            planner: Planner::new(
                config.compact_min_files,
                config.compact_full_write_cold_duration,
            ),
            compactor: Compactor::new(&data_dir, config.max_points_per_block),
            config,
            file_store,
            cache,
            wal,
            compaction_state: parking_lot::Mutex::new(CompactionState::Idle),
            structure: tokio::sync::Mutex::new(()),
            writes: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn file_store(&self) -> &FileStore {
        &self.file_store
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn compaction_state(&self) -> CompactionState {
        *self.compaction_state.lock()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::EngineClosed);
        }
        Ok(())
    }

    pub async fn write(&self, key: &[u8], values: Values) -> Result<()> {
        self.write_multi(vec![(key.to_vec(), values)]).await
    }

    /// write_fields writes the values of each field of a series under its composite key.
    pub async fn write_fields(&self, series: &[u8], fields: Vec<(&[u8], Values)>) -> Result<()> {
        let values = fields
            .into_iter()
            .map(|(field, v)| (series_field_key(series, field), v))
            .collect();
        self.write_multi(values).await
    }

    /// write_multi appends the values to the WAL and then adds them to the cache. Once it
    /// returns Ok, the values are durable and visible to reads. When it fails, none of them
    /// were written.
    pub async fn write_multi(&self, values: Vec<(Vec<u8>, Values)>) -> Result<()> {
        self.check_open()?;

        let values: Vec<_> = values.into_iter().filter(|(_, v)| !v.is_empty()).collect();
        if values.is_empty() {
            return Ok(());
        }

        let files = self.file_store.files();
        for (key, v) in &values {
            if let Some(typ) = files.block_type(key) {
                if typ != v.block_type() {
                    return Err(Error::FieldTypeConflict {
                        expected: typ,
                        actual: v.block_type(),
                    });
                }
            }
        }

        let _writes = self.writes.lock().await;
        // With writers serialized the cache can only shrink until the update below, so a
        // batch that validates here cannot fail there.
        self.cache.validate(&values)?;
        self.wal.write(&values).await?;
        self.cache.write_multi(values)
    }

    /// read returns the points of key within the time range, merged across the TSM files and
    /// the cache. None if the key has no points anywhere.
    pub async fn read(&self, key: &[u8], time_range: TimeRange) -> Result<Option<Values>> {
        self.check_open()?;

        // The cache is read first: a snapshot published in between is then seen twice, never
        // missed.
        let cached = self
            .cache
            .values(key)?
            .map(|v| v.include(time_range.min, time_range.max));

        let files = self.file_store.files();
        let stored = files.read(key, time_range).await?;

        match (stored, cached) {
            (None, None) => Ok(None),
            (Some(v), None) | (None, Some(v)) => Ok(Some(v)),
            (Some(s), Some(c)) => Ok(Some(s.merge(c)?)),
        }
    }

    /// delete_range removes the points of keys within [min, max] from the WAL, the cache and
    /// every TSM file holding them.
    pub async fn delete_range(&self, keys: &[Vec<u8>], min: i64, max: i64) -> Result<()> {
        self.check_open()?;
        if keys.is_empty() || min > max {
            return Ok(());
        }

        let _guard = self.structure.lock().await;
        self.wal.delete_range(keys, min, max).await?;
        self.cache.delete_range(keys, min, max);
        self.file_store.delete_range(keys, min, max).await
    }

    /// should_snapshot reports whether the cache is big enough, or has been idle long
    /// enough, to be written out.
    pub fn should_snapshot(&self) -> bool {
        let size = self.cache.size();
        if size == 0 {
            return false;
        }
        size > self.config.cache_snapshot_memory_size
            || self.since_last_write() >= self.config.cache_snapshot_write_cold_duration
    }

    fn since_last_write(&self) -> Duration {
        let elapsed = now_unix_nano().saturating_sub(self.cache.last_write());
        Duration::from_nanos(elapsed.max(0) as u64)
    }

    /// write_snapshot writes the cache to a new TSM file and drops the WAL segments it covers.
    /// Returns the path of the new file, None if the cache was empty.
    pub async fn write_snapshot(&self) -> Result<Option<PathBuf>> {
        self.check_open()?;
        let _guard = self.structure.lock().await;

        let (segments, snapshot) = {
            let _writes = self.writes.lock().await;
            let segments = self.wal.close_segment().await?;
            (segments, self.cache.snapshot())
        };

        let series: Vec<_> = snapshot
            .keys(true)
            .into_iter()
            .filter_map(|key| {
                let values = snapshot.entry(&key)?.values();
                (!values.is_empty()).then_some((key, values))
            })
            .collect();

        if series.is_empty() {
            self.cache.clear_snapshot(true);
            self.wal.remove(&segments).await?;
            return Ok(None);
        }

        let generation = self.file_store.next_generation();
        let path = self
            .file_store
            .dir()
            .join(tsm_file_name(generation, 1));
        let keys = series.len();

        let reader = match self.write_snapshot_file(&path, series).await {
            Ok(r) => r,
            Err(e) => {
                error!("shard {}: failed to write snapshot {:?}: {}", self.id, path, e);
                self.cache.clear_snapshot(false);
                return Err(e);
            }
        };

        self.file_store.replace(&[], vec![Arc::new(reader)]);
        self.cache.clear_snapshot(true);
        self.wal.remove(&segments).await?;

        info!(
            "shard {}: snapshot of {} keys written to {:?}",
            self.id, keys, path
        );
        Ok(Some(path))
    }

    async fn write_snapshot_file(
        &self,
        path: &std::path::Path,
        series: Vec<(Vec<u8>, Values)>,
    ) -> Result<DefaultTSMReader> {
        let path = write_tsm_file(path, series, self.config.max_points_per_block).await?;
        match DefaultTSMReader::open(&path).await {
            Ok(r) => Ok(r),
            Err(e) => {
                if let Err(re) = tokio::fs::remove_file(&path).await {
                    warn!("failed to remove unreadable snapshot {:?}: {}", path, re);
                }
                Err(e)
            }
        }
    }

    /// compact plans and runs one compaction. Returns the new files, None when there was
    /// nothing to do or another compaction is running. Cancelling the token before
    /// publishing leaves the shard untouched and returns CompactionAborted.
    pub async fn compact(&self, cancel: &CancellationToken) -> Result<Option<Vec<PathBuf>>> {
        self.check_open()?;

        let state = match StateGuard::enter(&self.compaction_state) {
            Some(state) => state,
            None => return Ok(None),
        };

        let files = self.file_store.files();
        let group = match self.planner.plan(&files.stats(), self.since_last_write()) {
            Some(group) => group,
            None => return Ok(None),
        };

        let mut inputs = Vec::with_capacity(group.files.len());
        for path in &group.files {
            match files.find(path) {
                Some(r) => inputs.push(r.clone()),
                None => {
                    return Err(Error::CompactionAborted {
                        reason: format!("planned file {:?} is not in the file set", path),
                    })
                }
            }
        }
        let versions: Vec<u64> = inputs.iter().map(|r| r.tombstone_version()).collect();

        let generation = inputs.iter().map(|r| r.generation()).max().unwrap_or_default();
        let sequence = files
            .readers()
            .iter()
            .filter(|r| r.generation() == generation)
            .map(|r| r.sequence())
            .max()
            .unwrap_or_default()
            + 1;

        info!(
            "shard {}: {} compaction of {} files into generation {}",
            self.id,
            group.kind,
            inputs.len(),
            generation
        );

        state.set(CompactionState::Merging);
        let outputs = self
            .compactor
            .compact(&inputs, generation, sequence, cancel)
            .await?;

        let _guard = self.structure.lock().await;

        let reason = if cancel.is_cancelled() {
            Some("compaction cancelled".to_string())
        } else {
            inputs
                .iter()
                .zip(&versions)
                .find(|(r, v)| r.tombstone_version() != **v)
                .map(|(r, _)| format!("{:?} gained tombstones during compaction", r.path()))
        };
        if let Some(reason) = reason {
            discard(&outputs).await;
            return Err(Error::CompactionAborted { reason });
        }

        state.set(CompactionState::Publishing);
        let mut readers = Vec::with_capacity(outputs.len());
        for path in &outputs {
            match DefaultTSMReader::open(path).await {
                Ok(r) => readers.push(Arc::new(r)),
                Err(e) => {
                    discard(&outputs).await;
                    return Err(e);
                }
            }
        }

        let removed = self.file_store.replace(&group.files, readers);
        let failed = remove_files(&removed).await;
        if failed > 0 {
            warn!(
                "shard {}: {} superseded files could not be removed",
                self.id, failed
            );
        }

        info!(
            "shard {}: compaction published {} files replacing {}",
            self.id,
            outputs.len(),
            removed.len()
        );
        Ok(Some(outputs))
    }

    /// run snapshots and compacts the shard every interval until cancel fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if self.should_snapshot() {
                if let Err(e) = self.write_snapshot().await {
                    error!("shard {}: snapshot failed: {}", self.id, e);
                }
            }

            match self.compact(&cancel).await {
                Ok(_) => {}
                Err(Error::CompactionAborted { reason }) => {
                    info!("shard {}: compaction aborted: {}", self.id, reason)
                }
                Err(Error::EngineClosed) => return,
                Err(e) => error!("shard {}: compaction failed: {}", self.id, e),
            }
        }
    }

    /// close stops accepting writes and syncs the WAL. Unsnapshotted points stay in the WAL
    /// and are replayed on the next open.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.structure.lock().await;
        self.wal.close().await?;
        info!("shard {} closed", self.id);
        Ok(())
    }
}

async fn discard(outputs: &[PathBuf]) {
    for path in outputs {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("failed to remove compaction output {:?}: {}", path, e);
        }
    }
}

/// StateGuard holds the compaction slot of a shard and resets it to Idle when dropped.
struct StateGuard<'a> {
    state: &'a parking_lot::Mutex<CompactionState>,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a parking_lot::Mutex<CompactionState>) -> Option<Self> {
        let mut s = state.lock();
        if *s != CompactionState::Idle {
            return None;
        }
        *s = CompactionState::Planning;
        Some(Self { state })
    }

    fn set(&self, s: CompactionState) {
        *self.state.lock() = s;
    }
}

impl<'a> Drop for StateGuard<'a> {
    fn drop(&mut self) {
        *self.state.lock() = CompactionState::Idle;
    }
}
