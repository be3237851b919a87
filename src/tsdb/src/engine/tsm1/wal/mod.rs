use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::engine::tsm1::file_store::MAX_KEY_LENGTH;
use crate::engine::tsm1::value::Values;
use crate::error::{invalid_format, io_err, Error, Result};

mod entry;
mod segment;

pub use entry::{decode_record, Record, WalEntry, DELETE_RANGE_ENTRY_TYPE, WRITE_ENTRY_TYPE};
pub use segment::{list_segments, parse_segment_id, read_segment, segment_file_name};

use segment::SegmentWriter;

/// RETRY_BACKOFF is the pause between two attempts of a failed append.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Wal is the write ahead log of a shard. Every write and delete is appended and synced to
/// the current segment before it is applied to the cache, so that the cache can be rebuilt
/// by replaying the segments after a crash.
pub struct Wal {
    dir: PathBuf,
    segment_size: u64,
    write_timeout: Duration,
    inner: Mutex<WalInner>,
}

struct WalInner {
    current: Option<SegmentWriter>,
    last_id: u64,
    closed: bool,
}

impl Wal {
    /// open prepares the WAL of dir. Existing segments are left untouched for replay, new
    /// records always go to a new segment.
    pub async fn open(
        dir: impl AsRef<Path>,
        segment_size: u64,
        write_timeout: Duration,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

        let last_id = list_segments(&dir)
            .await?
            .last()
            .map(|(id, _)| *id)
            .unwrap_or_default();

        Ok(Self {
            dir,
            segment_size,
            write_timeout,
            inner: Mutex::new(WalInner {
                current: None,
                last_id,
                closed: false,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// write logs the values of every key as one record.
    pub async fn write(&self, values: &[(Vec<u8>, Values)]) -> Result<()> {
        for (key, _) in values {
            if key.len() > MAX_KEY_LENGTH {
                return Err(Error::MaxKeyLengthExceeded(key.len()));
            }
        }
        self.write_entry(&WalEntry::Write(values.to_vec())).await
    }

    /// delete_range logs the deletion of [min, max] from keys.
    pub async fn delete_range(&self, keys: &[Vec<u8>], min: i64, max: i64) -> Result<()> {
        self.write_entry(&WalEntry::DeleteRange {
            keys: keys.to_vec(),
            min,
            max,
        })
        .await
    }

    async fn write_entry(&self, entry: &WalEntry) -> Result<()> {
        let record = entry
            .encode()
            .map_err(|e| invalid_format(&self.dir, e.to_string()))?;
        self.append_with_retry(&record).await
    }

    /// append_with_retry retries a failed append until the write timeout. An append still
    /// running at the deadline may complete in the background, so its segment is abandoned
    /// and later records go to a new one: a late or torn record can then never hide records
    /// acknowledged after it.
    async fn append_with_retry(&self, record: &[u8]) -> Result<()> {
        let deadline = Instant::now() + self.write_timeout;
        let mut inner = match tokio::time::timeout_at(deadline, self.inner.lock()).await {
            Ok(inner) => inner,
            Err(_) => return Err(Error::WriteTimeout(self.write_timeout)),
        };
        if inner.closed {
            return Err(Error::EngineClosed);
        }

        loop {
            match tokio::time::timeout_at(deadline, self.append(&mut inner, record)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    if Instant::now() + RETRY_BACKOFF >= deadline {
                        return Err(e);
                    }
                    warn!("wal append failed, retrying: {}", e);
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(_) => {
                    if let Some(w) = inner.current.take() {
                        warn!(
                            "wal append to {:?} timed out, abandoning the segment",
                            w.path()
                        );
                    }
                    return Err(Error::WriteTimeout(self.write_timeout));
                }
            }
        }
    }

    async fn append(&self, inner: &mut WalInner, record: &[u8]) -> Result<()> {
        let roll = match &inner.current {
            Some(w) if w.is_broken() => true,
            Some(w) => w.size() > 0 && w.size() + record.len() as u64 > self.segment_size,
            None => true,
        };
        if roll {
            self.roll_segment(inner).await?;
        }

        match inner.current.as_mut() {
            Some(w) => w.write(record).await,
            None => Err(Error::EngineClosed),
        }
    }

    async fn roll_segment(&self, inner: &mut WalInner) -> Result<()> {
        if let Some(mut w) = inner.current.take() {
            if !w.is_broken() {
                w.sync().await?;
            }
        }

        // taken before the file exists, a create abandoned halfway never collides with the next
        inner.last_id += 1;
        let w = SegmentWriter::create(&self.dir, inner.last_id).await?;
        inner.current = Some(w);
        Ok(())
    }

    /// close_segment closes the current segment and returns the paths of every segment up to
    /// and including it. Records written afterwards go to a new segment.
    pub async fn close_segment(&self) -> Result<Vec<PathBuf>> {
        let mut inner = self.inner.lock().await;
        if let Some(mut w) = inner.current.take() {
            w.sync().await?;
        }

        let last_id = inner.last_id;
        Ok(list_segments(&self.dir)
            .await?
            .into_iter()
            .filter(|(id, _)| *id <= last_id)
            .map(|(_, path)| path)
            .collect())
    }

    /// remove deletes segments whose content is persisted in TSM files.
    pub async fn remove(&self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(path)(e)),
            }
        }
        Ok(())
    }

    /// replay calls f with every entry of every segment, oldest first.
    pub async fn replay<F>(&self, mut f: F) -> Result<usize>
    where
        F: FnMut(WalEntry) -> Result<()>,
    {
        let mut n = 0;
        for (_, path) in list_segments(&self.dir).await? {
            let entries = read_segment(&path).await?;
            debug!("replaying {} wal entries from {:?}", entries.len(), path);
            for entry in entries {
                f(entry)?;
                n += 1;
            }
        }
        Ok(n)
    }

    /// close syncs the current segment. Later appends fail with EngineClosed.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        if let Some(mut w) = inner.current.take() {
            w.sync().await?;
        }
        Ok(())
    }
}
