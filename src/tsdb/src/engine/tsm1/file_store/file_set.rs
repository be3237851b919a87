use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::tsm1::file_store::reader::{DefaultTSMReader, TSMReader};
use crate::engine::tsm1::file_store::stat::FileStat;
use crate::engine::tsm1::file_store::{parse_tsm_file_name, TimeRange};
use crate::engine::tsm1::value::Values;
use crate::error::{io_err, Result};
use crate::{BAD_TSM_FILE_EXTENSION, COMPACTION_TEMP_EXTENSION, TSM_FILE_EXTENSION};

/// FileSet is an immutable view of the TSM files of a shard, ordered by generation then
/// sequence. Later files win over earlier ones for the same key and timestamp.
#[derive(Default)]
pub struct FileSet {
    readers: Vec<Arc<DefaultTSMReader>>,
}

impl FileSet {
    pub fn new(mut readers: Vec<Arc<DefaultTSMReader>>) -> Self {
        readers.sort_by_key(|r| (r.generation(), r.sequence()));
        Self { readers }
    }

    pub fn readers(&self) -> &[Arc<DefaultTSMReader>] {
        &self.readers
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    pub fn stats(&self) -> Vec<FileStat> {
        self.readers.iter().map(|r| r.stats()).collect()
    }

    pub fn find(&self, path: &Path) -> Option<&Arc<DefaultTSMReader>> {
        self.readers.iter().find(|r| r.path() == path)
    }

    /// read merges the points of key across all files, later files winning on equal timestamps.
    pub async fn read(&self, key: &[u8], time_range: TimeRange) -> Result<Option<Values>> {
        let mut merged: Option<Values> = None;
        for r in &self.readers {
            if !r.contains(key) {
                continue;
            }
            if let Some(values) = r.read(key, time_range).await? {
                merged = Some(match merged {
                    Some(m) => m.merge(values)?,
                    None => values,
                });
            }
        }
        Ok(merged)
    }

    /// block_type returns the block type of key in the newest file holding it.
    pub fn block_type(&self, key: &[u8]) -> Option<u8> {
        self.readers.iter().rev().find_map(|r| r.block_type(key))
    }

    pub fn max_generation(&self) -> u64 {
        self.readers.iter().map(|r| r.generation()).max().unwrap_or_default()
    }
}

/// FileStore holds the current FileSet of a shard. Readers take the current set once per
/// query, structural changes swap a whole new set in.
pub struct FileStore {
    dir: PathBuf,
    files: RwLock<Arc<FileSet>>,
    current_generation: AtomicU64,
}

impl FileStore {
    /// open loads every TSM file of dir. Leftover temp files are removed and files that fail
    /// the integrity checks are renamed with a `.bad` extension.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

        let mut readers = vec![];
        let mut rd = tokio::fs::read_dir(&dir).await.map_err(io_err(&dir))?;
        while let Some(entry) = rd.next_entry().await.map_err(io_err(&dir))? {
            let path = entry.path();
            let ext = path.extension().and_then(|x| x.to_str()).unwrap_or_default();

            if ext == COMPACTION_TEMP_EXTENSION {
                info!("removing stale temp file {:?}", path);
                tokio::fs::remove_file(&path).await.map_err(io_err(&path))?;
                continue;
            }
            if ext != TSM_FILE_EXTENSION {
                continue;
            }
            if parse_tsm_file_name(&path).is_none() {
                warn!("skipping tsm file with unexpected name {:?}", path);
                continue;
            }

            match DefaultTSMReader::open(&path).await {
                Ok(r) => readers.push(Arc::new(r)),
                Err(e) if e.is_integrity() => {
                    let bad = path.with_extension(format!(
                        "{}.{}",
                        TSM_FILE_EXTENSION, BAD_TSM_FILE_EXTENSION
                    ));
                    error!("cannot read corrupt tsm file {:?}, renaming to {:?}: {}", path, bad, e);
                    tokio::fs::rename(&path, &bad).await.map_err(io_err(&path))?;
                }
                Err(e) => return Err(e),
            }
        }

        let set = FileSet::new(readers);
        let current_generation = set.max_generation();
        info!("opened {} tsm files in {:?}", set.len(), dir);

        Ok(Self {
            dir,
            files: RwLock::new(Arc::new(set)),
            current_generation: AtomicU64::new(current_generation),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// files returns the current file set.
    pub fn files(&self) -> Arc<FileSet> {
        self.files.read().clone()
    }

    pub fn stats(&self) -> Vec<FileStat> {
        self.files().stats()
    }

    /// next_generation reserves a new generation for a snapshot file.
    pub fn next_generation(&self) -> u64 {
        self.current_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// replace swaps in a new file set without the `old` files and with the `new` ones, and
    /// returns the readers that were removed. The removed files are left on disk.
    pub fn replace(
        &self,
        old: &[PathBuf],
        new: Vec<Arc<DefaultTSMReader>>,
    ) -> Vec<Arc<DefaultTSMReader>> {
        let mut files = self.files.write();

        let mut removed = vec![];
        let mut readers = Vec::with_capacity(files.len() + new.len());
        for r in files.readers() {
            if old.iter().any(|p| p.as_path() == r.path()) {
                removed.push(r.clone());
            } else {
                readers.push(r.clone());
            }
        }

        for r in &new {
            self.current_generation
                .fetch_max(r.generation(), Ordering::SeqCst);
        }
        readers.extend(new);

        *files = Arc::new(FileSet::new(readers));
        removed
    }

    /// read merges the points of key across the current file set.
    pub async fn read(&self, key: &[u8], time_range: TimeRange) -> Result<Option<Values>> {
        self.files().read(key, time_range).await
    }

    /// delete_range records tombstones in every file holding the keys.
    pub async fn delete_range(&self, keys: &[Vec<u8>], min: i64, max: i64) -> Result<()> {
        let files = self.files();
        for r in files.readers() {
            if !r.stats().overlaps_time_range(min, max) {
                continue;
            }
            r.delete_range(keys, min, max).await?;
        }
        Ok(())
    }

    /// last_modified returns the newest modification time of the files, in unix nanoseconds.
    pub fn last_modified(&self) -> i64 {
        self.files()
            .readers()
            .iter()
            .map(|r| r.last_modified())
            .max()
            .unwrap_or_default()
    }
}

/// remove_files deletes the given files and their tombstones. Failures are logged and skipped.
pub async fn remove_files(readers: &[Arc<DefaultTSMReader>]) -> usize {
    let mut failed = 0;
    for r in readers {
        if let Err(e) = r.remove().await {
            failed += 1;
            warn!("failed to remove superseded tsm file {:?}: {}", r.path(), e);
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use crate::engine::tsm1::file_store::tsm_file_name;
    use crate::engine::tsm1::file_store::writer::write_tsm_file;
    use crate::engine::tsm1::value::Value;

    use super::*;

    fn floats(points: &[(i64, f64)]) -> Values {
        Values::Float(points.iter().map(|(t, v)| Value::new(*t, *v)).collect())
    }

    async fn write(dir: &Path, generation: u64, key: &str, values: Values) -> PathBuf {
        write_tsm_file(
            dir.join(tsm_file_name(generation, 1)),
            vec![(key.as_bytes().to_vec(), values)],
            1000,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_file_store_open_and_read() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.as_ref(), 2, "cpu", floats(&[(1, 10.0), (3, 30.0)])).await;
        write(dir.as_ref(), 1, "cpu", floats(&[(1, 1.0), (2, 2.0)])).await;
        tokio::fs::write(dir.as_ref().join("000000003-000000001.tsm.tmp"), b"partial")
            .await
            .unwrap();
        tokio::fs::write(dir.as_ref().join(tsm_file_name(4, 1)), b"garbage")
            .await
            .unwrap();

        let fs = FileStore::open(dir.as_ref()).await.unwrap();
        assert_eq!(fs.files().len(), 2);
        assert!(!dir.as_ref().join("000000003-000000001.tsm.tmp").exists());
        assert!(dir.as_ref().join("000000004-000000001.tsm.bad").exists());
        assert_eq!(fs.next_generation(), 3);

        let got = fs.read(b"cpu", TimeRange::unbound()).await.unwrap();
        assert_eq!(got, Some(floats(&[(1, 10.0), (2, 2.0), (3, 30.0)])));
        assert_eq!(fs.read(b"mem", TimeRange::unbound()).await.unwrap(), None);

        fs.delete_range(&[b"cpu".to_vec()], 1, 2).await.unwrap();
        let got = fs.read(b"cpu", TimeRange::unbound()).await.unwrap();
        assert_eq!(got, Some(floats(&[(3, 30.0)])));
    }

    #[tokio::test]
    async fn test_file_store_replace() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write(dir.as_ref(), 1, "cpu", floats(&[(1, 1.0)])).await;
        let p2 = write(dir.as_ref(), 2, "cpu", floats(&[(2, 2.0)])).await;

        let fs = FileStore::open(dir.as_ref()).await.unwrap();
        let before = fs.files();

        let merged = write_tsm_file(
            dir.as_ref().join(tsm_file_name(2, 2)),
            vec![(b"cpu".to_vec(), floats(&[(1, 1.0), (2, 2.0)]))],
            1000,
        )
        .await
        .unwrap();
        let merged = Arc::new(DefaultTSMReader::open(&merged).await.unwrap());

        let removed = fs.replace(&[p1.clone(), p2.clone()], vec![merged]);
        assert_eq!(removed.len(), 2);
        assert_eq!(fs.files().len(), 1);

        // the old snapshot still reads the superseded files
        assert_eq!(before.len(), 2);
        assert_eq!(remove_files(&removed).await, 0);
        assert!(!p1.exists() && !p2.exists());
        let got = before.read(b"cpu", TimeRange::unbound()).await.unwrap();
        assert_eq!(got, Some(floats(&[(1, 1.0), (2, 2.0)])));

        let got = fs.read(b"cpu", TimeRange::unbound()).await.unwrap();
        assert_eq!(got, Some(floats(&[(1, 1.0), (2, 2.0)])));
    }
}
