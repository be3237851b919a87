use std::path::{Path, PathBuf};

use tsmdb_storage::file::WritableFile;
use tsmdb_storage::Writable;

use crate::engine::tsm1::wal::entry::{decode_record, Record, WalEntry};
use crate::error::{io_err, Result};
use crate::WAL_FILE_EXTENSION;

/// WAL_FILE_PREFIX starts every segment file name.
const WAL_FILE_PREFIX: &str = "_";

pub fn segment_file_name(id: u64) -> String {
    format!("{}{:05}.{}", WAL_FILE_PREFIX, id, WAL_FILE_EXTENSION)
}

/// parse_segment_id returns the id of a `_00001.wal` style file name.
pub fn parse_segment_id(path: impl AsRef<Path>) -> Option<u64> {
    path.as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(WAL_FILE_PREFIX))
        .and_then(|n| n.strip_suffix(WAL_FILE_EXTENSION))
        .and_then(|n| n.strip_suffix('.'))
        .and_then(|n| n.parse().ok())
}

/// list_segments returns the segment files of dir ordered by id.
pub async fn list_segments(dir: impl AsRef<Path>) -> Result<Vec<(u64, PathBuf)>> {
    let dir = dir.as_ref();
    let mut segments = vec![];

    let mut rd = tokio::fs::read_dir(dir).await.map_err(io_err(dir))?;
    while let Some(entry) = rd.next_entry().await.map_err(io_err(dir))? {
        let path = entry.path();
        if let Some(id) = parse_segment_id(&path) {
            segments.push((id, path));
        }
    }

    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

/// SegmentWriter appends framed records to one segment file.
pub struct SegmentWriter {
    id: u64,
    fd: WritableFile,
    // a failed record could not be cut back, nothing may follow it
    broken: bool,
}

impl SegmentWriter {
    pub async fn create(dir: &Path, id: u64) -> Result<Self> {
        let path = dir.join(segment_file_name(id));
        let fd = WritableFile::create(&path).await.map_err(io_err(&path))?;
        Ok(Self {
            id,
            fd,
            broken: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.fd.path()
    }

    pub fn size(&self) -> u64 {
        self.fd.size()
    }

    /// is_broken reports whether a failed record may still be in the file.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// write appends and syncs one record. On failure the segment is cut back to where the
    /// record started, so a retry does not leave a partial record behind.
    pub async fn write(&mut self, record: &[u8]) -> Result<()> {
        let start = self.fd.size();

        let res = async {
            self.fd.append(record).await?;
            self.fd.sync().await
        }
        .await;

        if let Err(e) = res {
            if let Err(te) = self.fd.truncate(start).await {
                warn!("failed to roll back wal segment {:?}: {}", self.path(), te);
                self.broken = true;
            }
            return Err(io_err(self.path())(e));
        }
        Ok(())
    }

    pub async fn sync(&mut self) -> Result<()> {
        let path = self.path().to_path_buf();
        self.fd.sync().await.map_err(io_err(path))
    }
}

/// read_segment decodes every record of a segment. A torn or corrupt record ends the segment:
/// the entries before it are returned and the rest is reported with a warning.
pub async fn read_segment(path: impl AsRef<Path>) -> Result<Vec<WalEntry>> {
    let path = path.as_ref();
    let data = tokio::fs::read(path).await.map_err(io_err(path))?;

    let mut entries = vec![];
    let mut offset = 0;
    while offset < data.len() {
        match decode_record(&data[offset..]) {
            Record::Entry(entry, n) => {
                entries.push(entry);
                offset += n;
            }
            Record::Truncated => {
                warn!(
                    "wal segment {:?} ends with a partial record at offset {}, {} bytes dropped",
                    path,
                    offset,
                    data.len() - offset
                );
                break;
            }
            Record::Corrupt(reason) => {
                warn!(
                    "wal segment {:?} has a corrupt record at offset {}: {}, skipping the rest",
                    path, offset, reason
                );
                break;
            }
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use crate::engine::tsm1::value::{Value, Values};

    use super::*;

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(1), "_00001.wal");
        assert_eq!(segment_file_name(123456), "_123456.wal");
        assert_eq!(parse_segment_id("/wal/1/_00042.wal"), Some(42));
        assert_eq!(parse_segment_id("/wal/1/00042.wal"), None);
        assert_eq!(parse_segment_id("/wal/1/_00042.tsm"), None);
    }

    #[tokio::test]
    async fn test_read_segment_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = SegmentWriter::create(dir.as_ref(), 1).await.unwrap();

        let e1 = WalEntry::Write(vec![(
            b"cpu".to_vec(),
            Values::Float(vec![Value::new(1, 1.0)]),
        )]);
        let e2 = WalEntry::DeleteRange {
            keys: vec![b"cpu".to_vec()],
            min: 0,
            max: 10,
        };
        w.write(&e1.encode().unwrap()).await.unwrap();
        w.write(&e2.encode().unwrap()).await.unwrap();

        let rec = e1.encode().unwrap();
        w.write(&rec[..rec.len() / 2]).await.unwrap();
        let path = w.path().to_path_buf();
        drop(w);

        assert_eq!(read_segment(&path).await.unwrap(), vec![e1, e2]);

        let segments = list_segments(dir.as_ref()).await.unwrap();
        assert_eq!(segments, vec![(1, path)]);
    }
}
