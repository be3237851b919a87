use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use tsmdb_storage::file::{TempFile, WritableFile};
use tsmdb_storage::Writable;

use crate::engine::tsm1::block::{block_type, checksum, encode_block};
use crate::engine::tsm1::file_store::index::{IndexEntries, IndexEntry};
use crate::engine::tsm1::file_store::{
    FSYNC_EVERY, HEADER, INDEX_COUNT_SIZE, INDEX_ENTRY_SIZE, INDEX_KEY_LEN_SIZE, INDEX_TYPE_SIZE,
    MAX_INDEX_ENTRIES, MAX_KEY_LENGTH,
};
use crate::engine::tsm1::value::Values;
use crate::error::{invalid_format, io_err, Error, Result};
use crate::COMPACTION_TEMP_EXTENSION;

const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// TSMWriter writes TSM formatted key and values.
#[async_trait]
pub trait TSMWriter {
    /// write writes a new block for key containing and values.  Writes append
    /// blocks in the order that the Write function is called.  The caller is
    /// responsible for ensuring keys and blocks are sorted appropriately.
    /// Values are encoded as a full block.  The caller is responsible for
    /// ensuring a fixed number of values are encoded in each block as well as
    /// ensuring the Values are sorted. The first and last timestamp values are
    /// used as the minimum and maximum values for the index entry.
    async fn write(&mut self, key: &[u8], values: &Values) -> Result<()>;

    /// write_block writes a new block for key containing the bytes in block.  WriteBlock appends
    /// blocks in the order that the WriteBlock function is called.  The caller is
    /// responsible for ensuring keys and blocks are sorted appropriately, and that the
    /// block and index information is correct for the block.  The min_time and max_time
    /// timestamp values are used as the minimum and maximum values for the index entry.
    async fn write_block(
        &mut self,
        key: &[u8],
        min_time: i64,
        max_time: i64,
        block: &[u8],
    ) -> Result<()>;

    /// write_index finishes the TSM write streams and writes the index.
    async fn write_index(&mut self) -> Result<()>;

    /// close flushes and fsyncs the file and moves it to its final name. The index is written
    /// first if write_index has not been called.
    async fn close(self) -> Result<PathBuf>;

    /// size returns the current size in bytes of the file.
    fn size(&self) -> u64;

    /// remove discards everything written so far.
    async fn remove(self) -> Result<()>;
}

/// DefaultTSMWriter streams blocks into `<path>.tmp` and keeps the index in memory until
/// write_index. Dropping an unfinished writer removes the temp file.
pub struct DefaultTSMWriter {
    tmp: TempFile,
    fd: WritableFile,
    buf: BytesMut,

    index: Vec<(Vec<u8>, IndexEntries)>,
    index_size: u64,
    index_written: bool,

    n: u64,

    // The bytes written count of when we last fsync'd
    last_sync: u64,
}

impl DefaultTSMWriter {
    pub async fn new(tsm_path: impl AsRef<Path>) -> Result<Self> {
        let tmp = TempFile::new(tsm_path, COMPACTION_TEMP_EXTENSION);
        let fd = WritableFile::create(tmp.path())
            .await
            .map_err(io_err(tmp.path()))?;

        Ok(Self {
            tmp,
            fd,
            buf: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
            index: vec![],
            index_size: 0,
            index_written: false,
            n: 0,
            last_sync: 0,
        })
    }

    /// path is the final name of the file.
    pub fn path(&self) -> &Path {
        self.tmp.target()
    }

    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    fn write_header(&mut self) {
        self.buf.put_slice(&HEADER);
        self.n = HEADER.len() as u64;
    }

    async fn flush_buf(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.fd
            .append(&self.buf)
            .await
            .map_err(io_err(self.tmp.path()))?;
        self.buf.clear();
        Ok(())
    }

    async fn sync(&mut self) -> Result<()> {
        self.flush_buf().await?;
        self.fd.sync().await.map_err(io_err(self.tmp.path()))
    }

    fn entries_for(&mut self, key: &[u8], typ: u8) -> Result<&mut IndexEntries> {
        let append = match self.index.last() {
            Some((last, entries)) => match key.cmp(last.as_slice()) {
                std::cmp::Ordering::Less => {
                    return Err(Error::UnsortedKeys {
                        key: key.to_vec(),
                        last: last.clone(),
                    })
                }
                std::cmp::Ordering::Equal => {
                    if entries.typ != typ {
                        return Err(Error::FieldTypeConflict {
                            expected: entries.typ,
                            actual: typ,
                        });
                    }
                    false
                }
                std::cmp::Ordering::Greater => true,
            },
            None => true,
        };

        if append {
            self.index.push((key.to_vec(), IndexEntries::new(typ)));
            self.index_size +=
                (INDEX_KEY_LEN_SIZE + key.len() + INDEX_TYPE_SIZE + INDEX_COUNT_SIZE) as u64;
        }

        let (_, entries) = self
            .index
            .last_mut()
            .ok_or_else(|| invalid_format(self.tmp.target(), "empty index"))?;
        Ok(entries)
    }
}

#[async_trait]
impl TSMWriter for DefaultTSMWriter {
    async fn write(&mut self, key: &[u8], values: &Values) -> Result<()> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(Error::MaxKeyLengthExceeded(key.len()));
        }

        // Nothing to write
        if values.is_empty() {
            return Ok(());
        }

        let block = encode_block(values).map_err(|e| {
            invalid_format(
                self.tmp.target(),
                format!(
                    "encode block for key {}: {}",
                    String::from_utf8_lossy(key),
                    e
                ),
            )
        })?;

        self.write_block(key, values.min_time(), values.max_time(), &block)
            .await
    }

    async fn write_block(
        &mut self,
        key: &[u8],
        min_time: i64,
        max_time: i64,
        block: &[u8],
    ) -> Result<()> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(Error::MaxKeyLengthExceeded(key.len()));
        }

        // Nothing to write
        if block.is_empty() {
            return Ok(());
        }

        let typ = block_type(block).map_err(|e| invalid_format(self.tmp.target(), e.to_string()))?;

        let offset = if self.n == 0 {
            HEADER.len() as u64
        } else {
            self.n
        };
        let entry = IndexEntry::new(min_time, max_time, offset, block.len() as u32, checksum(block));

        let entries = self.entries_for(key, typ)?;
        if entries.len() >= MAX_INDEX_ENTRIES {
            return Err(Error::MaxBlocksExceeded(key.to_vec()));
        }
        debug_assert!(
            entries.is_empty() || entries.max_time() < min_time,
            "blocks of a key must be written in time order"
        );
        entries.push(entry);
        self.index_size += INDEX_ENTRY_SIZE as u64;

        // Write header only after we have some data to write.
        if self.n == 0 {
            self.write_header();
        }

        self.buf.put_slice(block);
        self.n += block.len() as u64;

        if self.buf.len() >= WRITE_BUFFER_SIZE {
            self.flush_buf().await?;
        }

        // fsync the file periodically to avoid long pauses with very big files.
        if self.n - self.last_sync > FSYNC_EVERY {
            self.sync().await?;
            self.last_sync = self.n;
        }

        Ok(())
    }

    /// write_index writes the index section of the file.  If there are no index entries to write,
    /// this returns NoValues.
    async fn write_index(&mut self) -> Result<()> {
        if self.index.is_empty() {
            return Err(Error::NoValues);
        }
        if self.index_written {
            return Ok(());
        }

        let index_pos = self.n;

        for (key, entries) in &self.index {
            self.buf.put_u16(key.len() as u16);
            self.buf.put_slice(key);
            self.buf.put_u8(entries.typ);
            self.buf.put_u16(entries.len() as u16);
            self.buf.put_slice(&entries.marshal_binary());

            if self.buf.len() >= WRITE_BUFFER_SIZE {
                self.fd
                    .append(&self.buf)
                    .await
                    .map_err(io_err(self.tmp.path()))?;
                self.buf.clear();
            }
        }

        // Write the index index position
        self.buf.put_u64(index_pos);
        self.n += self.index_size + 8;
        self.index_written = true;

        self.flush_buf().await
    }

    async fn close(mut self) -> Result<PathBuf> {
        self.write_index().await?;
        self.sync().await?;

        let Self { tmp, fd, .. } = self;
        drop(fd);

        let path = tmp.target().to_path_buf();
        tmp.commit().await.map_err(io_err(&path))
    }

    fn size(&self) -> u64 {
        if self.index_written {
            self.n
        } else {
            self.n + self.index_size + 8
        }
    }

    async fn remove(self) -> Result<()> {
        let Self { tmp, fd, .. } = self;
        drop(fd);

        let result = tokio::fs::remove_file(tmp.path()).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(tmp.path())(e)),
        }
    }
}

/// write_tsm_file writes key-ascending series into a new TSM file at path, splitting the values of
/// each key into blocks of at most max_points_per_block points. Values are deduplicated first.
pub async fn write_tsm_file<I>(
    path: impl AsRef<Path>,
    series: I,
    max_points_per_block: usize,
) -> Result<PathBuf>
where
    I: IntoIterator<Item = (Vec<u8>, Values)>,
    I::IntoIter: Send,
{
    let mut w = DefaultTSMWriter::new(path).await?;

    for (key, values) in series {
        for chunk in values.deduplicate().chunks(max_points_per_block) {
            w.write(&key, &chunk).await?;
        }
    }

    w.close().await
}

#[cfg(test)]
mod tests {
    use crate::engine::tsm1::file_store::tsm_file_name;
    use crate::engine::tsm1::value::Value;

    use super::*;

    #[test]
    fn test_crc() {
        let checksum = crc32fast::hash("adsafafas".as_bytes());
        assert_eq!(checksum, 2344674872);
    }

    #[tokio::test]
    async fn test_tsm_writer_layout() {
        let dir = tempfile::tempdir().unwrap();
        let tsm_file = dir.as_ref().join(tsm_file_name(1, 1));

        let mut w = DefaultTSMWriter::new(&tsm_file).await.unwrap();
        let values = Values::Float(vec![Value::new(0, 1.0)]);
        w.write(b"cpu", &values).await.unwrap();
        let block = encode_block(&values).unwrap();

        assert!(dir.as_ref().join("000000001-000000001.tsm.tmp").exists());
        let path = w.close().await.unwrap();
        assert_eq!(path, tsm_file);
        assert!(!dir.as_ref().join("000000001-000000001.tsm.tmp").exists());

        let data = tokio::fs::read(&tsm_file).await.unwrap();
        assert_eq!(&data[..5], &HEADER);
        assert_eq!(&data[5..5 + block.len()], block.as_slice());

        let index_pos = 5 + block.len();
        let mut exp_index = vec![];
        exp_index.put_u16(3);
        exp_index.put_slice(b"cpu");
        exp_index.put_u8(values.block_type());
        exp_index.put_u16(1);
        IndexEntry::new(0, 0, 5, block.len() as u32, checksum(&block)).append_to(&mut exp_index);
        exp_index.put_u64(index_pos as u64);

        assert_eq!(&data[index_pos..], exp_index.as_slice());
    }

    #[tokio::test]
    async fn test_tsm_writer_no_values() {
        let dir = tempfile::tempdir().unwrap();
        let tsm_file = dir.as_ref().join(tsm_file_name(1, 1));

        let mut w = DefaultTSMWriter::new(&tsm_file).await.unwrap();
        assert!(matches!(w.write_index().await, Err(Error::NoValues)));
        assert!(matches!(w.close().await, Err(Error::NoValues)));

        // the failed close must not leave anything behind
        let mut rd = tokio::fs::read_dir(dir.as_ref()).await.unwrap();
        assert!(rd.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tsm_writer_unsorted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let tsm_file = dir.as_ref().join(tsm_file_name(1, 1));

        let mut w = DefaultTSMWriter::new(&tsm_file).await.unwrap();
        w.write(b"mem", &Values::Integer(vec![Value::new(1, 1)]))
            .await
            .unwrap();
        let err = w
            .write(b"cpu", &Values::Integer(vec![Value::new(1, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsortedKeys { .. }));

        let err = w
            .write(b"mem", &Values::Float(vec![Value::new(2, 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FieldTypeConflict { .. }));

        w.remove().await.unwrap();
        assert!(!dir.as_ref().join("000000001-000000001.tsm.tmp").exists());
        assert!(!tsm_file.exists());
    }

    #[tokio::test]
    async fn test_tsm_writer_drop_discards_temp() {
        let dir = tempfile::tempdir().unwrap();
        let tsm_file = dir.as_ref().join(tsm_file_name(2, 1));

        {
            let mut w = DefaultTSMWriter::new(&tsm_file).await.unwrap();
            w.write(b"cpu", &Values::Bool(vec![Value::new(1, true)]))
                .await
                .unwrap();
        }

        assert!(!dir.as_ref().join("000000002-000000001.tsm.tmp").exists());
        assert!(!tsm_file.exists());
    }

    #[tokio::test]
    async fn test_tsm_writer_max_key_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = DefaultTSMWriter::new(dir.as_ref().join(tsm_file_name(1, 1)))
            .await
            .unwrap();
        let key = vec![b'a'; MAX_KEY_LENGTH + 1];
        let err = w
            .write(&key, &Values::Float(vec![Value::new(1, 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MaxKeyLengthExceeded(_)));
    }

    #[tokio::test]
    async fn test_write_tsm_file_splits_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let tsm_file = dir.as_ref().join(tsm_file_name(1, 1));

        let values = Values::Integer((0..25).map(|i| Value::new(i, i)).collect());
        write_tsm_file(&tsm_file, vec![(b"cpu".to_vec(), values)], 10)
            .await
            .unwrap();

        let data = tokio::fs::read(&tsm_file).await.unwrap();
        let footer = u64::from_be_bytes(data[data.len() - 8..].try_into().unwrap()) as usize;
        // key len + key + type, then the block count
        let count = u16::from_be_bytes(data[footer + 6..footer + 8].try_into().unwrap());
        assert_eq!(count, 3);
    }
}
