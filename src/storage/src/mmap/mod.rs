use std::io;
use std::io::ErrorKind;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use tokio::fs::File;

use crate::RandomAccessFile;

/// MmapReadableFile maps an immutable file into memory. A zero length file has
/// no mapping and every non-empty read fails with `UnexpectedEof`.
pub struct MmapReadableFile {
    _f: File,
    len: usize,
    mmap: Option<Mmap>,
}

impl MmapReadableFile {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = File::open(path).await?;

        let meta = f.metadata().await?;
        let len = meta.len() as usize;

        let mmap = if len == 0 {
            None
        } else {
            // The mapped files are never written to after they are closed for writing.
            Some(unsafe { MmapOptions::new().offset(0).len(len).map(&f)? })
        };

        Ok(Self { _f: f, len, mmap })
    }

    /// bytes borrows `size` bytes at `offset` directly from the mapping.
    pub fn bytes(&self, offset: u64, size: usize) -> io::Result<&[u8]> {
        let offset = offset as usize;
        let upper = offset
            .checked_add(size)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "read range overflow"))?;
        if upper > self.len {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("read [{}, {}) beyond file size {}", offset, upper, self.len),
            ));
        }

        match &self.mmap {
            Some(mmap) => Ok(&mmap[offset..upper]),
            None => Ok(&[]),
        }
    }
}

#[async_trait]
impl RandomAccessFile for MmapReadableFile {
    async fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let size = buf.len();
        if size == 0 {
            return Ok(0);
        }

        let data = self.bytes(offset, size)?;
        buf.copy_from_slice(data);

        Ok(size)
    }

    fn len(&self) -> u64 {
        self.len as u64
    }
}
