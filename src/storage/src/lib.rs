#[macro_use]
extern crate async_trait;

use std::io;

pub mod file;
pub mod mmap;

#[async_trait]
pub trait RandomAccessFile: Send + Sync {
    async fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// len returns the size in bytes of the underlying file.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait RandomAccessFileExt: RandomAccessFile {
    async fn read_u8(&self, offset: u64) -> io::Result<u8> {
        let mut buf = [0; 1];
        self.read(offset, &mut buf).await?;
        Ok(buf[0])
    }

    async fn read_u32(&self, offset: u64) -> io::Result<u32> {
        let mut buf = [0; 4];
        self.read(offset, &mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    async fn read_u64(&self, offset: u64) -> io::Result<u64> {
        let mut buf = [0; 8];
        self.read(offset, &mut buf).await?;
        Ok(u64::from_be_bytes(buf))
    }

    async fn read_vec(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read(offset, &mut buf).await?;
        Ok(buf)
    }
}

impl<R: RandomAccessFile + ?Sized> RandomAccessFileExt for R {}

/// Writable is an append-only sink that can be durably synced.
#[async_trait]
pub trait Writable: Send {
    async fn append(&mut self, data: &[u8]) -> io::Result<usize>;

    async fn flush(&mut self) -> io::Result<()>;

    /// sync flushes and fsyncs the file content.
    async fn sync(&mut self) -> io::Result<()>;

    /// size returns the number of bytes in the file, including bytes not yet synced.
    fn size(&self) -> u64;
}
