use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::Writable;

pub struct WritableFile {
    path: PathBuf,
    f: File,
    n: u64,
}

impl WritableFile {
    /// create opens a new file, failing if it already exists.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = OpenOptions::new()
            .create_new(true)
            .write(true)
            .append(true)
            .open(path.as_ref())
            .await?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            f,
            n: 0,
        })
    }

    /// open_append opens an existing file (or creates it) positioned at its end.
    pub async fn open_append(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        let n = f.metadata().await?.len();

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            f,
            n,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// truncate discards everything after `len`, used to roll back a partially appended record.
    pub async fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.f.flush().await?;
        self.f.set_len(len).await?;
        self.n = len;
        Ok(())
    }
}

#[async_trait]
impl Writable for WritableFile {
    async fn append(&mut self, data: &[u8]) -> io::Result<usize> {
        self.f.write_all(data).await?;
        self.n += data.len() as u64;
        Ok(data.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.f.flush().await
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.f.flush().await?;
        self.f.sync_all().await
    }

    fn size(&self) -> u64 {
        self.n
    }
}

#[cfg(test)]
mod tests {
    use crate::file::WritableFile;
    use crate::Writable;

    #[tokio::test]
    async fn test_append_and_truncate() -> std::io::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.as_ref().join("log");

        let mut w = WritableFile::create(&path).await?;
        w.append(b"hello").await?;
        w.append(b" world").await?;
        w.sync().await?;
        assert_eq!(w.size(), 11);

        w.truncate(5).await?;
        w.append(b"!").await?;
        w.sync().await?;
        drop(w);

        assert_eq!(tokio::fs::read(&path).await?, b"hello!".to_vec());

        let w = WritableFile::open_append(&path).await?;
        assert_eq!(w.size(), 6);
        assert!(WritableFile::create(&path).await.is_err());

        Ok(())
    }
}
