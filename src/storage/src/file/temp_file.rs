use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use crate::file::sync_dir;

/// TempFile names a `<target>.tmp` path that is renamed onto `target` by `commit`.
/// Dropping an uncommitted guard removes whatever was written to the temporary path,
/// so a failed or abandoned write never leaves a file visible under the final name.
#[derive(Debug)]
pub struct TempFile {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl TempFile {
    pub fn new(target: impl AsRef<Path>, ext: &str) -> Self {
        let target = target.as_ref().to_path_buf();
        let mut tmp = OsString::from(target.as_os_str());
        tmp.push(".");
        tmp.push(ext);

        Self {
            tmp: PathBuf::from(tmp),
            target,
            committed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.tmp
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// commit atomically renames the temporary file to its target and fsyncs the parent directory.
    pub async fn commit(mut self) -> io::Result<PathBuf> {
        tokio::fs::rename(&self.tmp, &self.target).await?;
        self.committed = true;

        if let Some(dir) = self.target.parent() {
            if !dir.as_os_str().is_empty() {
                sync_dir(dir).await?;
            }
        }

        Ok(self.target.clone())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        if let Err(e) = std::fs::remove_file(&self.tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("failed to remove temp file {:?}: {}", self.tmp, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::file::{TempFile, WritableFile};
    use crate::Writable;

    #[tokio::test]
    async fn test_commit_renames() -> std::io::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.as_ref().join("000000001-000000001.tsm");

        let tmp = TempFile::new(&target, "tmp");
        assert!(tmp.path().to_string_lossy().ends_with(".tsm.tmp"));

        let mut w = WritableFile::create(tmp.path()).await?;
        w.append(b"data").await?;
        w.sync().await?;

        let path = tmp.commit().await?;
        assert_eq!(path, target);
        assert_eq!(tokio::fs::read(&target).await?, b"data".to_vec());

        Ok(())
    }

    #[tokio::test]
    async fn test_drop_removes_temp() -> std::io::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.as_ref().join("a.tsm");

        let tmp_path = {
            let tmp = TempFile::new(&target, "tmp");
            let mut w = WritableFile::create(tmp.path()).await?;
            w.append(b"partial").await?;
            tmp.path().to_path_buf()
        };

        assert!(!tmp_path.exists());
        assert!(!target.exists());

        Ok(())
    }
}
