//! Offline integrity checks over the files of an engine directory.

use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{io_err, Result};

mod verify_tombstone;
mod verify_tsm;

pub use verify_tombstone::{TombstoneReport, TombstoneVerifier, Verbosity, PROGRESS_EVERY};
pub use verify_tsm::{VerifyChecksums, VerifyUtf8};

/// Verifier checks every TSM file below a directory and reports how many of the checked
/// items are broken.
#[async_trait]
pub trait Verifier: Send {
    async fn run(
        &mut self,
        out: &mut (dyn Write + Send),
        path: &Path,
        verbose: bool,
    ) -> Result<VerifyReport>;
}

/// VerifyReport is the outcome of a Verifier run.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    /// label names what was counted, e.g. `Broken Blocks`.
    pub label: &'static str,
    pub bad: u64,
    pub total: u64,
    pub elapsed: Duration,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.bad == 0
    }
}

impl Display for VerifyReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}/{}, in {}s",
            self.label,
            self.bad,
            self.total,
            self.elapsed.as_secs_f64()
        )
    }
}

/// find_files returns every file below dir with the given extension, sorted by path.
pub async fn find_files(dir: impl AsRef<Path>, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    let mut dirs = vec![dir.as_ref().to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut rd = tokio::fs::read_dir(&dir).await.map_err(io_err(&dir))?;
        while let Some(entry) = rd.next_entry().await.map_err(io_err(&dir))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(io_err(&path))?;
            if file_type.is_dir() {
                dirs.push(path);
            } else if path.extension().map(|x| x == extension).unwrap_or_default() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.as_ref().join("data").join("1");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        for name in ["b.tsm", "a.tsm", "a.tombstone", "c.tsm.tmp"] {
            tokio::fs::write(nested.join(name), b"").await.unwrap();
        }
        tokio::fs::write(dir.as_ref().join("top.tsm"), b"").await.unwrap();

        let files = find_files(dir.as_ref(), "tsm").await.unwrap();
        assert_eq!(
            files,
            vec![
                nested.join("a.tsm"),
                nested.join("b.tsm"),
                dir.as_ref().join("top.tsm")
            ]
        );

        assert!(find_files(dir.as_ref().join("missing"), "tsm").await.is_err());
    }

    #[test]
    fn test_report_display() {
        let r = VerifyReport {
            label: "Broken Blocks",
            bad: 1,
            total: 1,
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(r.to_string(), "Broken Blocks: 1/1, in 1.5s");
        assert!(!r.is_ok());
    }
}
