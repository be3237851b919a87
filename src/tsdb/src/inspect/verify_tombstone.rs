use std::io::Write;
use std::path::Path;
use std::time::Instant;

use tsmdb_utils::time::time_format_nano;

use crate::engine::tsm1::file_store::tombstone::Tombstoner;
use crate::error::{io_err, Error, Result};
use crate::TOMBSTONE_FILE_EXTENSION;

/// PROGRESS_EVERY is how many entries are walked between two progress lines.
pub const PROGRESS_EVERY: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    /// periodic progress.
    Verbose,
    /// every entry, times as unix nanoseconds.
    VeryVerbose,
    /// every entry, times as datetimes.
    VeryVeryVerbose,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TombstoneReport {
    pub files: usize,
    pub failed: usize,
    pub entries: u64,
}

impl TombstoneReport {
    /// is_ok is false only when a file could not be walked. Files without entries, or no
    /// files at all, are not failures.
    pub fn is_ok(&self) -> bool {
        self.failed == 0
    }
}

/// TombstoneVerifier walks every tombstone file below a directory and checks that each
/// entry can be read back.
#[derive(Debug, Default)]
pub struct TombstoneVerifier {
    verbosity: Verbosity,
}

impl TombstoneVerifier {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub async fn run(&self, out: &mut (dyn Write + Send), path: &Path) -> Result<TombstoneReport> {
        let files = super::find_files(path, TOMBSTONE_FILE_EXTENSION).await?;
        let w = |e| io_err(path)(e);

        let mut report = TombstoneReport::default();
        let start = Instant::now();
        for f in files {
            report.files += 1;
            if self.verbosity > Verbosity::Quiet {
                writeln!(out, "Verifying: {:?}", f.display().to_string()).map_err(w)?;
            }

            let tombstoner = Tombstoner::new(&f);
            if !tombstoner.has_tombstones().await {
                writeln!(out, "{} has no tombstone entries", f.display()).map_err(w)?;
                continue;
            }

            let verbosity = self.verbosity;
            let mut total: u64 = 0;
            let res = {
                let out = &mut *out;
                tombstoner
                    .walk(|t| {
                        total += 1;
                        if verbosity > Verbosity::Quiet && total % PROGRESS_EVERY == 0 {
                            writeln!(out, "Verified {} tombstone entries", total)?;
                        } else if verbosity == Verbosity::VeryVerbose {
                            writeln!(
                                out,
                                "key: {:?}, min: {}, max: {}",
                                String::from_utf8_lossy(&t.key),
                                t.min,
                                t.max
                            )?;
                        } else if verbosity > Verbosity::VeryVerbose {
                            writeln!(
                                out,
                                "key: {:?}, min: {}, max: {}",
                                String::from_utf8_lossy(&t.key),
                                time_format_nano(t.min),
                                time_format_nano(t.max)
                            )?;
                        }
                        Ok(())
                    })
                    .await
            };

            match res {
                Ok(n) => {
                    report.entries += n;
                    writeln!(
                        out,
                        "Completed verification for {:?} in {:?}.\nVerified {} entries\n",
                        f.display().to_string(),
                        start.elapsed(),
                        n
                    )
                    .map_err(w)?;
                }
                Err(Error::TombstoneWalk {
                    processed, reason, ..
                }) => {
                    report.failed += 1;
                    report.entries += processed;
                    writeln!(
                        out,
                        "{:?} failed to walk tombstone entries: {}. Last okay entry: {}",
                        f.display().to_string(),
                        reason,
                        processed
                    )
                    .map_err(w)?;
                }
                Err(e) => {
                    report.failed += 1;
                    writeln!(
                        out,
                        "{:?} failed to walk tombstone entries: {}. Last okay entry: {}",
                        f.display().to_string(),
                        e,
                        total
                    )
                    .map_err(w)?;
                }
            }
        }

        if report.files == 0 {
            writeln!(out, "No tombstone files found").map_err(w)?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tombstones(dir: &Path, name: &str, n: usize) -> Tombstoner {
        let t = Tombstoner::new(dir.join(name));
        for i in 0..n {
            t.add_range(&[format!("cpu-{}", i)], i as i64, i as i64 + 10)
                .await
                .unwrap();
        }
        t
    }

    async fn run(verbosity: Verbosity, dir: &Path) -> (TombstoneReport, String) {
        let mut out = vec![];
        let report = TombstoneVerifier::new(verbosity)
            .run(&mut out, dir)
            .await
            .unwrap();
        (report, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_verify_tombstone_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let (report, out) = run(Verbosity::Quiet, dir.as_ref()).await;
        assert!(report.is_ok());
        assert_eq!(out, "No tombstone files found\n");
    }

    #[tokio::test]
    async fn test_verify_tombstone_entries() {
        let dir = tempfile::tempdir().unwrap();
        tombstones(dir.as_ref(), "000000001-000000001.tsm", 3).await;
        // a file with only a header has no entries
        tokio::fs::write(
            dir.as_ref().join("000000002-000000001.tombstone"),
            0x1504u32.to_be_bytes(),
        )
        .await
        .unwrap();

        let (report, out) = run(Verbosity::VeryVerbose, dir.as_ref()).await;
        assert!(report.is_ok());
        assert_eq!(report.files, 2);
        assert_eq!(report.entries, 3);
        assert!(out.contains("Verifying: "));
        assert!(out.contains("key: \"cpu-1\", min: 1, max: 11"));
        assert!(out.contains("Verified 3 entries"));
        assert!(out.contains("000000002-000000001.tombstone has no tombstone entries"));

        let (_, out) = run(Verbosity::VeryVeryVerbose, dir.as_ref()).await;
        assert!(out.contains("key: \"cpu-0\", min: 1970-01-01"));

        let (_, out) = run(Verbosity::Quiet, dir.as_ref()).await;
        assert!(!out.contains("Verifying"));
        assert!(!out.contains("key: "));
    }

    #[tokio::test]
    async fn test_verify_tombstone_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let t = tombstones(dir.as_ref(), "000000001-000000001.tsm", 3).await;

        // cut the last entry in half
        let b = tokio::fs::read(t.path()).await.unwrap();
        tokio::fs::write(t.path(), &b[..b.len() - 10]).await.unwrap();

        let (report, out) = run(Verbosity::Verbose, dir.as_ref()).await;
        assert!(!report.is_ok());
        assert_eq!(report.entries, 2);
        assert!(out.contains("failed to walk tombstone entries"));
        assert!(out.contains("Last okay entry: 2"));
    }
}
