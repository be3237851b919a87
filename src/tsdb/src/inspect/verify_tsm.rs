use std::io::Write;
use std::path::Path;
use std::time::Instant;

use common_base::iterator::AsyncIterator;

use crate::engine::tsm1::block::checksum;
use crate::engine::tsm1::file_store::reader::{DefaultTSMReader, TSMReader};
use crate::error::{io_err, Result};
use crate::inspect::{find_files, Verifier, VerifyReport};
use crate::TSM_FILE_EXTENSION;

/// VerifyChecksums recomputes the CRC-32 of every block and compares it with the checksum
/// stored in the index.
#[derive(Debug, Default)]
pub struct VerifyChecksums {}

#[async_trait]
impl Verifier for VerifyChecksums {
    async fn run(
        &mut self,
        out: &mut (dyn Write + Send),
        path: &Path,
        verbose: bool,
    ) -> Result<VerifyReport> {
        let files = find_files(path, TSM_FILE_EXTENSION).await?;
        let start = Instant::now();

        let mut total = 0;
        let mut bad = 0;
        for f in files {
            let r = DefaultTSMReader::open(&f).await?;
            let mut itr = r.block_iterator();

            let mut file_errors = 0;
            let mut count = 0;
            loop {
                match itr.try_next().await {
                    Ok(Some(block)) => {
                        total += 1;
                        let actual = checksum(block.data);
                        if actual != block.checksum() {
                            bad += 1;
                            file_errors += 1;
                            if verbose {
                                writeln!(
                                    out,
                                    "{}: got {} but expected {} for key {:?}, block {}",
                                    f.display(),
                                    block.checksum(),
                                    actual,
                                    String::from_utf8_lossy(block.key),
                                    block.block_index
                                )
                                .map_err(io_err(&f))?;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        total += 1;
                        bad += 1;
                        file_errors += 1;
                        if verbose {
                            writeln!(
                                out,
                                "{}: could not get checksum for block {} due to error: {:?}",
                                f.display(),
                                count,
                                e.to_string()
                            )
                            .map_err(io_err(&f))?;
                        }
                    }
                }
                count += 1;
            }

            if file_errors == 0 && verbose {
                writeln!(out, "{}: healthy", f.display()).map_err(io_err(&f))?;
            }
        }

        let report = VerifyReport {
            label: "Broken Blocks",
            bad,
            total,
            elapsed: start.elapsed(),
        };
        writeln!(out, "{}", report).map_err(io_err(path))?;
        Ok(report)
    }
}

/// VerifyUtf8 checks that every series key is valid UTF-8. Block checksums are not verified.
#[derive(Debug, Default)]
pub struct VerifyUtf8 {}

#[async_trait]
impl Verifier for VerifyUtf8 {
    async fn run(
        &mut self,
        out: &mut (dyn Write + Send),
        path: &Path,
        verbose: bool,
    ) -> Result<VerifyReport> {
        let files = find_files(path, TSM_FILE_EXTENSION).await?;
        let start = Instant::now();

        let mut total = 0;
        let mut bad = 0;
        for f in files {
            let r = DefaultTSMReader::open(&f).await?;

            let n = r.key_count();
            total += n as u64;
            let mut file_errors = 0;
            for i in 0..n {
                let valid = r
                    .key_at(i)
                    .map(|(key, _)| std::str::from_utf8(key).is_ok())
                    .unwrap_or_default();
                if !valid {
                    bad += 1;
                    file_errors += 1;
                    if verbose {
                        writeln!(out, "{}: key #{} is not valid UTF-8", f.display(), i)
                            .map_err(io_err(&f))?;
                    }
                }
            }

            if file_errors == 0 && verbose {
                writeln!(out, "{}: healthy", f.display()).map_err(io_err(&f))?;
            }
        }

        let report = VerifyReport {
            label: "Invalid Keys",
            bad,
            total,
            elapsed: start.elapsed(),
        };
        writeln!(out, "{}", report).map_err(io_err(path))?;
        Ok(report)
    }
}
