use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tsmdb_tsdb::config::Config;
use tsmdb_tsdb::inspect::{Verifier, VerifyChecksums, VerifyUtf8};

/// Verifies the integrity of TSM files
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Parser)]
#[clap(name = "verify-tsm", about, version)]
struct Args {
    /// Root storage path. Defaults to $TSMDB_ENGINE_PATH or ~/.tsmdb/engine.
    #[clap(long = "engine-path")]
    engine_path: Option<PathBuf>,

    /// Verify series keys are valid UTF-8. This check skips verification of block checksums.
    #[clap(long = "check-utf8")]
    check_utf8: bool,

    /// Enable verbose logging
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let dir = match args.engine_path {
        Some(dir) => dir,
        None => Config::from_env()?.dir,
    };

    let mut runner: Box<dyn Verifier> = if args.check_utf8 {
        Box::new(VerifyUtf8::default())
    } else {
        Box::new(VerifyChecksums::default())
    };

    let mut out = std::io::stderr();
    let report = runner
        .run(&mut out, &dir, args.verbose)
        .await
        .map_err(|e| anyhow::anyhow!("could not verify storage files in {:?}: {}", dir, e))?;

    if !report.is_ok() {
        if args.check_utf8 {
            anyhow::bail!("check-utf8: failed");
        }
        anyhow::bail!("verify-tsm: failed");
    }
    Ok(())
}
