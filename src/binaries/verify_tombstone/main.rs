use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tsmdb_tsdb::config::Config;
use tsmdb_tsdb::inspect::{TombstoneVerifier, Verbosity};

/// Verify the integrity of tombstone files
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Parser)]
#[clap(name = "verify-tombstone", about, version)]
struct Args {
    /// Path to find tombstone files. Defaults to $TSMDB_ENGINE_PATH or ~/.tsmdb/engine.
    #[clap(long = "engine-path")]
    engine_path: Option<PathBuf>,

    /// Verbose: Emit periodic progress.
    #[clap(short, long)]
    verbose: bool,

    /// Very verbose: Emit every tombstone entry key and time range.
    #[clap(long)]
    vv: bool,

    /// Emit every tombstone entry with its time range as datetimes.
    #[clap(long, hide = true)]
    vvv: bool,
}

impl Args {
    fn verbosity(&self) -> Verbosity {
        if self.vvv {
            Verbosity::VeryVeryVerbose
        } else if self.vv {
            Verbosity::VeryVerbose
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let dir = match &args.engine_path {
        Some(dir) => dir.clone(),
        None => Config::from_env()?.dir,
    };

    let mut out = std::io::stdout();
    let report = TombstoneVerifier::new(args.verbosity())
        .run(&mut out, &dir)
        .await?;

    if !report.is_ok() {
        anyhow::bail!("failed tombstone verification");
    }
    Ok(())
}
