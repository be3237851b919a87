use std::path::PathBuf;

use clap::Parser;
use common_base::point::split_series_field_key;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tsmdb_tsdb::engine::tsm1::block::block_type_name;
use tsmdb_tsdb::engine::tsm1::file_store::reader::{DefaultTSMReader, TSMReader};
use tsmdb_tsdb::engine::tsm1::file_store::TimeRange;
use tsmdb_utils::time::time_format_nano;

/// Prints the keys of a TSM file, or the points of one key
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Parser)]
#[clap(name = "inspect-tsm", about, version)]
struct Args {
    /// Path of the TSM file.
    #[clap(long)]
    path: PathBuf,

    /// Print the points of this key instead of listing keys.
    #[clap(long)]
    key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let r = DefaultTSMReader::open(&args.path).await?;

    match &args.key {
        Some(key) => {
            let values = r
                .read(key.as_bytes(), TimeRange::unbound())
                .await?
                .ok_or_else(|| anyhow::anyhow!("key {:?} not found in {:?}", key, args.path))?;
            println!("{} ({}, {} points)", key, values.type_name(), values.len());
            for (t, v) in values.format_points() {
                println!("| {} | {} | {} |", t, time_format_nano(t), v);
            }
        }
        None => {
            let stat = r.stats();
            println!(
                "{}: {} keys, {} bytes, time range [{}, {}], tombstones: {}",
                args.path.display(),
                r.key_count(),
                stat.size,
                time_format_nano(stat.time_range.min),
                time_format_nano(stat.time_range.max),
                r.has_tombstones()
            );
            for i in 0..r.key_count() {
                if let Some((key, typ)) = r.key_at(i) {
                    let blocks = r.read_entries(key).map(|e| e.len()).unwrap_or_default();
                    let (series, field) = split_series_field_key(key);
                    println!(
                        "{:010} {} field={} type={} blocks={}",
                        i,
                        String::from_utf8_lossy(series),
                        String::from_utf8_lossy(field),
                        block_type_name(typ),
                        blocks
                    );
                }
            }
        }
    }

    Ok(())
}
