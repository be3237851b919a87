use std::io;
use std::path::Path;

use tokio::fs::File;

mod temp_file;
mod writable_file;

pub use temp_file::TempFile;
pub use writable_file::WritableFile;

/// sync_dir fsyncs a directory so that renames and creations inside it are durable.
pub async fn sync_dir(dir: impl AsRef<Path>) -> io::Result<()> {
    let f = File::open(dir.as_ref()).await?;
    f.sync_all().await
}
