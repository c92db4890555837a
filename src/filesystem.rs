use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use crate::config::FilesystemConfig;
use crate::copy::{COPY_BUF_SIZE, copy_stream};
use crate::error::{Error, Result};
use crate::stats::{TransferStats, TransferTracker};

/// Write the stream to `<path>/<name>`, replacing any existing file.
pub(crate) fn save<R: Read>(
    data: &mut R,
    config: &FilesystemConfig,
    name: &str,
) -> Result<TransferStats> {
    let mut tracker = TransferTracker::start("filesystem");
    let path = destination(config, name);
    let shown = path.display();

    let file = File::create(&path)
        .map_err(|e| Error::io(format!("create destination file <{shown}>"), e))?;
    let write_context = format!("write to file <{shown}>");
    let mut writer = BufWriter::with_capacity(COPY_BUF_SIZE, file);

    let bytes = copy_stream(data, &mut writer, &write_context)?;
    writer.flush().map_err(|e| Error::io(write_context.as_str(), e))?;
    tracker.record_bytes(bytes);

    tracing::info!(path = %shown, bytes, "stream saved to file");
    Ok(tracker.finish())
}

/// `name` always lands under the target directory, even when it starts
/// with a separator.
fn destination(config: &FilesystemConfig, name: &str) -> PathBuf {
    let relative = name.trim_start_matches(|c| c == '/' || c == MAIN_SEPARATOR);
    Path::new(&config.path).join(relative)
}
