use std::io::{self, Read};
use std::sync::Arc;
use std::thread;

use crate::compression::wrap;
use crate::config::{CompressionKind, FilesystemConfig, S3Config, S3Provider, StorageTarget};
use crate::copy::copy_stream;
use crate::error::{Error, Result};
use crate::multipart::{DEFAULT_PART_SIZE, MultipartUploader};
use crate::parallelism::Parallelism;
use crate::pipe::{PipeWriter, pipe};
use crate::s3::S3Session;
use crate::stats::{TransferStats, TransferTracker};
use crate::{filesystem, gcs};

/// Transfer mechanism picked for a target.
enum Backend<'a> {
    Filesystem(&'a FilesystemConfig),
    /// Multipart upload through the S3 API.
    ObjectStore(&'a S3Config),
    /// One PUT with no content length.
    ObjectStoreUnsized(&'a S3Config),
    Discard,
}

impl<'a> Backend<'a> {
    fn resolve(target: &'a StorageTarget) -> Result<Self> {
        match target {
            StorageTarget::Filesystem(cfg) => Ok(Backend::Filesystem(cfg)),
            StorageTarget::S3(cfg) => match cfg.provider {
                S3Provider::Aws => Ok(Backend::ObjectStore(cfg)),
                S3Provider::Gcs => Ok(Backend::ObjectStoreUnsized(cfg)),
            },
            StorageTarget::Discard => Ok(Backend::Discard),
            StorageTarget::Unsupported => {
                Err(Error::UnsupportedTarget("unknown storage type".into()))
            }
        }
    }
}

/// Delivers streams to storage targets.
///
/// A `Sink` holds only tunables; every call opens and releases its own
/// file handle or object-store session, so one `Sink` can serve concurrent
/// saves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sink {
    parallelism: Parallelism,
    part_size: usize,
    leave_parts_on_error: bool,
}

impl Default for Sink {
    fn default() -> Self {
        Self::new(Parallelism::detect())
    }
}

impl Sink {
    pub fn new(parallelism: Parallelism) -> Self {
        Self {
            parallelism,
            part_size: DEFAULT_PART_SIZE,
            leave_parts_on_error: true,
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn with_leave_parts_on_error(mut self, leave: bool) -> Self {
        self.leave_parts_on_error = leave;
        self
    }

    pub fn parallelism(&self) -> &Parallelism {
        &self.parallelism
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Copy `data` to `target` under `name`, blocking until the backend has
    /// acknowledged every byte or the transfer failed.
    ///
    /// Object-store targets run their own runtime, so this must not be
    /// called from async code; use `spawn_blocking` there.
    pub fn save<R: Read>(
        &self,
        mut data: R,
        target: &StorageTarget,
        name: &str,
    ) -> Result<TransferStats> {
        let backend = Backend::resolve(target)?;
        let result = match backend {
            Backend::Filesystem(cfg) => filesystem::save(&mut data, cfg, name),
            Backend::ObjectStore(cfg) => self.save_multipart(&mut data, cfg, name),
            Backend::ObjectStoreUnsized(cfg) => self.save_unsized(&mut data, cfg, name),
            Backend::Discard => discard(&mut data),
        };
        if let Err(e) = &result {
            tracing::warn!(target = target.kind(), name, error = %e, "save failed");
        }
        result
    }

    fn save_multipart<R: Read>(
        &self,
        data: &mut R,
        cfg: &S3Config,
        name: &str,
    ) -> Result<TransferStats> {
        let concurrency = self.parallelism.upload_concurrency();
        let session = S3Session::open(cfg, concurrency)?;
        MultipartUploader::new(self.part_size, concurrency)
            .leave_parts_on_error(self.leave_parts_on_error)
            .upload(&session.runtime, Arc::clone(&session.client), &cfg.object_key(name), data)
    }

    fn save_unsized<R: Read>(
        &self,
        data: &mut R,
        cfg: &S3Config,
        name: &str,
    ) -> Result<TransferStats> {
        let session = S3Session::open(cfg, 1)?;
        gcs::put_unsized(&session, &cfg.object_key(name), data)
    }

    /// Compress `source` with `kind` and save the result under `name`.
    ///
    /// The source is read and compressed on the calling thread while a
    /// second thread streams the compressed bytes to the target.
    pub fn backup_stream<R: Read>(
        &self,
        mut source: R,
        kind: CompressionKind,
        target: &StorageTarget,
        name: &str,
    ) -> Result<TransferStats> {
        let (writer, reader) = pipe();
        thread::scope(|scope| {
            let saver = scope.spawn(move || self.save(reader, target, name));
            let produced = self.produce(&mut source, writer, kind);
            let saved = saver
                .join()
                .map_err(|_| Error::Other("sink thread panicked".into()))
                .and_then(|saved| saved);
            match (produced, saved) {
                (Ok(()), saved) => saved,
                // The sink failed first and the pipe broke under the producer.
                (Err(e), Err(sink_err)) if is_broken_pipe(&e) => Err(sink_err),
                (Err(e), _) => Err(e),
            }
        })
    }

    fn produce<R: Read>(
        &self,
        source: &mut R,
        writer: PipeWriter,
        kind: CompressionKind,
    ) -> Result<()> {
        let mut compressor = wrap(writer, kind, &self.parallelism)?;
        if let Err(e) = copy_stream(source, &mut compressor, "write compressed stream") {
            // End the pipe with an error so the sink never sees a clean EOF.
            if let Ok(writer) = compressor.finish() {
                writer.close_with_error(io::Error::other(e.to_string()));
            }
            return Err(e);
        }
        let writer = compressor.finish()?;
        writer.close().map_err(|e| Error::io("close pipe", e))
    }
}

fn is_broken_pipe(err: &Error) -> bool {
    match err {
        Error::Io { source, .. } | Error::Codec { source, .. } => {
            source.kind() == io::ErrorKind::BrokenPipe
        }
        _ => false,
    }
}

fn discard<R: Read>(data: &mut R) -> Result<TransferStats> {
    let mut tracker = TransferTracker::start("discard");
    let bytes = copy_stream(data, &mut io::sink(), "upload to blackhole")?;
    tracker.record_bytes(bytes);
    tracing::info!(bytes, "stream discarded");
    Ok(tracker.finish())
}

/// Save `data` with a default [`Sink`].
pub fn save<R: Read>(data: R, target: &StorageTarget, name: &str) -> Result<TransferStats> {
    Sink::default().save(data, target, name)
}
