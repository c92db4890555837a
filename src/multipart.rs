//! Streaming multipart upload.
//!
//! The source is read sequentially on the calling thread and cut into
//! fixed-size parts. Parts are numbered from 1 in stream order and uploaded
//! concurrently on a tokio runtime, at most `concurrency` at a time, so no
//! more than `concurrency + 1` parts are held in memory.

use std::future::Future;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::copy::{READ_SOURCE, read_full};
use crate::error::{Error, Result};
use crate::stats::{TransferStats, TransferTracker};

pub const DEFAULT_PART_SIZE: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object store operations the uploader needs.
pub trait PartStore: Send + Sync + 'static {
    /// Store a whole object in one request.
    fn put_object(&self, key: &str, data: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Start a multipart upload and return its upload id.
    fn create_multipart(&self, key: &str) -> impl Future<Output = Result<String>> + Send;

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<UploadedPart>> + Send;

    /// `parts` is sorted by part number.
    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn abort_multipart(&self, key: &str, upload_id: &str)
    -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartUploader {
    part_size: usize,
    concurrency: usize,
    leave_parts_on_error: bool,
}

impl MultipartUploader {
    pub fn new(part_size: usize, concurrency: usize) -> Self {
        Self {
            part_size: part_size.max(1),
            concurrency: concurrency.max(1),
            leave_parts_on_error: true,
        }
    }

    /// Keep already uploaded parts when the upload fails (the default)
    /// instead of aborting the multipart upload.
    pub fn leave_parts_on_error(mut self, leave: bool) -> Self {
        self.leave_parts_on_error = leave;
        self
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Upload everything `reader` yields to `key`, blocking until the object
    /// is complete or the upload has failed.
    ///
    /// Must not be called from within `runtime`'s own context.
    pub fn upload<S, R>(
        &self,
        runtime: &Runtime,
        store: Arc<S>,
        key: &str,
        reader: &mut R,
    ) -> Result<TransferStats>
    where
        S: PartStore,
        R: Read + ?Sized,
    {
        let mut tracker = TransferTracker::start("s3");

        let first = self.read_part(reader)?;
        if first.len() < self.part_size {
            let len = first.len() as u64;
            runtime.block_on(store.put_object(key, first))?;
            tracker.record_part(len);
            tracing::info!(key, bytes = len, "object uploaded in a single request");
            return Ok(tracker.finish());
        }

        let upload_id: Arc<str> = runtime.block_on(store.create_multipart(key))?.into();
        tracing::debug!(
            key,
            upload_id = %upload_id,
            part_size = self.part_size,
            concurrency = self.concurrency,
            "multipart upload started"
        );

        let shared_key: Arc<str> = Arc::from(key);
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let failed = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut next = Some(first);
        let mut part_number = 0u32;
        let mut read_error = None;

        loop {
            let data = match next.take() {
                Some(data) => data,
                None => match self.read_part(reader) {
                    Ok(data) if data.is_empty() => break,
                    Ok(data) => data,
                    Err(e) => {
                        read_error = Some(e);
                        break;
                    }
                },
            };
            let last = data.len() < self.part_size;

            let permit = runtime
                .block_on(Arc::clone(&permits).acquire_owned())
                .map_err(|e| Error::Other(format!("upload permits: {e}")))?;
            // A failed part flags the upload before giving its permit back.
            if failed.load(Ordering::SeqCst) {
                break;
            }

            part_number += 1;
            let store = Arc::clone(&store);
            let key = Arc::clone(&shared_key);
            let upload_id = Arc::clone(&upload_id);
            let failed = Arc::clone(&failed);
            tasks.spawn_on(
                async move {
                    let len = data.len() as u64;
                    let result = store.upload_part(&key, &upload_id, part_number, data).await;
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    drop(permit);
                    result.map(|part| (part, len))
                },
                runtime.handle(),
            );

            if last {
                break;
            }
        }

        let mut parts = Vec::with_capacity(part_number as usize);
        let mut upload_error = None;
        runtime.block_on(async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok((part, len))) => {
                        tracker.record_part(len);
                        parts.push(part);
                    }
                    Ok(Err(e)) => {
                        upload_error.get_or_insert(e);
                    }
                    Err(e) => {
                        upload_error.get_or_insert(Error::upload("upload part", e));
                    }
                }
            }
        });

        if let Some(err) = read_error.or(upload_error) {
            if self.leave_parts_on_error {
                tracing::warn!(
                    key,
                    upload_id = %upload_id,
                    parts_left = parts.len(),
                    error = %err,
                    "multipart upload failed, leaving uploaded parts in place"
                );
            } else if let Err(abort_err) = runtime.block_on(store.abort_multipart(key, &upload_id))
            {
                tracing::warn!(
                    key,
                    upload_id = %upload_id,
                    error = %abort_err,
                    "abort multipart upload failed"
                );
            }
            return Err(err);
        }

        parts.sort_by_key(|part| part.part_number);
        runtime.block_on(store.complete_multipart(key, &upload_id, parts))?;

        let stats = tracker.finish();
        tracing::info!(key, bytes = stats.bytes, parts = stats.parts, "multipart upload complete");
        Ok(stats)
    }

    fn read_part<R: Read + ?Sized>(&self, reader: &mut R) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.part_size];
        let n = read_full(reader, &mut buf).map_err(|e| Error::io(READ_SOURCE, e))?;
        buf.truncate(n);
        Ok(buf)
    }
}
