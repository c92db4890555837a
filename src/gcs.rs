//! Single-request upload for providers where multipart has to stay off.
//!
//! The bucket client presigns a PUT URL and the stream is sent as one
//! request body with chunked transfer encoding, so no content length is
//! needed up front.

use std::io::{self, Read};

use futures::SinkExt;
use futures::channel::mpsc;

use crate::copy::{READ_SOURCE, read_full};
use crate::error::{Error, Result};
use crate::s3::S3Session;
use crate::stats::{TransferStats, TransferTracker};

const PRESIGN_EXPIRY_SECS: u32 = 3600;
const BODY_CHUNK_SIZE: usize = 1024 * 1024;
/// Chunks queued between the reader and the request body.
const BODY_DEPTH: usize = 4;

const CONTEXT: &str = "upload to GCS";

pub(crate) fn put_unsized<R: Read + ?Sized>(
    session: &S3Session,
    key: &str,
    data: &mut R,
) -> Result<TransferStats> {
    let mut tracker = TransferTracker::start("gcs");
    let url = session
        .runtime
        .block_on(session.client.presign_put(key, PRESIGN_EXPIRY_SECS))?;

    let http = {
        let _guard = session.runtime.enter();
        reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Session(format!("http client: {e}")))?
    };

    let (mut body_tx, body_rx) = mpsc::channel::<io::Result<Vec<u8>>>(BODY_DEPTH);
    let request = http
        .put(url)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(reqwest::Body::wrap_stream(body_rx))
        .send();
    let response = session.runtime.spawn(request);

    let mut buf = vec![0u8; BODY_CHUNK_SIZE];
    let mut sent = 0u64;
    let mut cut_short = false;
    let pumped = loop {
        let n = match read_full(data, &mut buf) {
            Ok(n) => n,
            Err(e) => {
                // Fail the request body so the object is never committed.
                let body_err = io::Error::new(e.kind(), e.to_string());
                let _ = futures::executor::block_on(body_tx.send(Err(body_err)));
                break Err(Error::io(READ_SOURCE, e));
            }
        };
        if n == 0 {
            break Ok(());
        }
        if futures::executor::block_on(body_tx.send(Ok(buf[..n].to_vec()))).is_err() {
            // The request ended before the body did; its result says why.
            cut_short = true;
            break Ok(());
        }
        sent += n as u64;
        if n < buf.len() {
            break Ok(());
        }
    };
    drop(body_tx);

    let response = session
        .runtime
        .block_on(response)
        .map_err(|e| Error::upload(CONTEXT, e))
        .and_then(|result| result.map_err(request_error));
    pumped?;
    let response = response?;

    let status = response.status();
    if !status.is_success() {
        let body = session.runtime.block_on(response.text()).unwrap_or_default();
        return Err(Error::upload(CONTEXT, format!("status {status}: {body}")));
    }
    if cut_short {
        return Err(Error::upload(CONTEXT, "request closed before the stream ended"));
    }

    tracker.record_part(sent);
    tracing::info!(key, bytes = sent, "object uploaded with a single unsized PUT");
    Ok(tracker.finish())
}

/// A refused connection means nothing reached the store. The presigned URL
/// is dropped from the message since it carries the access key id.
fn request_error(err: reqwest::Error) -> Error {
    let connect = err.is_connect();
    let err = err.without_url();
    if connect {
        Error::Session(format!("{CONTEXT}: {err}"))
    } else {
        Error::upload(CONTEXT, err)
    }
}
