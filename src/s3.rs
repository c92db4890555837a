use std::sync::Arc;

use s3::creds::Credentials;
use s3::error::S3Error;
use s3::serde_types::Part;
use s3::{Bucket, Region};
use tokio::runtime::Runtime;

use crate::config::S3Config;
use crate::error::{Error, Result};
use crate::multipart::{PartStore, UploadedPart};

const CONTENT_TYPE: &str = "application/octet-stream";

pub struct S3Client {
    bucket: Box<Bucket>,
}

impl S3Client {
    pub fn new(config: &S3Config) -> Result<Self> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint_url().to_string(),
        };
        let credentials = Credentials::new(
            Some(&config.credentials.access_key_id),
            Some(&config.credentials.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|e| Error::Session(format!("credentials: {e}")))?;

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| Error::Session(format!("bucket {}: {e}", config.bucket)))?
            .with_path_style();

        Ok(Self { bucket })
    }

    /// Presigned URL allowing a single PUT of `key`.
    pub async fn presign_put(&self, key: &str, expiry_secs: u32) -> Result<String> {
        self.bucket
            .presign_put(key, expiry_secs, None, None)
            .await
            .map_err(|e| Error::upload("presign put", e))
    }
}

fn ensure_success(context: &str, status: u16) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(Error::upload(context, format!("unexpected status {status}")))
    }
}

/// Map a failure of the request that opens a transfer. An unreachable
/// endpoint or rejected keys mean nothing was stored.
fn first_request_error(context: &str, err: S3Error) -> Error {
    if is_session_failure(&err) {
        Error::Session(format!("{context}: {err}"))
    } else {
        Error::upload(context, err)
    }
}

fn is_session_failure(err: &S3Error) -> bool {
    match err {
        S3Error::Hyper(e) => e.is_connect(),
        S3Error::HttpFailWithBody(status, _) => matches!(status, 401 | 403),
        _ => false,
    }
}

impl PartStore for S3Client {
    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let response = self
            .bucket
            .put_object(key, &data)
            .await
            .map_err(|e| first_request_error("upload to S3", e))?;
        ensure_success("upload to S3", response.status_code())
    }

    async fn create_multipart(&self, key: &str) -> Result<String> {
        let response = self
            .bucket
            .initiate_multipart_upload(key, CONTENT_TYPE)
            .await
            .map_err(|e| first_request_error("create multipart upload", e))?;
        Ok(response.upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<UploadedPart> {
        let part = self
            .bucket
            .put_multipart_chunk(data, key, part_number, upload_id, CONTENT_TYPE)
            .await
            .map_err(|e| Error::upload(format!("upload part {part_number}"), e))?;
        Ok(UploadedPart {
            part_number: part.part_number,
            etag: part.etag,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<()> {
        let parts = parts
            .into_iter()
            .map(|part| Part {
                part_number: part.part_number,
                etag: part.etag,
            })
            .collect();
        let response = self
            .bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await
            .map_err(|e| Error::upload("complete multipart upload", e))?;
        ensure_success("complete multipart upload", response.status_code())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.bucket
            .abort_upload(key, upload_id)
            .await
            .map_err(|e| Error::upload("abort multipart upload", e))
    }
}

/// Runtime and client for one object-store transfer; dropped when it ends.
pub(crate) struct S3Session {
    pub runtime: Runtime,
    pub client: Arc<S3Client>,
}

impl S3Session {
    pub fn open(config: &S3Config, workers: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name("dumpsink-upload")
            .enable_all()
            .build()
            .map_err(|e| Error::Session(format!("runtime: {e}")))?;
        let client = S3Client::new(config)?;
        tracing::debug!(
            endpoint = config.endpoint_url(),
            region = %config.region,
            bucket = %config.bucket,
            "object store session opened"
        );
        Ok(Self {
            runtime,
            client: Arc::new(client),
        })
    }
}
