pub mod compression;
mod config;
mod copy;
mod error;
mod filesystem;
mod gcs;
pub mod multipart;
mod parallelism;
mod pgzip;
pub mod pipe;
mod s3;
mod sink;
mod stats;

pub use compression::{CompressingWriter, compress_scoped, wrap};
pub use config::{
    CompressionKind, FilesystemConfig, GCS_ENDPOINT_URL, S3Config, S3Credentials, S3Provider,
    StorageTarget,
};
pub use error::{Error, ErrorClass, Result};
pub use multipart::{DEFAULT_PART_SIZE, MultipartUploader, PartStore, UploadedPart};
pub use parallelism::Parallelism;
pub use pgzip::ParallelGzEncoder;
pub use pipe::{PipeReader, PipeWriter, pipe};
pub use s3::S3Client;
pub use sink::{Sink, save};
pub use stats::TransferStats;
