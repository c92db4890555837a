use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dumpsink::{
    CompressionKind, Parallelism, S3Config, S3Credentials, S3Provider, Sink, StorageTarget,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dumpsink", about = "Compress a stream and save it to a storage target")]
struct Cli {
    /// Object or file name under the target path/prefix
    #[arg(short, long)]
    name: String,

    /// Compression: none, gzip, pgzip, lz4, snappy, zstd
    #[arg(short, long, env = "DUMPSINK_COMPRESSION", default_value = "none")]
    compression: CompressionKind,

    /// Read the stream from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Logical CPUs to size worker pools for (defaults to all)
    #[arg(long, env = "DUMPSINK_CPUS")]
    cpus: Option<usize>,

    /// Multipart upload part size in bytes
    #[arg(long, default_value_t = dumpsink::DEFAULT_PART_SIZE)]
    part_size: usize,

    /// Abort a failed multipart upload instead of leaving its parts
    #[arg(long)]
    abort_on_error: bool,

    #[command(subcommand)]
    target: TargetCommand,
}

#[derive(Subcommand)]
enum TargetCommand {
    /// Write into a local directory
    Fs {
        /// Destination directory
        #[arg(long)]
        path: String,
    },
    /// Upload to S3-compatible object storage
    S3(S3Args),
    /// Read the stream and drop it (dry run)
    Discard,
    /// Use a target described in a JSON file
    Json {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Args)]
struct S3Args {
    /// aws (multipart) or gcs (single unsized PUT)
    #[arg(long, env = "DUMPSINK_S3_PROVIDER", default_value = "aws", value_parser = parse_provider)]
    provider: S3Provider,

    /// S3 endpoint URL
    #[arg(long, env = "DUMPSINK_S3_ENDPOINT", default_value = "")]
    endpoint: String,

    /// S3 region
    #[arg(long, env = "DUMPSINK_S3_REGION")]
    region: String,

    /// S3 bucket name
    #[arg(long, env = "DUMPSINK_S3_BUCKET")]
    bucket: String,

    /// S3 access key
    #[arg(long, env = "DUMPSINK_S3_ACCESS_KEY")]
    access_key: String,

    /// S3 secret key
    #[arg(long, env = "DUMPSINK_S3_SECRET_KEY", hide_env_values = true)]
    secret_key: String,

    /// S3 key prefix
    #[arg(long, env = "DUMPSINK_S3_PREFIX", default_value = "")]
    prefix: String,
}

fn parse_provider(s: &str) -> Result<S3Provider, String> {
    match s.to_ascii_lowercase().as_str() {
        "aws" | "s3" => Ok(S3Provider::Aws),
        "gcs" => Ok(S3Provider::Gcs),
        other => Err(format!("unknown provider '{other}', expected aws or gcs")),
    }
}

impl TargetCommand {
    fn into_target(self) -> anyhow::Result<StorageTarget> {
        Ok(match self {
            TargetCommand::Fs { path } => StorageTarget::filesystem(path),
            TargetCommand::S3(args) => StorageTarget::S3(S3Config {
                provider: args.provider,
                endpoint: args.endpoint,
                region: args.region,
                bucket: args.bucket,
                prefix: args.prefix,
                credentials: S3Credentials {
                    access_key_id: args.access_key,
                    secret_access_key: args.secret_key,
                },
            }),
            TargetCommand::Discard => StorageTarget::Discard,
            TargetCommand::Json { file } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("read target file {}", file.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parse target file {}", file.display()))?
            }
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let target = cli.target.into_target()?;
    let parallelism = cli.cpus.map(Parallelism::new).unwrap_or_default();
    let sink = Sink::new(parallelism)
        .with_part_size(cli.part_size)
        .with_leave_parts_on_error(!cli.abort_on_error);

    let source: Box<dyn Read> = match &cli.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("open input {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };

    let stats = sink.backup_stream(source, cli.compression, &target, &cli.name)?;
    println!(
        "Saved {} ({}): {} bytes, {} part(s) in {:.2?}",
        cli.name, cli.compression, stats.bytes, stats.parts, stats.elapsed
    );
    Ok(())
}
