use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Endpoint used for the `gcs` provider when the target leaves it empty.
pub const GCS_ENDPOINT_URL: &str = "https://storage.googleapis.com";

/// Compression applied to a stream before it reaches the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    None,
    Gzip,
    /// Gzip compressed block-wise on several threads.
    #[serde(rename = "pgzip")]
    ParallelGzip,
    Lz4,
    Snappy,
    /// Multi-threaded zstd.
    Zstd,
}

impl CompressionKind {
    pub const ALL: [CompressionKind; 6] = [
        CompressionKind::None,
        CompressionKind::Gzip,
        CompressionKind::ParallelGzip,
        CompressionKind::Lz4,
        CompressionKind::Snappy,
        CompressionKind::Zstd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::ParallelGzip => "pgzip",
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Snappy => "snappy",
            CompressionKind::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompressionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedCompression(s.to_string()))
    }
}

/// Which client talks to an S3-compatible endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum S3Provider {
    /// Multipart upload through the S3 API.
    #[default]
    Aws,
    /// Single unsized PUT; for endpoints where multipart must stay off.
    Gcs,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub provider: S3Provider,
    #[serde(default)]
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub credentials: S3Credentials,
}

impl S3Config {
    /// Endpoint the client should talk to, falling back to the provider default.
    pub fn endpoint_url(&self) -> &str {
        match self.provider {
            S3Provider::Gcs if self.endpoint.is_empty() => GCS_ENDPOINT_URL,
            _ => &self.endpoint,
        }
    }

    /// Object key for `name` under the configured prefix.
    pub fn object_key(&self, name: &str) -> String {
        let prefix = self.prefix.trim_end_matches('/');
        let name = name.trim_start_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    pub path: String,
}

/// Destination of a saved stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageTarget {
    Filesystem(FilesystemConfig),
    S3(S3Config),
    /// Drains and drops everything; used for dry runs.
    #[serde(alias = "blackhole")]
    Discard,
    /// A target type this build does not know how to write to.
    #[serde(other)]
    Unsupported,
}

impl StorageTarget {
    pub fn filesystem(path: impl Into<String>) -> Self {
        StorageTarget::Filesystem(FilesystemConfig { path: path.into() })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StorageTarget::Filesystem(_) => "filesystem",
            StorageTarget::S3(cfg) => match cfg.provider {
                S3Provider::Aws => "s3",
                S3Provider::Gcs => "gcs",
            },
            StorageTarget::Discard => "discard",
            StorageTarget::Unsupported => "unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config(prefix: &str) -> S3Config {
        S3Config {
            provider: S3Provider::Aws,
            endpoint: "http://localhost:3900".into(),
            region: "us-east-1".into(),
            bucket: "test".into(),
            prefix: prefix.into(),
            credentials: S3Credentials {
                access_key_id: "ak".into(),
                secret_access_key: "very-secret".into(),
            },
        }
    }

    #[test]
    fn compression_kind_default_is_none() {
        assert_eq!(CompressionKind::default(), CompressionKind::None);
    }

    #[test]
    fn compression_kind_parses_names() {
        for kind in CompressionKind::ALL {
            assert_eq!(kind.as_str().parse::<CompressionKind>().unwrap(), kind);
        }
        assert_eq!("GZIP".parse::<CompressionKind>().unwrap(), CompressionKind::Gzip);
    }

    #[test]
    fn unknown_compression_fails_loudly() {
        let err = "brotli".parse::<CompressionKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedCompression(ref s) if s == "brotli"));
    }

    #[test]
    fn compression_kind_serde_names() {
        let json = serde_json::to_string(&CompressionKind::ParallelGzip).unwrap();
        assert_eq!(json, "\"pgzip\"");
        let kind: CompressionKind = serde_json::from_str("\"snappy\"").unwrap();
        assert_eq!(kind, CompressionKind::Snappy);
    }

    #[test]
    fn object_key_with_prefix() {
        let cfg = s3_config("backups");
        assert_eq!(cfg.object_key("foo"), "backups/foo");
        assert_eq!(cfg.object_key("a/b/c"), "backups/a/b/c");
    }

    #[test]
    fn object_key_without_prefix() {
        let cfg = s3_config("");
        assert_eq!(cfg.object_key("foo"), "foo");
    }

    #[test]
    fn object_key_trims_trailing_slash() {
        let cfg = s3_config("backups/");
        assert_eq!(cfg.object_key("foo"), "backups/foo");
    }

    #[test]
    fn object_key_trims_leading_slash_on_name() {
        assert_eq!(s3_config("p").object_key("/x"), "p/x");
        assert_eq!(s3_config("p/").object_key("//x/y"), "p/x/y");
        assert_eq!(s3_config("").object_key("/x"), "x");
    }

    #[test]
    fn gcs_endpoint_defaults() {
        let mut cfg = s3_config("");
        cfg.provider = S3Provider::Gcs;
        cfg.endpoint.clear();
        assert_eq!(cfg.endpoint_url(), GCS_ENDPOINT_URL);

        cfg.endpoint = "http://fake-gcs:4443".into();
        assert_eq!(cfg.endpoint_url(), "http://fake-gcs:4443");
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let dbg = format!("{:?}", s3_config("p"));
        assert!(dbg.contains("S3Config"));
        assert!(dbg.contains("ak"));
        assert!(!dbg.contains("very-secret"));
    }

    #[test]
    fn storage_target_deserializes_each_kind() {
        let fs: StorageTarget =
            serde_json::from_str(r#"{"type":"filesystem","path":"/backups"}"#).unwrap();
        assert_eq!(fs, StorageTarget::filesystem("/backups"));

        let s3: StorageTarget = serde_json::from_str(
            r#"{"type":"s3","region":"eu-west-1","bucket":"b",
                "credentials":{"access_key_id":"a","secret_access_key":"s"}}"#,
        )
        .unwrap();
        match s3 {
            StorageTarget::S3(cfg) => {
                assert_eq!(cfg.provider, S3Provider::Aws);
                assert_eq!(cfg.bucket, "b");
                assert!(cfg.prefix.is_empty());
            }
            other => panic!("unexpected target {other:?}"),
        }

        let discard: StorageTarget = serde_json::from_str(r#"{"type":"blackhole"}"#).unwrap();
        assert_eq!(discard, StorageTarget::Discard);
    }

    #[test]
    fn unknown_target_type_deserializes_to_unsupported() {
        let target: StorageTarget = serde_json::from_str(r#"{"type":"azure"}"#).unwrap();
        assert_eq!(target, StorageTarget::Unsupported);
        assert_eq!(target.kind(), "unsupported");
    }
}
