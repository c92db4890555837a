use thiserror::Error;

use crate::config::CompressionKind;

/// Broad origin of a failure, independent of the concrete variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The target or compression selection itself is invalid.
    Configuration,
    /// Building a backend session failed before any byte moved.
    Session,
    /// Reading the source or writing to the backend failed mid-stream.
    Transfer,
    /// The compressor could not be built or finalized; output is unusable.
    Codec,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported storage target: {0}")]
    UnsupportedTarget(String),
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),
    #[error("session: {0}")]
    Session(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {message}")]
    Upload { context: String, message: String },
    #[error("{kind} codec: {source}")]
    Codec {
        kind: CompressionKind,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn upload(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Upload {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::UnsupportedTarget(_) | Error::UnsupportedCompression(_) => {
                ErrorClass::Configuration
            }
            Error::Session(_) => ErrorClass::Session,
            Error::Io { .. } | Error::Upload { .. } | Error::Other(_) => ErrorClass::Transfer,
            Error::Codec { .. } => ErrorClass::Codec,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
