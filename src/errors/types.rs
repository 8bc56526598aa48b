//! Error type definitions for the USB metadata service
//!
//! Lower layers return their own error enums. The resolver folds each one into
//! a [`SourceFailure`] tagged with a [`FailureKind`], which is what gets logged
//! and what the merge logic branches on.

use std::fmt;
use thiserror::Error;

/// Top-level application error type, used while wiring the service together
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Local registry database errors
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Registry ingestion errors
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Registry download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Registry download failed: HTTP {status} - {url}")]
    Http { status: u16, url: String },

    #[error("Registry decompression failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry contained no product records")]
    EmptyRegistry,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Remote device metadata service errors
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Connection failures, timeouts and body read errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The archive download answered with a non-success status
    #[error("Device metadata download failed: HTTP {status} - {url}")]
    DownloadFailed { status: u16, url: String },

    /// The archive download answered with an empty body
    #[error("Device metadata download returned an empty body - {url}")]
    EmptyDownload { url: String },

    /// The archive could not be opened or unpacked
    #[error("Invalid device metadata archive: {message}")]
    InvalidArchive { message: String },

    /// The archive has no device descriptor document
    #[error("Device metadata archive has no descriptor ({path})")]
    MissingDescriptor { path: String },

    /// The descriptor document could not be parsed
    #[error("Invalid device descriptor: {message}")]
    InvalidDescriptor { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filename pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A blocking task panicked or was cancelled
    #[error("Task failed: {message}")]
    Task { message: String },
}

impl RemoteError {
    pub fn invalid_archive<S: Into<String>>(message: S) -> Self {
        Self::InvalidArchive {
            message: message.into(),
        }
    }

    pub fn invalid_descriptor<S: Into<String>>(message: S) -> Self {
        Self::InvalidDescriptor {
            message: message.into(),
        }
    }

    /// Whether this is a problem with the payload rather than with the transport
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArchive { .. } | Self::MissingDescriptor { .. } | Self::InvalidDescriptor { .. }
        )
    }
}

/// Icon transcoding errors
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// No frame met the minimum width and colour depth
    #[error("No suitable icon frame (min width {min_width}px, min depth {min_color_depth} bits)")]
    NoSuitableFrame { min_width: u32, min_color_depth: u16 },

    /// The icon container or one of its frames could not be decoded
    #[error("Icon decode failed: {message}")]
    Decode { message: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {message}")]
    Task { message: String },
}

impl TranscodeError {
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Cache store errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode cache entry: {message}")]
    Encode { message: String },

    #[error("Failed to decode cache entry {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Task failed: {message}")]
    Task { message: String },
}

/// Icon dataset refresh errors
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// What kind of failure a metadata source hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, timeout, database or service error
    Transient,
    /// Malformed archive or descriptor
    Format,
    /// Icon could not be produced
    Transcode,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient failure",
            Self::Format => "format error",
            Self::Transcode => "transcode error",
        };
        f.write_str(label)
    }
}

/// A source failure as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl SourceFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, reason: S) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn transient<S: Into<String>>(reason: S) -> Self {
        Self::new(FailureKind::Transient, reason)
    }
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

impl From<LookupError> for SourceFailure {
    fn from(error: LookupError) -> Self {
        Self::transient(error.to_string())
    }
}

impl From<RemoteError> for SourceFailure {
    fn from(error: RemoteError) -> Self {
        let kind = if error.is_format_error() {
            FailureKind::Format
        } else {
            FailureKind::Transient
        };
        Self::new(kind, error.to_string())
    }
}

impl From<TranscodeError> for SourceFailure {
    fn from(error: TranscodeError) -> Self {
        Self::new(FailureKind::Transcode, error.to_string())
    }
}
