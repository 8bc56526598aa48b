//! Centralized error handling for the USB metadata service
//!
//! Every layer gets its own error enum so callers can tell a transient provider
//! failure from a malformed archive or a broken icon. The resolver never lets
//! these escape: each one is folded into a [`SourceFailure`] and logged.
//!
//! # Error Categories
//!
//! - **Lookup Errors**: local registry database access
//! - **Ingestion Errors**: registry download, decompression and replacement
//! - **Remote Errors**: device metadata service calls and archive inspection
//! - **Transcode Errors**: icon frame selection and rendering
//! - **Cache Errors**: cache document reads and writes
//! - **Refresh Errors**: icon dataset updates from git

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for local lookup Results
pub type LookupResult<T> = Result<T, LookupError>;

/// Convenience type alias for registry ingestion Results
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Convenience type alias for remote metadata Results
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Convenience type alias for icon transcoding Results
pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// Convenience type alias for cache store Results
pub type CacheResult<T> = Result<T, CacheError>;

/// Convenience type alias for icon dataset refresh Results
pub type RefreshResult<T> = Result<T, RefreshError>;
