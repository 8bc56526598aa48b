//! Remote device metadata provider
//!
//! Two HTTP calls per device: filename discovery against the metadata service,
//! then the package download. The package is unpacked in a scoped temporary
//! directory; only the icon outlives it, as a [`TransientIcon`] that deletes
//! itself when dropped.

use async_trait::async_trait;
use std::path::Path;
use tempfile::TempPath;

use crate::models::{DeviceKey, SourceOutcome};

pub mod archive;
pub mod client;

pub use client::DmsClient;

/// Icon container copied out of a metadata package, removed on drop
#[derive(Debug)]
pub struct TransientIcon {
    path: TempPath,
}

impl TransientIcon {
    pub fn new(path: TempPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What the provider knows about a device
#[derive(Debug, Default)]
pub struct RemoteMetadata {
    pub vendor_name: Option<String>,
    pub product_name: Option<String>,
    pub icon: Option<TransientIcon>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteMetadataSource: Send + Sync {
    async fn fetch(&self, key: DeviceKey) -> SourceOutcome<RemoteMetadata>;
}
