//! Filesystem cache of resolved device metadata
//!
//! One XML document per device at `{cache_dir}/{vid}_{pid}.xml`. Entries are
//! written once and never replaced or expired; an entry holding no fields is
//! still a valid answer.

use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use crate::errors::{CacheError, CacheResult};
use crate::models::{DeviceKey, DeviceMetadata};
use crate::utils::atomic_file::{WriteOutcome, write_once};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
}

impl CacheStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn entry_path(&self, key: DeviceKey) -> PathBuf {
        self.cache_dir.join(format!("{}.xml", key.file_stem()))
    }

    pub async fn get(&self, key: DeviceKey) -> CacheResult<Option<DeviceMetadata>> {
        let path = self.entry_path(key);
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(document) => document,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        decode(&document)
            .map(Some)
            .map_err(|message| CacheError::Decode {
                path: path.display().to_string(),
                message,
            })
    }

    /// Store the entry unless one already exists
    pub async fn put(&self, key: DeviceKey, metadata: &DeviceMetadata) -> CacheResult<WriteOutcome> {
        let document = encode(metadata).map_err(|message| CacheError::Encode { message })?;
        let path = self.entry_path(key);

        let outcome = tokio::task::spawn_blocking(move || write_once(&path, document.as_bytes()))
            .await
            .map_err(|e| CacheError::Task {
                message: e.to_string(),
            })??;

        if outcome == WriteOutcome::AlreadyExists {
            debug!("Cache entry for {} already written, keeping the first", key);
        }
        Ok(outcome)
    }
}

/// XML declaration followed by the `DeviceMetadata` element
pub fn encode(metadata: &DeviceMetadata) -> Result<String, String> {
    let body = quick_xml::se::to_string(metadata).map_err(|e| e.to_string())?;
    Ok(format!("{XML_DECLARATION}\n{body}"))
}

pub fn decode(document: &str) -> Result<DeviceMetadata, String> {
    quick_xml::de::from_str(document.trim_start_matches('\u{feff}')).map_err(|e| e.to_string())
}
