use std::path::PathBuf;
use tokio::fs;
use url::Url;

use crate::models::DeviceKey;

/// Directory of extracted device icons, one `{vid}_{pid}.png` per device
#[derive(Debug, Clone)]
pub struct IconRepository {
    icon_dir: PathBuf,
    base_url: Url,
}

impl IconRepository {
    pub fn new(icon_dir: PathBuf, base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            icon_dir,
            base_url: Url::parse(base_url)?,
        })
    }

    pub async fn ensure_storage_dirs(&self) -> Result<(), std::io::Error> {
        if !self.icon_dir.exists() {
            fs::create_dir_all(&self.icon_dir).await?;
        }
        Ok(())
    }

    pub fn file_name(key: DeviceKey) -> String {
        format!("{}.png", key.file_stem())
    }

    pub fn icon_path(&self, key: DeviceKey) -> PathBuf {
        self.icon_dir.join(Self::file_name(key))
    }

    pub async fn exists(&self, key: DeviceKey) -> bool {
        fs::try_exists(self.icon_path(key)).await.unwrap_or(false)
    }

    /// Public URL of the icon: the file name joined onto the base URL
    pub fn icon_uri(&self, key: DeviceKey) -> String {
        match self.base_url.join(&Self::file_name(key)) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.base_url, Self::file_name(key)),
        }
    }

    /// URL of the icon if the asset is already on disk
    pub async fn existing_icon_uri(&self, key: DeviceKey) -> Option<String> {
        if self.exists(key).await {
            Some(self.icon_uri(key))
        } else {
            None
        }
    }
}
