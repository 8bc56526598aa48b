use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

/// Environment variable that overrides `hooks.webhook_secret`
pub const WEBHOOK_SECRET_ENV: &str = "USB_METADATA_WEBHOOK_SECRET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub icons: IconConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one XML document per resolved device
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Directory holding `{vid}_{pid}.png` icons, served under `/icons/`
    #[serde(default = "default_icon_dir")]
    pub icon_dir: PathBuf,
    /// Public URL the icon directory is reachable at; icon file names are joined onto it
    #[serde(default = "default_icon_base_url")]
    pub icon_base_url: String,
    /// SQLite database holding the vendor/product registry
    #[serde(default = "default_database_url")]
    pub database_url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Endpoint answering the filename discovery request
    #[serde(default = "default_remote_service_url")]
    pub service_url: String,
    /// Base URL the discovered archive file name is appended to
    #[serde(default = "default_remote_download_url")]
    pub download_url: String,
    /// Applies to each remote call separately
    #[serde(default = "default_request_timeout", with = "duration_serde::duration")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IconConfig {
    #[serde(default = "default_icon_min_width")]
    pub min_width: u32,
    #[serde(default = "default_icon_min_color_depth")]
    pub min_color_depth: u16,
    /// Ref the icon directory is reset to when the refresh hook fires
    #[serde(default = "default_icon_refresh_branch")]
    pub refresh_branch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Shared secret in the refresh hook path; hooks are disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_usb_ids_url")]
    pub usb_ids_url: String,
    /// Rebuild the registry periodically while serving; disabled when unset
    #[serde(
        default,
        with = "duration_serde::option_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_interval: Option<Duration>,
}

// Web defaults
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

// Storage defaults
fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_icon_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ICON_DIR)
}

fn default_icon_base_url() -> String {
    DEFAULT_ICON_BASE_URL.to_string()
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

// Remote defaults
fn default_remote_service_url() -> String {
    DEFAULT_REMOTE_SERVICE_URL.to_string()
}

fn default_remote_download_url() -> String {
    DEFAULT_REMOTE_DOWNLOAD_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}

// Icon defaults
fn default_icon_min_width() -> u32 {
    DEFAULT_ICON_MIN_WIDTH
}

fn default_icon_min_color_depth() -> u16 {
    DEFAULT_ICON_MIN_COLOR_DEPTH
}

fn default_icon_refresh_branch() -> String {
    DEFAULT_ICON_REFRESH_BRANCH.to_string()
}

// Ingestion defaults
fn default_usb_ids_url() -> String {
    DEFAULT_USB_IDS_URL.to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            icon_dir: default_icon_dir(),
            icon_base_url: default_icon_base_url(),
            database_url: default_database_url(),
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            service_url: default_remote_service_url(),
            download_url: default_remote_download_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            min_width: default_icon_min_width(),
            min_color_depth: default_icon_min_color_depth(),
            refresh_branch: default_icon_refresh_branch(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            usb_ids_url: default_usb_ids_url(),
            refresh_interval: None,
        }
    }
}

impl Config {
    /// Read `config_file`, writing the defaults there first when it does not exist
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        let mut config = if Path::new(config_file).exists() {
            let contents = std::fs::read_to_string(config_file)
                .with_context(|| format!("Failed to read config file {config_file}"))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {config_file}"))?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
            default_config
        };

        if let Ok(secret) = std::env::var(WEBHOOK_SECRET_ENV)
            && !secret.is_empty()
        {
            config.hooks.webhook_secret = Some(secret);
        }

        Ok(config)
    }
}
