/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

// Storage defaults
pub const DEFAULT_CACHE_DIR: &str = "./data/cache";
pub const DEFAULT_ICON_DIR: &str = "./data/icons";
pub const DEFAULT_ICON_BASE_URL: &str = "http://localhost:8080/icons/";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./data/usb-ids.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

// Remote metadata service defaults
pub const DEFAULT_REMOTE_SERVICE_URL: &str = "http://dmd.metaservices.microsoft.com/dms/metadata.svc";
pub const DEFAULT_REMOTE_DOWNLOAD_URL: &str = "http://download.dmd.metaservices.microsoft.com/dp/winqual/";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// Icon defaults
pub const DEFAULT_ICON_MIN_WIDTH: u32 = 48;
pub const DEFAULT_ICON_MIN_COLOR_DEPTH: u16 = 8;
pub const DEFAULT_ICON_REFRESH_BRANCH: &str = "origin/master";

// Ingestion defaults
pub const DEFAULT_USB_IDS_URL: &str = "http://www.linux-usb.org/usb.ids.gz";
