//! Printer configuration
//!
//! All values can be overridden through environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | USB_TRANSFER_TIMEOUT_MS | 100000 | bulk write timeout |
//! | IMAGE_MAX_DIMENSION | 200 | raster downscale bound (pixels) |
//! | IMAGE_MAX_SOURCE_DIMENSION | 8192 | largest image side accepted for decoding |
//! | IMAGE_FETCH_TIMEOUT_MS | 30000 | HTTP image fetch timeout |
//! | USB_HOTPLUG_POLL_MS | 1000 | hot-plug poll interval (nusb backend) |
//! | OPEN_RETRY_ATTEMPTS | 1 | re-open retries when re-selecting a permitted device |
//! | LOG_LEVEL | info | logger level |
//! | LOG_JSON | false | JSON console output |
//! | LOG_DIR | - | directory for daily rolling log files |

use std::time::Duration;

/// Default bulk transfer timeout (milliseconds)
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 100_000;

/// Default raster downscale bound
pub const DEFAULT_IMAGE_MAX_DIMENSION: u32 = 200;

/// Default decoder bound for source images
pub const DEFAULT_IMAGE_MAX_SOURCE_DIMENSION: u32 = 8192;

#[derive(Debug, Clone)]
pub struct PrinterConfig {
    /// Fixed timeout for one bulk OUT transfer (whole payload)
    pub transfer_timeout: Duration,
    /// Images larger than this on either side are scaled down
    pub image_max_dimension: u32,
    /// Images larger than this on either side are rejected before decoding
    pub image_max_source_dimension: u32,
    /// Timeout for fetching an image over HTTP
    pub image_fetch_timeout: Duration,
    /// Hot-plug poll interval for backends without native events
    pub hotplug_poll_interval: Duration,
    /// Automatic re-open retries for an already permitted device
    pub open_retry_attempts: u32,
    /// Log level (e.g. "info", "debug")
    pub log_level: String,
    /// JSON formatted console logs
    pub log_json: bool,
    /// Optional directory for rolling log files
    pub log_dir: Option<String>,
}

impl PrinterConfig {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Self {
        Self {
            transfer_timeout: Duration::from_millis(env_parse(
                "USB_TRANSFER_TIMEOUT_MS",
                DEFAULT_TRANSFER_TIMEOUT_MS,
            )),
            image_max_dimension: env_parse("IMAGE_MAX_DIMENSION", DEFAULT_IMAGE_MAX_DIMENSION),
            image_max_source_dimension: env_parse(
                "IMAGE_MAX_SOURCE_DIMENSION",
                DEFAULT_IMAGE_MAX_SOURCE_DIMENSION,
            ),
            image_fetch_timeout: Duration::from_millis(env_parse("IMAGE_FETCH_TIMEOUT_MS", 30_000)),
            hotplug_poll_interval: Duration::from_millis(env_parse("USB_HOTPLUG_POLL_MS", 1_000)),
            open_retry_attempts: env_parse("OPEN_RETRY_ATTEMPTS", 1),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_parse("LOG_JSON", false),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty()),
        }
    }

    /// Set the bulk transfer timeout
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the raster downscale bound
    pub fn with_image_max_dimension(mut self, max: u32) -> Self {
        self.image_max_dimension = max;
        self
    }

    /// Set the decoder bound for source images
    pub fn with_image_max_source_dimension(mut self, max: u32) -> Self {
        self.image_max_source_dimension = max;
        self
    }

    /// Set the hot-plug poll interval
    pub fn with_hotplug_poll_interval(mut self, interval: Duration) -> Self {
        self.hotplug_poll_interval = interval;
        self
    }

    /// Set the number of automatic re-open retries
    pub fn with_open_retry_attempts(mut self, attempts: u32) -> Self {
        self.open_retry_attempts = attempts;
        self
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            transfer_timeout: Duration::from_millis(DEFAULT_TRANSFER_TIMEOUT_MS),
            image_max_dimension: DEFAULT_IMAGE_MAX_DIMENSION,
            image_max_source_dimension: DEFAULT_IMAGE_MAX_SOURCE_DIMENSION,
            image_fetch_timeout: Duration::from_secs(30),
            hotplug_poll_interval: Duration::from_secs(1),
            open_retry_attempts: 1,
            log_level: "info".into(),
            log_json: false,
            log_dir: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
