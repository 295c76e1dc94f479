//! Image loading for the raster path

use async_trait::async_trait;
use image::{ImageReader, Limits, RgbaImage};
use std::io::Cursor;
use tracing::{debug, instrument, warn};

use crate::error::{PrintError, PrintResult};

/// Fetches encoded image bytes (PNG, JPEG, ...) by URL
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> PrintResult<Vec<u8>>;
}

/// Decode an encoded image into RGBA pixels
///
/// Images wider or taller than `max_side` are rejected from their header,
/// before any pixel buffer is allocated.
pub fn decode_image(bytes: &[u8], max_side: u32) -> PrintResult<RgbaImage> {
    let unavailable = |e: &dyn std::fmt::Display| {
        warn!(error = %e, bytes = bytes.len(), "Image decode failed");
        PrintError::ImageUnavailable(e.to_string())
    };

    let mut limits = Limits::default();
    limits.max_image_width = Some(max_side);
    limits.max_image_height = Some(max_side);

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| unavailable(&e))?;
    reader.limits(limits);

    let img = reader.decode().map_err(|e| unavailable(&e))?;
    Ok(img.to_rgba8())
}

/// HTTP(S) image source
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpImageSource {
    pub fn new(timeout: std::time::Duration) -> PrintResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PrintError::ImageUnavailable(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &crate::config::PrinterConfig) -> PrintResult<Self> {
        Self::new(config.image_fetch_timeout)
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl ImageSource for HttpImageSource {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> PrintResult<Vec<u8>> {
        let unavailable = |e: reqwest::Error| {
            warn!(error = %e, "Image fetch failed");
            PrintError::ImageUnavailable(url.to_string())
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(unavailable)?;
        let bytes = response.bytes().await.map_err(unavailable)?;

        debug!(bytes = bytes.len(), "Image fetched");
        Ok(bytes.to_vec())
    }
}
