//! Caller-facing printer operations
//!
//! This is the surface a host-application bridge calls into. Every operation
//! returns a [`PrintResult`] whose error `Display` is the reason string to
//! hand back to the caller.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::adapter::{AdapterEvent, UsbPrinterAdapter};
use crate::config::PrinterConfig;
use crate::device::DeviceDescriptor;
use crate::error::{PrintError, PrintResult};
use crate::host::UsbHost;
use crate::image_source::ImageSource;

pub struct UsbPrinterModule {
    config: PrinterConfig,
    images: Option<Arc<dyn ImageSource>>,
    adapter: Option<UsbPrinterAdapter>,
}

impl UsbPrinterModule {
    pub fn new(config: PrinterConfig) -> Self {
        Self {
            config,
            images: None,
            adapter: None,
        }
    }

    /// Use a custom image source instead of the built-in HTTP one
    pub fn with_image_source(mut self, images: Arc<dyn ImageSource>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.adapter.is_some()
    }

    fn adapter(&self) -> PrintResult<&UsbPrinterAdapter> {
        self.adapter.as_ref().ok_or(PrintError::SystemNotReady)
    }

    /// Create the adapter context; a second call is a no-op
    pub fn init(&mut self, host: Arc<dyn UsbHost>) -> PrintResult<()> {
        if self.adapter.is_some() {
            info!("USB printer module already initialized");
            return Ok(());
        }

        let images = match self.images.clone() {
            Some(images) => Some(images),
            None => default_image_source(&self.config)?,
        };
        self.adapter = Some(UsbPrinterAdapter::init(host, self.config.clone(), images)?);
        Ok(())
    }

    /// Visible devices; an empty list is reported as an error
    pub fn list_devices(&self) -> PrintResult<Vec<DeviceDescriptor>> {
        let devices = self.adapter()?.list_devices()?;
        if devices.is_empty() {
            return Err(PrintError::DeviceNotFound("No Device Found".into()));
        }
        Ok(devices)
    }

    pub async fn select_device(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> PrintResult<DeviceDescriptor> {
        self.adapter()?.select_device(vendor_id, product_id).await
    }

    /// Print base64-encoded ESC/POS bytes
    pub async fn print_raw(&self, payload: Option<&str>) -> PrintResult<()> {
        self.adapter()?.print_raw(payload).await
    }

    pub async fn print_image(&self, url: &str) -> PrintResult<()> {
        self.adapter()?.print_image(url).await
    }

    pub async fn print_image_bytes(&self, encoded: &[u8]) -> PrintResult<()> {
        self.adapter()?.print_image_bytes(encoded).await
    }

    /// Always fails: QR codes are not synthesized
    #[instrument(skip(self, _data))]
    pub fn print_qr_code(&self, _data: &str) -> PrintResult<()> {
        Err(PrintError::NotImplemented("QR code printing"))
    }

    pub fn close_connection(&self) {
        if let Some(adapter) = &self.adapter {
            adapter.close_connection();
        }
    }

    pub fn subscribe(&self) -> PrintResult<broadcast::Receiver<AdapterEvent>> {
        Ok(self.adapter()?.subscribe())
    }

    /// Drop the adapter context; safe without `init`
    pub fn teardown(&mut self) {
        if let Some(adapter) = self.adapter.take() {
            adapter.teardown();
        }
    }
}

impl Drop for UsbPrinterModule {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(feature = "http")]
fn default_image_source(config: &PrinterConfig) -> PrintResult<Option<Arc<dyn ImageSource>>> {
    let source = crate::image_source::HttpImageSource::from_config(config)?;
    Ok(Some(Arc::new(source)))
}

#[cfg(not(feature = "http"))]
fn default_image_source(_config: &PrinterConfig) -> PrintResult<Option<Arc<dyn ImageSource>>> {
    Ok(None)
}
