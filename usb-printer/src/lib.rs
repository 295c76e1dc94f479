//! # usb-printer
//!
//! USB ESC/POS receipt printer bridge.
//!
//! ## Scope
//!
//! This crate moves bytes to a USB thermal printer:
//! - Device discovery and OS permission handshake
//! - Single active bulk OUT connection (claim, reuse, close)
//! - Raw ESC/POS payloads (base64)
//! - Image printing as 24-dot column raster
//!
//! Receipt layout and fonts stay in application code.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use usb_printer::{NusbHost, PrinterConfig, UsbPrinterModule};
//!
//! let config = PrinterConfig::from_env();
//! let mut module = UsbPrinterModule::new(config.clone());
//! module.init(Arc::new(NusbHost::from_config(&config)))?;
//!
//! module.select_device(0x04b8, 0x0202).await?;
//! module.print_raw(Some("G0A=")).await?; // ESC @
//! module.print_image("https://example.com/logo.png").await?;
//! ```

pub mod adapter;
pub mod config;
pub mod connection;
pub mod device;
mod error;
pub mod escpos;
pub mod host;
pub mod image_source;
pub mod logger;
pub mod module;
pub mod permission;
pub mod raster;
pub mod registry;
pub mod transfer;

// Re-exports
pub use adapter::{AdapterEvent, UsbPrinterAdapter};
pub use config::PrinterConfig;
pub use device::{DeviceDescriptor, DeviceId};
pub use error::{ErrorCode, PrintError, PrintResult};
pub use host::{TransferStatus, UsbDeviceHandle, UsbEvent, UsbHost};
pub use image_source::{ImageSource, decode_image};
pub use module::UsbPrinterModule;
pub use raster::{RasterEncoder, RasterImage};

#[cfg(feature = "nusb")]
pub use host::NusbHost;

#[cfg(feature = "http")]
pub use image_source::HttpImageSource;
