//! USB host backends
//!
//! The adapter never talks to an OS USB stack directly. It goes through
//! [`UsbHost`] (enumeration, permission, opening) and [`UsbDeviceHandle`]
//! (one opened device). Asynchronous OS notifications (permission answers,
//! attach, detach) are delivered as [`UsbEvent`]s on a broadcast channel.
//!
//! Available backends:
//! - [`NusbHost`]: desktop backend on the `nusb` crate (feature `nusb`)

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "nusb")]
mod nusb_host;

#[cfg(feature = "nusb")]
pub use nusb_host::NusbHost;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::device::{DeviceDescriptor, InterfaceDescriptor};
use crate::error::PrintResult;

/// Notification from the USB subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    /// Answer to [`UsbHost::request_permission`]
    PermissionResult {
        device: DeviceDescriptor,
        granted: bool,
    },
    Attached(DeviceDescriptor),
    Detached(DeviceDescriptor),
}

/// Failure status of a bulk transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Timeout,
    Stall,
    Disconnected,
    Cancelled,
    Fault,
    Other(String),
}

impl TransferStatus {
    /// Numeric status reported to callers (libusb numbering)
    pub fn code(&self) -> i32 {
        match self {
            Self::Fault => -1,
            Self::Disconnected => -4,
            Self::Timeout => -7,
            Self::Stall => -9,
            Self::Cancelled => -10,
            Self::Other(_) => -99,
        }
    }
}

/// Access to the OS USB subsystem
pub trait UsbHost: Send + Sync {
    /// Currently visible devices
    fn devices(&self) -> PrintResult<Vec<DeviceDescriptor>>;

    /// Whether the process may open this device right now
    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Ask the OS for access; the answer arrives as [`UsbEvent::PermissionResult`]
    fn request_permission(&self, device: &DeviceDescriptor);

    /// Open a device handle (no interface claimed yet)
    fn open(&self, device: &DeviceDescriptor) -> PrintResult<Arc<dyn UsbDeviceHandle>>;

    /// Register for permission/attach/detach events
    fn subscribe(&self) -> broadcast::Receiver<UsbEvent>;
}

/// One opened USB device
#[async_trait]
pub trait UsbDeviceHandle: Send + Sync {
    /// Interfaces of the active configuration (default alternate settings)
    fn interfaces(&self) -> PrintResult<Vec<InterfaceDescriptor>>;

    /// Claim an interface; `force` detaches a conflicting kernel driver first
    fn claim_interface(&self, number: u8, force: bool) -> PrintResult<()>;

    fn release_interface(&self, number: u8) -> PrintResult<()>;

    /// Close the device handle. Further transfers fail with `Disconnected`.
    fn close(&self) -> PrintResult<()>;

    /// Single bulk OUT transfer; returns the number of bytes written
    async fn bulk_out(&self, endpoint: u8, data: Vec<u8>) -> Result<usize, TransferStatus>;
}
