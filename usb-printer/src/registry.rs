//! Device enumeration

use std::sync::Arc;
use tracing::debug;

use crate::device::{DeviceDescriptor, DeviceId};
use crate::error::{PrintError, PrintResult};
use crate::host::UsbHost;

/// Holds the USB host handle for the lifetime of an adapter
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    host: Option<Arc<dyn UsbHost>>,
}

impl DeviceRegistry {
    pub fn new(host: Option<Arc<dyn UsbHost>>) -> Self {
        Self { host }
    }

    /// The host handle, or `SystemNotReady` once released
    pub fn host(&self) -> PrintResult<&Arc<dyn UsbHost>> {
        self.host.as_ref().ok_or(PrintError::SystemNotReady)
    }

    /// Drop the host handle; later calls fail with `SystemNotReady`
    pub fn release(&mut self) {
        self.host = None;
    }

    /// Devices currently visible to the host; empty is not an error here
    pub fn list(&self) -> PrintResult<Vec<DeviceDescriptor>> {
        let devices = self.host()?.devices()?;
        debug!(count = devices.len(), "USB devices enumerated");
        Ok(devices)
    }

    pub fn find(&self, id: DeviceId) -> PrintResult<Option<DeviceDescriptor>> {
        Ok(self.list()?.into_iter().find(|d| d.matches(id)))
    }
}
