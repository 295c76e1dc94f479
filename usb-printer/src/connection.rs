//! Active USB connection
//!
//! At most one device is connected at a time. A connection is only stored
//! after its interface has been claimed; on every failure path the freshly
//! opened handle is closed before the error is returned.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::device::{DeviceDescriptor, DeviceId, find_bulk_out};
use crate::error::{PrintError, PrintResult};
use crate::host::{UsbDeviceHandle, UsbHost};

/// Everything a transfer needs, detached from the manager
#[derive(Clone)]
pub struct ActiveEndpoint {
    pub device: DeviceDescriptor,
    pub handle: Arc<dyn UsbDeviceHandle>,
    /// Bulk OUT endpoint address
    pub endpoint: u8,
    /// Serializes writes on this connection
    pub write_lock: Arc<tokio::sync::Mutex<()>>,
}

struct Connection {
    device: DeviceDescriptor,
    handle: Arc<dyn UsbDeviceHandle>,
    interface: u8,
    endpoint: u8,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
pub struct ConnectionManager {
    current: Option<Connection>,
}

fn close_quietly(device: &DeviceDescriptor, handle: &Arc<dyn UsbDeviceHandle>) {
    if let Err(e) = handle.close() {
        warn!(device = %device, error = %e, "Failed to close device handle");
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reuse) the connection to `device`
    #[instrument(skip(self, host), fields(device = %device))]
    pub fn open(
        &mut self,
        host: &dyn UsbHost,
        device: &DeviceDescriptor,
    ) -> PrintResult<DeviceDescriptor> {
        if !host.has_permission(device) {
            return Err(PrintError::PermissionDenied);
        }

        if let Some(current) = &self.current {
            if current.device.matches(device.id()) {
                debug!("Reusing open connection");
                return Ok(current.device.clone());
            }
        }

        self.close();

        let handle = host.open(device)?;

        let interfaces = match handle.interfaces() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                close_quietly(device, &handle);
                return Err(e);
            }
        };

        let Some((interface, endpoint)) = find_bulk_out(&interfaces) else {
            close_quietly(device, &handle);
            return Err(PrintError::NoSuitableEndpoint(device.to_string()));
        };

        if let Err(e) = handle.claim_interface(interface, true) {
            close_quietly(device, &handle);
            return Err(e);
        }

        info!(
            vendor_id = device.vendor_id,
            product_id = device.product_id,
            interface,
            endpoint,
            "USB connection opened"
        );

        self.current = Some(Connection {
            device: device.clone(),
            handle,
            interface,
            endpoint,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        });

        Ok(device.clone())
    }

    /// Release the interface, then close the handle. Never fails.
    pub fn close(&mut self) {
        let Some(conn) = self.current.take() else {
            return;
        };

        if let Err(e) = conn.handle.release_interface(conn.interface) {
            warn!(device = %conn.device, error = %e, "Failed to release interface");
        }
        close_quietly(&conn.device, &conn.handle);

        info!(device = %conn.device, "USB connection closed");
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_open_for(&self, id: DeviceId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|conn| conn.device.matches(id))
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.current.as_ref().map(|conn| &conn.device)
    }

    pub fn active(&self) -> Option<ActiveEndpoint> {
        self.current.as_ref().map(|conn| ActiveEndpoint {
            device: conn.device.clone(),
            handle: conn.handle.clone(),
            endpoint: conn.endpoint,
            write_lock: conn.write_lock.clone(),
        })
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
