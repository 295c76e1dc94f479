//! Desktop USB backend using the `nusb` crate
//!
//! Desktop systems have no interactive permission prompt: access is decided
//! by whether the device node can be opened (udev rules on Linux). A
//! permission request therefore probes the device and answers at once
//! through the event channel. Attach/detach are detected by polling the
//! device list.

use async_trait::async_trait;
use nusb::transfer::{Direction as NusbDirection, EndpointType, TransferError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{TransferStatus, UsbDeviceHandle, UsbEvent, UsbHost};
use crate::config::PrinterConfig;
use crate::device::{
    DeviceDescriptor, Direction, EndpointDescriptor, InterfaceDescriptor, TransferType,
};
use crate::error::{PrintError, PrintResult};

const EVENT_CAPACITY: usize = 64;

struct Shared {
    events: broadcast::Sender<UsbEvent>,
    /// Raw identities known to be openable
    permitted: Mutex<HashSet<String>>,
}

/// USB host backed by `nusb`
pub struct NusbHost {
    shared: Arc<Shared>,
    poll_interval: Duration,
    poller: Mutex<Option<CancellationToken>>,
}

impl NusbHost {
    pub fn new(poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                events,
                permitted: Mutex::new(HashSet::new()),
            }),
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    pub fn from_config(config: &PrinterConfig) -> Self {
        Self::new(config.hotplug_poll_interval)
    }

    fn start_poller(&self) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime, hot-plug events disabled");
            return;
        };
        let token = CancellationToken::new();
        runtime.spawn(poll_hotplug(
            self.shared.clone(),
            self.poll_interval,
            token.clone(),
        ));
        *poller = Some(token);
    }
}

impl Drop for NusbHost {
    fn drop(&mut self) {
        if let Some(token) = self.poller.lock().take() {
            token.cancel();
        }
    }
}

fn raw_identity(info: &nusb::DeviceInfo) -> String {
    format!("{:03}:{:03}", info.bus_number(), info.device_address())
}

fn describe(info: &nusb::DeviceInfo) -> DeviceDescriptor {
    let manufacturer = info.manufacturer_string().map(str::to_string);
    let product = info.product_string().map(str::to_string);
    let name = product.clone().unwrap_or_else(|| {
        format!(
            "USB device {:04x}:{:04x}",
            info.vendor_id(),
            info.product_id()
        )
    });

    DeviceDescriptor {
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        name,
        manufacturer,
        product,
        raw_identity: raw_identity(info),
    }
}

fn list_infos() -> PrintResult<Vec<nusb::DeviceInfo>> {
    nusb::list_devices()
        .map(|devices| devices.collect())
        .map_err(|e| PrintError::DeviceNotFound(format!("Error getting device list: {}", e)))
}

/// Resolve a descriptor to a live device, by raw identity first, then VID/PID
fn find_info(device: &DeviceDescriptor) -> PrintResult<nusb::DeviceInfo> {
    let infos = list_infos()?;
    let by_identity = infos
        .iter()
        .position(|info| raw_identity(info) == device.raw_identity);
    let index = by_identity.or_else(|| {
        infos.iter().position(|info| {
            info.vendor_id() == device.vendor_id && info.product_id() == device.product_id
        })
    });

    index
        .map(|i| infos[i].clone())
        .ok_or_else(|| PrintError::DeviceGone(device.to_string()))
}

async fn poll_hotplug(shared: Arc<Shared>, interval: Duration, token: CancellationToken) {
    let snapshot = || -> HashMap<String, DeviceDescriptor> {
        list_infos()
            .unwrap_or_default()
            .iter()
            .map(|info| (raw_identity(info), describe(info)))
            .collect()
    };

    let mut known = snapshot();
    let mut ticker = tokio::time::interval(interval);
    debug!(devices = known.len(), "Hot-plug poller started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let current = snapshot();

                for (id, device) in &current {
                    if !known.contains_key(id) {
                        info!(device = %device, "USB device attached");
                        let _ = shared.events.send(UsbEvent::Attached(device.clone()));
                    }
                }
                for (id, device) in &known {
                    if !current.contains_key(id) {
                        info!(device = %device, "USB device detached");
                        shared.permitted.lock().remove(id);
                        let _ = shared.events.send(UsbEvent::Detached(device.clone()));
                    }
                }

                known = current;
            }
        }
    }

    debug!("Hot-plug poller stopped");
}

impl UsbHost for NusbHost {
    fn devices(&self) -> PrintResult<Vec<DeviceDescriptor>> {
        Ok(list_infos()?.iter().map(describe).collect())
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        if self.shared.permitted.lock().contains(&device.raw_identity) {
            return true;
        }

        match find_info(device).and_then(|info| {
            info.open()
                .map_err(|e| PrintError::OpenFailed(e.to_string()))
        }) {
            Ok(_) => {
                self.shared
                    .permitted
                    .lock()
                    .insert(device.raw_identity.clone());
                true
            }
            Err(e) => {
                debug!(device = %device, error = %e, "Device not accessible");
                false
            }
        }
    }

    #[instrument(skip(self), fields(device = %device))]
    fn request_permission(&self, device: &DeviceDescriptor) {
        let granted = self.has_permission(device);
        if !granted {
            warn!("Device node is not accessible, check udev rules or run with elevated rights");
        }
        let _ = self.shared.events.send(UsbEvent::PermissionResult {
            device: device.clone(),
            granted,
        });
    }

    fn open(&self, device: &DeviceDescriptor) -> PrintResult<Arc<dyn UsbDeviceHandle>> {
        let info = find_info(device)?;
        let handle = info
            .open()
            .map_err(|e| PrintError::OpenFailed(format!("{}: {}", device, e)))?;

        self.shared
            .permitted
            .lock()
            .insert(device.raw_identity.clone());

        Ok(Arc::new(NusbDeviceHandle {
            device: handle,
            claimed: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<UsbEvent> {
        let receiver = self.shared.events.subscribe();
        self.start_poller();
        receiver
    }
}

struct NusbDeviceHandle {
    device: nusb::Device,
    claimed: Mutex<Option<(u8, nusb::Interface)>>,
    closed: AtomicBool,
}

fn map_transfer_error(e: TransferError) -> TransferStatus {
    match e {
        TransferError::Cancelled => TransferStatus::Cancelled,
        TransferError::Stall => TransferStatus::Stall,
        TransferError::Disconnected => TransferStatus::Disconnected,
        TransferError::Fault => TransferStatus::Fault,
        other => TransferStatus::Other(other.to_string()),
    }
}

#[async_trait]
impl UsbDeviceHandle for NusbDeviceHandle {
    fn interfaces(&self) -> PrintResult<Vec<InterfaceDescriptor>> {
        let config = self.device.active_configuration().map_err(|e| {
            PrintError::OpenFailed(format!("failed to read active configuration: {}", e))
        })?;

        let interfaces = config
            .interface_alt_settings()
            .filter(|alt| alt.alternate_setting() == 0)
            .map(|alt| InterfaceDescriptor {
                number: alt.interface_number(),
                endpoints: alt
                    .endpoints()
                    .map(|ep| EndpointDescriptor {
                        address: ep.address(),
                        transfer_type: match ep.transfer_type() {
                            EndpointType::Control => TransferType::Control,
                            EndpointType::Isochronous => TransferType::Isochronous,
                            EndpointType::Bulk => TransferType::Bulk,
                            EndpointType::Interrupt => TransferType::Interrupt,
                        },
                        direction: match ep.direction() {
                            NusbDirection::In => Direction::In,
                            NusbDirection::Out => Direction::Out,
                        },
                    })
                    .collect(),
            })
            .collect();

        Ok(interfaces)
    }

    fn claim_interface(&self, number: u8, force: bool) -> PrintResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PrintError::ClaimFailed("device handle is closed".into()));
        }

        // On Linux `usblp` usually holds printer-class interfaces
        let claimed = if force {
            self.device.detach_and_claim_interface(number)
        } else {
            self.device.claim_interface(number)
        }
        .map_err(|e| PrintError::ClaimFailed(format!("interface {}: {}", number, e)))?;

        *self.claimed.lock() = Some((number, claimed));
        Ok(())
    }

    fn release_interface(&self, number: u8) -> PrintResult<()> {
        let mut claimed = self.claimed.lock();
        if matches!(claimed.as_ref(), Some((n, _)) if *n == number) {
            // Dropping the interface releases it
            claimed.take();
        }
        Ok(())
    }

    fn close(&self) -> PrintResult<()> {
        self.claimed.lock().take();
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn bulk_out(&self, endpoint: u8, data: Vec<u8>) -> Result<usize, TransferStatus> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransferStatus::Disconnected);
        }

        let interface = {
            let claimed = self.claimed.lock();
            claimed.as_ref().map(|(_, iface)| iface.clone())
        };
        let Some(interface) = interface else {
            return Err(TransferStatus::Disconnected);
        };

        let completion = interface.bulk_out(endpoint, data).await;
        match completion.status {
            Ok(()) => Ok(completion.data.actual_length()),
            Err(e) => Err(map_transfer_error(e)),
        }
    }
}
