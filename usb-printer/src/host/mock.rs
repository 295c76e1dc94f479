//! Scripted in-memory USB host for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::broadcast;

use super::{TransferStatus, UsbDeviceHandle, UsbEvent, UsbHost};
use crate::device::{
    DeviceDescriptor, DeviceId, Direction, EndpointDescriptor, InterfaceDescriptor, TransferType,
};
use crate::error::{PrintError, PrintResult};

/// How the next bulk transfers complete
#[derive(Debug, Clone)]
pub(crate) enum TransferBehaviour {
    /// Write everything
    Accept,
    /// Report at most this many bytes written
    Short(usize),
    /// Fail with a host status
    Status(TransferStatus),
    /// Never complete
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct MockDevice {
    pub descriptor: DeviceDescriptor,
    pub permitted: bool,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub open_failures: u32,
    pub claim_fails: bool,
}

impl MockDevice {
    /// Printer-class device: interface 0 with bulk IN 0x81 and bulk OUT 0x01
    pub fn printer(vendor_id: u16, product_id: u16) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                vendor_id,
                product_id,
                name: format!("Printer {:04x}:{:04x}", vendor_id, product_id),
                manufacturer: Some("ACME".into()),
                product: Some("Receipt Printer".into()),
                raw_identity: format!("001:{:03}", product_id % 1000),
            },
            permitted: false,
            interfaces: vec![InterfaceDescriptor {
                number: 0,
                endpoints: vec![
                    EndpointDescriptor {
                        address: 0x81,
                        transfer_type: TransferType::Bulk,
                        direction: Direction::In,
                    },
                    EndpointDescriptor {
                        address: 0x01,
                        transfer_type: TransferType::Bulk,
                        direction: Direction::Out,
                    },
                ],
            }],
            open_failures: 0,
            claim_fails: false,
        }
    }

    pub fn permitted(mut self) -> Self {
        self.permitted = true;
        self
    }

    /// Only an interrupt IN endpoint
    pub fn without_bulk_out(mut self) -> Self {
        self.interfaces = vec![InterfaceDescriptor {
            number: 0,
            endpoints: vec![EndpointDescriptor {
                address: 0x82,
                transfer_type: TransferType::Interrupt,
                direction: Direction::In,
            }],
        }];
        self
    }

    pub fn failing_opens(mut self, count: u32) -> Self {
        self.open_failures = count;
        self
    }

    pub fn failing_claim(mut self) -> Self {
        self.claim_fails = true;
        self
    }
}

struct Shared {
    devices: Mutex<Vec<MockDevice>>,
    prompts: AtomicU32,
    opens: AtomicU32,
    ops: Mutex<Vec<String>>,
    written: Mutex<Vec<Vec<u8>>>,
    transfer: Mutex<TransferBehaviour>,
    /// Answer permission prompts immediately
    auto_answer: Mutex<Option<bool>>,
}

pub(crate) struct MockHost {
    shared: Arc<Shared>,
    events: broadcast::Sender<UsbEvent>,
}

impl MockHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            shared: Arc::new(Shared {
                devices: Mutex::new(Vec::new()),
                prompts: AtomicU32::new(0),
                opens: AtomicU32::new(0),
                ops: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
                transfer: Mutex::new(TransferBehaviour::Accept),
                auto_answer: Mutex::new(None),
            }),
            events,
        }
    }

    pub fn with_device(self, device: MockDevice) -> Self {
        self.shared.devices.lock().push(device);
        self
    }

    pub fn answering(self, granted: bool) -> Self {
        *self.shared.auto_answer.lock() = Some(granted);
        self
    }

    pub fn descriptor(&self, id: DeviceId) -> DeviceDescriptor {
        self.shared
            .devices
            .lock()
            .iter()
            .find(|d| d.descriptor.matches(id))
            .map(|d| d.descriptor.clone())
            .expect("scripted device")
    }

    /// OS prompt answered with "allow"
    pub fn grant(&self, id: DeviceId) {
        let device = self.set_permitted(id, true);
        let _ = self.events.send(UsbEvent::PermissionResult {
            device,
            granted: true,
        });
    }

    /// OS prompt answered with "deny"
    pub fn deny(&self, id: DeviceId) {
        let device = self.descriptor(id);
        let _ = self.events.send(UsbEvent::PermissionResult {
            device,
            granted: false,
        });
    }

    pub fn attach(&self, device: MockDevice) {
        let descriptor = device.descriptor.clone();
        self.shared.devices.lock().push(device);
        let _ = self.events.send(UsbEvent::Attached(descriptor));
    }

    pub fn detach(&self, id: DeviceId) {
        let descriptor = self.descriptor(id);
        self.shared
            .devices
            .lock()
            .retain(|d| !d.descriptor.matches(id));
        let _ = self.events.send(UsbEvent::Detached(descriptor));
    }

    pub fn set_transfer(&self, behaviour: TransferBehaviour) {
        *self.shared.transfer.lock() = behaviour;
    }

    pub fn prompts(&self) -> u32 {
        self.shared.prompts.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> u32 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn ops(&self) -> Vec<String> {
        self.shared.ops.lock().clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.written.lock().clone()
    }

    fn set_permitted(&self, id: DeviceId, permitted: bool) -> DeviceDescriptor {
        let mut devices = self.shared.devices.lock();
        let device = devices
            .iter_mut()
            .find(|d| d.descriptor.matches(id))
            .expect("scripted device");
        device.permitted = permitted;
        device.descriptor.clone()
    }
}

impl UsbHost for MockHost {
    fn devices(&self) -> PrintResult<Vec<DeviceDescriptor>> {
        Ok(self
            .shared
            .devices
            .lock()
            .iter()
            .map(|d| d.descriptor.clone())
            .collect())
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        self.shared
            .devices
            .lock()
            .iter()
            .any(|d| d.descriptor.matches(device.id()) && d.permitted)
    }

    fn request_permission(&self, device: &DeviceDescriptor) {
        self.shared.prompts.fetch_add(1, Ordering::SeqCst);
        self.shared.ops.lock().push(format!("prompt {}", device.id()));

        let answer = *self.shared.auto_answer.lock();
        match answer {
            Some(true) => self.grant(device.id()),
            Some(false) => self.deny(device.id()),
            None => {}
        }
    }

    fn open(&self, device: &DeviceDescriptor) -> PrintResult<Arc<dyn UsbDeviceHandle>> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);

        let mut devices = self.shared.devices.lock();
        let scripted = devices
            .iter_mut()
            .find(|d| d.descriptor.matches(device.id()))
            .ok_or_else(|| PrintError::DeviceGone(device.to_string()))?;

        if scripted.open_failures > 0 {
            scripted.open_failures -= 1;
            return Err(PrintError::OpenFailed("scripted open failure".into()));
        }

        self.shared.ops.lock().push("open".into());
        Ok(Arc::new(MockHandle {
            shared: self.shared.clone(),
            interfaces: scripted.interfaces.clone(),
            claim_fails: scripted.claim_fails,
            closed: AtomicBool::new(false),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<UsbEvent> {
        self.events.subscribe()
    }
}

struct MockHandle {
    shared: Arc<Shared>,
    interfaces: Vec<InterfaceDescriptor>,
    claim_fails: bool,
    closed: AtomicBool,
}

#[async_trait]
impl UsbDeviceHandle for MockHandle {
    fn interfaces(&self) -> PrintResult<Vec<InterfaceDescriptor>> {
        Ok(self.interfaces.clone())
    }

    fn claim_interface(&self, number: u8, force: bool) -> PrintResult<()> {
        if self.claim_fails {
            return Err(PrintError::ClaimFailed(format!("interface {} busy", number)));
        }
        self.shared
            .ops
            .lock()
            .push(format!("claim {} force={}", number, force));
        Ok(())
    }

    fn release_interface(&self, number: u8) -> PrintResult<()> {
        self.shared.ops.lock().push(format!("release {}", number));
        Ok(())
    }

    fn close(&self) -> PrintResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.ops.lock().push("close".into());
        Ok(())
    }

    async fn bulk_out(&self, _endpoint: u8, data: Vec<u8>) -> Result<usize, TransferStatus> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransferStatus::Disconnected);
        }

        let behaviour = self.shared.transfer.lock().clone();
        match behaviour {
            TransferBehaviour::Accept => {
                let len = data.len();
                self.shared.written.lock().push(data);
                Ok(len)
            }
            TransferBehaviour::Short(max) => {
                let len = data.len().min(max);
                self.shared.written.lock().push(data);
                Ok(len)
            }
            TransferBehaviour::Status(status) => Err(status),
            TransferBehaviour::Hang => std::future::pending().await,
        }
    }
}
