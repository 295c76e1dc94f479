//! USB printer adapter
//!
//! Owned context created by [`UsbPrinterAdapter::init`] and destroyed by
//! [`UsbPrinterAdapter::teardown`]. It wires the registry, permission gate,
//! connection manager, raster encoder and transfer worker together, and runs
//! one event loop that reacts to host notifications.
//!
//! All session state (gate, connection, selected device, host handle) lives
//! behind a single mutex. The lock is never held across an `.await`: callers
//! waiting for a permission answer hold only a oneshot receiver.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PrinterConfig;
use crate::connection::{ActiveEndpoint, ConnectionManager};
use crate::device::{DeviceDescriptor, DeviceId};
use crate::error::{PrintError, PrintResult};
use crate::host::{UsbEvent, UsbHost};
use crate::image_source::{ImageSource, decode_image};
use crate::permission::PermissionGate;
use crate::raster::RasterEncoder;
use crate::registry::DeviceRegistry;
use crate::transfer::TransferWorker;

const EVENT_CAPACITY: usize = 16;

/// Notification for the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "device", rename_all = "snake_case")]
pub enum AdapterEvent {
    DeviceAttached(DeviceDescriptor),
    DeviceDetached(DeviceDescriptor),
}

struct Session {
    registry: DeviceRegistry,
    gate: PermissionGate,
    connection: ConnectionManager,
    selected: Option<DeviceDescriptor>,
}

impl Session {
    /// Open with up to `retries` extra attempts on open/claim failures
    fn open_with_retry(
        &mut self,
        device: &DeviceDescriptor,
        retries: u32,
    ) -> PrintResult<DeviceDescriptor> {
        let host = self.registry.host()?.clone();
        let mut attempt = 0;
        loop {
            match self.connection.open(host.as_ref(), device) {
                Err(e @ (PrintError::OpenFailed(_) | PrintError::ClaimFailed(_)))
                    if attempt < retries =>
                {
                    attempt += 1;
                    warn!(device = %device, attempt, error = %e, "Open failed, retrying");
                }
                result => return result,
            }
        }
    }
}

struct Inner {
    session: Mutex<Session>,
    config: PrinterConfig,
    encoder: RasterEncoder,
    worker: TransferWorker,
    images: Option<Arc<dyn ImageSource>>,
    events: broadcast::Sender<AdapterEvent>,
}

impl Inner {
    fn handle_event(&self, event: UsbEvent) {
        match event {
            UsbEvent::PermissionResult {
                device,
                granted: true,
            } => self.on_permission_granted(&device),
            UsbEvent::PermissionResult {
                device,
                granted: false,
            } => {
                self.session.lock().gate.on_denied(device.id());
            }
            UsbEvent::Attached(device) => {
                info!(device = %device, "USB device attached");
                let _ = self.events.send(AdapterEvent::DeviceAttached(device));
            }
            UsbEvent::Detached(device) => self.on_detached(device),
        }
    }

    fn on_permission_granted(&self, device: &DeviceDescriptor) {
        let mut session = self.session.lock();
        let Some(pending) = session.gate.on_granted(device.id()) else {
            return;
        };

        let target = pending.target().clone();
        session.selected = Some(target.clone());
        let outcome = session.open_with_retry(&target, 0);
        if let Err(e) = &outcome {
            error!(device = %target, error = %e, "Failed to establish connection after permission granted");
        }
        pending.resolve(outcome);
    }

    /// Host events were dropped; a permission answer may be among them
    fn on_lagged(&self, skipped: u64) {
        warn!(skipped, "USB event loop lagged");
        self.session.lock().gate.cancel(PrintError::PermissionLost);
    }

    fn on_detached(&self, device: DeviceDescriptor) {
        let id = device.id();
        {
            let mut session = self.session.lock();
            session.gate.on_detached(id);
            if session.connection.is_open_for(id) {
                warn!(device = %device, "Connected device detached");
                session.connection.close();
            }
            if session.selected.as_ref().is_some_and(|d| d.matches(id)) {
                session.selected = None;
            }
        }
        let _ = self.events.send(AdapterEvent::DeviceDetached(device));
    }
}

async fn run_event_loop(
    inner: Weak<Inner>,
    mut host_events: broadcast::Receiver<UsbEvent>,
    shutdown: CancellationToken,
) {
    debug!("USB event loop started");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = host_events.recv() => event,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            Ok(event) => inner.handle_event(event),
            Err(RecvError::Lagged(skipped)) => inner.on_lagged(skipped),
            Err(RecvError::Closed) => break,
        }
    }

    debug!("USB event loop stopped");
}

/// Decode a base64 payload; ASCII whitespace anywhere is ignored
fn decode_payload(payload: Option<&str>) -> PrintResult<Vec<u8>> {
    let compact: String = payload
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(PrintError::EmptyPayload);
    }

    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| PrintError::DecodeFailed(e.to_string()))?;
    if bytes.is_empty() {
        return Err(PrintError::EmptyPayload);
    }
    Ok(bytes)
}

/// Handle to an initialized adapter; clones share the same session
#[derive(Clone)]
pub struct UsbPrinterAdapter {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
}

impl UsbPrinterAdapter {
    /// Build the context and start the event loop
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init(
        host: Arc<dyn UsbHost>,
        config: PrinterConfig,
        images: Option<Arc<dyn ImageSource>>,
    ) -> PrintResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            error!("USB printer adapter needs a Tokio runtime");
            PrintError::SystemNotReady
        })?;

        let host_events = host.subscribe();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            session: Mutex::new(Session {
                registry: DeviceRegistry::new(Some(host)),
                gate: PermissionGate::new(),
                connection: ConnectionManager::new(),
                selected: None,
            }),
            encoder: RasterEncoder::new(config.image_max_dimension),
            worker: TransferWorker::new(config.transfer_timeout),
            config,
            images,
            events,
        });

        let shutdown = CancellationToken::new();
        runtime.spawn(run_event_loop(
            Arc::downgrade(&inner),
            host_events,
            shutdown.clone(),
        ));

        info!("USB printer adapter initialized");
        Ok(Self { inner, shutdown })
    }

    /// Attach/detach notifications
    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.inner.events.subscribe()
    }

    /// Visible devices; an empty list is `Ok`
    pub fn list_devices(&self) -> PrintResult<Vec<DeviceDescriptor>> {
        self.inner.session.lock().registry.list()
    }

    pub fn selected_device(&self) -> Option<DeviceDescriptor> {
        self.inner.session.lock().selected.clone()
    }

    pub fn connected_device(&self) -> Option<DeviceDescriptor> {
        self.inner.session.lock().connection.device().cloned()
    }

    /// Select and connect to the printer with this VID/PID
    ///
    /// Resolves immediately when the device is already permitted; otherwise
    /// waits for the OS permission answer.
    #[instrument(skip(self))]
    pub async fn select_device(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> PrintResult<DeviceDescriptor> {
        let id = DeviceId::new(vendor_id, product_id);

        let receiver = {
            let mut session = self.inner.session.lock();
            let host = session.registry.host()?.clone();

            if let Some(device) = session.connection.device().cloned() {
                if device.matches(id) && host.has_permission(&device) {
                    debug!("Device already connected");
                    return Ok(device);
                }
            }

            let devices = session.registry.list()?;
            if devices.is_empty() {
                return Err(PrintError::DeviceNotFound(
                    "Device list is empty, can not choose device".into(),
                ));
            }
            let Some(device) = devices.into_iter().find(|d| d.matches(id)) else {
                return Err(PrintError::DeviceNotFound(
                    "can not find specified device".into(),
                ));
            };

            session.connection.close();
            session.selected = Some(device.clone());

            if host.has_permission(&device) {
                let joined = session.gate.preempt(&device);
                let outcome =
                    session.open_with_retry(&device, self.inner.config.open_retry_attempts);
                if let Some(pending) = joined {
                    pending.resolve(outcome.clone());
                }
                return outcome;
            }

            let request = session.gate.request_access(&device);
            if request.prompt {
                info!(device = %device, "Requesting USB permission");
                host.request_permission(&device);
            }
            request.receiver
        };

        // Sender dropped without answer: adapter went away
        receiver.await.unwrap_or(Err(PrintError::SystemNotReady))
    }

    /// Connection for printing, reconnecting to the selected device if needed
    fn ensure_connection(&self) -> PrintResult<ActiveEndpoint> {
        let mut session = self.inner.session.lock();
        if let Some(active) = session.connection.active() {
            return Ok(active);
        }

        let Some(device) = session.selected.clone() else {
            warn!("No device selected");
            return Err(PrintError::NotConnected);
        };
        if let Err(e) = session.open_with_retry(&device, 0) {
            warn!(device = %device, error = %e, "Reconnect failed");
            return Err(e);
        }
        session.connection.active().ok_or(PrintError::NotConnected)
    }

    async fn transmit(&self, data: Vec<u8>) -> PrintResult<()> {
        let target = self.ensure_connection()?;
        self.inner.worker.send(target, data).outcome().await
    }

    /// Print base64-encoded ESC/POS bytes
    #[instrument(skip_all, fields(len = payload.map_or(0, str::len)))]
    pub async fn print_raw(&self, payload: Option<&str>) -> PrintResult<()> {
        let data = decode_payload(payload)?;
        debug!(bytes = data.len(), "Printing raw data");
        self.transmit(data).await
    }

    /// Fetch, rasterize and print an image
    #[instrument(skip(self))]
    pub async fn print_image(&self, url: &str) -> PrintResult<()> {
        let images = self
            .inner
            .images
            .clone()
            .ok_or_else(|| PrintError::ImageUnavailable("no image source configured".into()))?;
        let encoded = images.fetch(url).await?;
        self.print_image_bytes(&encoded).await
    }

    /// Rasterize and print an encoded image (PNG, JPEG, ...)
    #[instrument(skip_all, fields(len = encoded.len()))]
    pub async fn print_image_bytes(&self, encoded: &[u8]) -> PrintResult<()> {
        let img = decode_image(encoded, self.inner.config.image_max_source_dimension)?;
        let target = self.ensure_connection()?;
        let data = self.inner.encoder.encode(&img);
        self.inner.worker.send(target, data).outcome().await
    }

    /// Close the active connection; the selection is kept
    pub fn close_connection(&self) {
        self.inner.session.lock().connection.close();
    }

    /// Stop the event loop, fail pending requests and release the host
    ///
    /// Safe to call more than once.
    pub fn teardown(&self) {
        self.shutdown.cancel();

        let mut session = self.inner.session.lock();
        session.gate.cancel(PrintError::SystemNotReady);
        session.connection.close();
        session.selected = None;
        session.registry.release();

        info!("USB printer adapter torn down");
    }
}
