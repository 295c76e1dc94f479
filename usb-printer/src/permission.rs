//! Permission gate
//!
//! Tracks the single outstanding permission request. A request is answered
//! by the OS asynchronously; callers hold a oneshot receiver until then.
//!
//! ```text
//! Idle ──request_access──▶ AwaitingOsResponse(d) ──granted──▶ Granted(d)
//!                                  │          └─────denied──▶ Denied(d)
//!                                  └── detached / cancel ──▶ Idle
//! ```
//!
//! Every waiter is resolved exactly once: a [`PendingRequest`] is consumed
//! by [`PendingRequest::resolve`], and it can only be taken out of the gate
//! once.

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::device::{DeviceDescriptor, DeviceId};
use crate::error::{PrintError, PrintResult};

/// Resolution delivered to a waiter
pub type AccessOutcome = PrintResult<DeviceDescriptor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    AwaitingOsResponse(DeviceId),
    Granted(DeviceId),
    Denied(DeviceId),
}

/// Result of [`PermissionGate::request_access`]
pub struct AccessRequest {
    pub receiver: oneshot::Receiver<AccessOutcome>,
    /// Whether the caller must issue the OS prompt
    pub prompt: bool,
}

/// Outstanding request: target device plus all joined waiters
pub struct PendingRequest {
    device: DeviceDescriptor,
    waiters: Vec<oneshot::Sender<AccessOutcome>>,
}

impl PendingRequest {
    pub fn target(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Deliver the same outcome to every waiter
    pub fn resolve(self, outcome: AccessOutcome) {
        for waiter in self.waiters {
            // Receiver dropped: caller gave up
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[derive(Default)]
pub struct PermissionGate {
    state: GateState,
    pending: Option<PendingRequest>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn pending_device(&self) -> Option<&DeviceDescriptor> {
        self.pending.as_ref().map(PendingRequest::target)
    }

    fn take_pending_for(&mut self, id: DeviceId) -> Option<PendingRequest> {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.device.matches(id));
        if matches { self.pending.take() } else { None }
    }

    /// Register a waiter for `device`
    ///
    /// Joins an outstanding request for the same device (no new prompt).
    /// A request for another device fails the old waiters with
    /// [`PrintError::Superseded`] and takes over the slot.
    pub fn request_access(&mut self, device: &DeviceDescriptor) -> AccessRequest {
        let (tx, rx) = oneshot::channel();

        if let Some(pending) = self.pending.as_mut() {
            if pending.device.matches(device.id()) {
                pending.waiters.push(tx);
                debug!(device = %device, waiters = pending.waiters.len(), "Joined pending permission request");
                return AccessRequest {
                    receiver: rx,
                    prompt: false,
                };
            }
        }

        if let Some(old) = self.pending.take() {
            warn!(old = %old.device, new = %device, "Superseding pending permission request");
            old.resolve(Err(PrintError::Superseded(device.to_string())));
        }

        self.pending = Some(PendingRequest {
            device: device.clone(),
            waiters: vec![tx],
        });
        self.state = GateState::AwaitingOsResponse(device.id());

        AccessRequest {
            receiver: rx,
            prompt: true,
        }
    }

    /// Selection of `device` that needs no OS prompt
    ///
    /// A pending request for another device is failed with
    /// [`PrintError::Superseded`]. A pending request for the same device is
    /// handed back so its waiters get the caller's open result.
    pub fn preempt(&mut self, device: &DeviceDescriptor) -> Option<PendingRequest> {
        let pending = self.pending.take()?;
        if pending.device.matches(device.id()) {
            debug!(device = %device, "Pending permission request satisfied without prompt");
            self.state = GateState::Granted(device.id());
            return Some(pending);
        }

        warn!(old = %pending.device, new = %device, "Superseding pending permission request");
        self.state = GateState::Idle;
        pending.resolve(Err(PrintError::Superseded(device.to_string())));
        None
    }

    /// OS granted access
    ///
    /// Returns the pending request so the caller can open the connection
    /// before resolving it. Stale answers return `None`.
    pub fn on_granted(&mut self, id: DeviceId) -> Option<PendingRequest> {
        let pending = self.take_pending_for(id);
        match &pending {
            Some(_) => {
                info!(device = %id, "USB permission granted");
                self.state = GateState::Granted(id);
            }
            None => debug!(device = %id, "Ignoring permission grant with no pending request"),
        }
        pending
    }

    /// OS denied access; returns whether a request was resolved
    pub fn on_denied(&mut self, id: DeviceId) -> bool {
        let Some(pending) = self.take_pending_for(id) else {
            debug!(device = %id, "Ignoring permission denial with no pending request");
            return false;
        };
        warn!(device = %id, "USB permission denied");
        self.state = GateState::Denied(id);
        pending.resolve(Err(PrintError::PermissionDenied));
        true
    }

    /// Device disappeared; fails a pending request for it
    pub fn on_detached(&mut self, id: DeviceId) -> bool {
        let Some(pending) = self.take_pending_for(id) else {
            return false;
        };
        warn!(device = %id, "Device detached while awaiting permission");
        self.state = GateState::Idle;
        let reason = pending.device.to_string();
        pending.resolve(Err(PrintError::DeviceGone(reason)));
        true
    }

    /// Fail any pending request with `error` and return to idle
    pub fn cancel(&mut self, error: PrintError) {
        if let Some(pending) = self.pending.take() {
            debug!(device = %pending.device, error = %error, "Cancelling pending permission request");
            pending.resolve(Err(error));
        }
        self.state = GateState::Idle;
    }
}
