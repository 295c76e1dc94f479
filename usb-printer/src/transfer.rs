//! Bulk transfer worker
//!
//! Each payload is written by its own Tokio task with one bulk OUT transfer
//! under a fixed timeout. The caller gets a [`TransferTicket`] back at once
//! and awaits it for the single outcome.

use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::connection::ActiveEndpoint;
use crate::error::{PrintError, PrintResult};
use crate::host::TransferStatus;

/// Status reported when the worker vanished without answering
const WORKER_LOST: i32 = -1;

/// Pending outcome of one transfer
pub struct TransferTicket {
    receiver: oneshot::Receiver<PrintResult<()>>,
}

impl TransferTicket {
    fn ready(outcome: PrintResult<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { receiver: rx }
    }

    /// Wait for the transfer to finish
    pub async fn outcome(self) -> PrintResult<()> {
        self.receiver
            .await
            .unwrap_or(Err(PrintError::TransferFailed(WORKER_LOST)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferWorker {
    timeout: Duration,
}

impl TransferWorker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start writing `payload` to `target`
    ///
    /// An empty payload fails with [`PrintError::EmptyPayload`] without any
    /// I/O.
    pub fn send(&self, target: ActiveEndpoint, payload: Vec<u8>) -> TransferTicket {
        if payload.is_empty() {
            return TransferTicket::ready(Err(PrintError::EmptyPayload));
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("No Tokio runtime for transfer worker");
            return TransferTicket::ready(Err(PrintError::SystemNotReady));
        };

        let (tx, rx) = oneshot::channel();
        let timeout = self.timeout;
        let span = info_span!(
            "transfer",
            device = %target.device,
            endpoint = target.endpoint,
            bytes = payload.len()
        );

        runtime.spawn(
            async move {
                let outcome = write(target, payload, timeout).await;
                // Receiver dropped: caller stopped waiting
                let _ = tx.send(outcome);
            }
            .instrument(span),
        );

        TransferTicket { receiver: rx }
    }
}

async fn write(target: ActiveEndpoint, payload: Vec<u8>, timeout: Duration) -> PrintResult<()> {
    let _guard = target.write_lock.lock().await;
    let len = payload.len();

    let result = tokio::time::timeout(timeout, target.handle.bulk_out(target.endpoint, payload)).await;

    match result {
        Err(_) => {
            error!(timeout_ms = timeout.as_millis() as u64, "Bulk transfer timed out");
            Err(PrintError::TransferFailed(TransferStatus::Timeout.code()))
        }
        Ok(Err(status)) => {
            error!(status = ?status, "Bulk transfer failed");
            Err(PrintError::TransferFailed(status.code()))
        }
        Ok(Ok(0)) => {
            error!("Bulk transfer wrote nothing");
            Err(PrintError::TransferFailed(0))
        }
        Ok(Ok(written)) if written < len => {
            warn!(written, expected = len, "Short bulk transfer");
            Ok(())
        }
        Ok(Ok(written)) => {
            debug!(written, "Bulk transfer complete");
            Ok(())
        }
    }
}
