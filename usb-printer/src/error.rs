//! Error types for the USB printer library
//!
//! Every failure carries a short human-readable reason (its `Display`) that
//! the host bridge hands to the caller verbatim, plus a stable numeric
//! [`ErrorCode`] for callers that branch on the kind of failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Printer error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrintError {
    /// The USB host handle is absent (not initialized, or torn down)
    #[error("USB subsystem is not initialized")]
    SystemNotReady,

    /// No enumerated device matches the request
    #[error("{0}")]
    DeviceNotFound(String),

    /// The OS (or user) refused access to the device
    #[error("USB permission denied")]
    PermissionDenied,

    /// The device was detached while a request was pending
    #[error("USB device detached: {0}")]
    DeviceGone(String),

    /// A newer permission request for another device replaced this one
    #[error("Permission request superseded by device {0}")]
    Superseded(String),

    /// The OS answer was dropped before it reached the gate
    #[error("USB permission answer lost, select the device again")]
    PermissionLost,

    /// The device exposes no bulk OUT endpoint
    #[error("No suitable bulk OUT endpoint found on device {0}")]
    NoSuitableEndpoint(String),

    /// The device handle could not be opened
    #[error("Failed to open USB device: {0}")]
    OpenFailed(String),

    /// The interface could not be claimed
    #[error("Failed to claim USB interface: {0}")]
    ClaimFailed(String),

    /// No device is selected or the connection could not be established
    #[error("failed to connect to device")]
    NotConnected,

    /// Payload is absent or decodes to zero bytes
    #[error("Raw data is null or empty")]
    EmptyPayload,

    /// Payload is not valid base64
    #[error("Failed to decode base64 data: {0}")]
    DecodeFailed(String),

    /// Image could not be fetched or decoded
    #[error("image not found: {0}")]
    ImageUnavailable(String),

    /// Bulk transfer returned a non-positive status or timed out
    #[error("USB transfer failed with status: {0}")]
    TransferFailed(i32),

    /// Capability that is intentionally not provided
    #[error("{0} not implemented")]
    NotImplemented(&'static str),
}

impl PrintError {
    /// Stable numeric code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SystemNotReady => ErrorCode::SystemNotReady,
            Self::DeviceNotFound(_) => ErrorCode::DeviceNotFound,
            Self::PermissionDenied => ErrorCode::PermissionDenied,
            Self::DeviceGone(_) => ErrorCode::DeviceGone,
            Self::Superseded(_) => ErrorCode::Superseded,
            Self::PermissionLost => ErrorCode::PermissionLost,
            Self::NoSuitableEndpoint(_) => ErrorCode::NoSuitableEndpoint,
            Self::OpenFailed(_) => ErrorCode::OpenFailed,
            Self::ClaimFailed(_) => ErrorCode::ClaimFailed,
            Self::NotConnected => ErrorCode::NotConnected,
            Self::EmptyPayload => ErrorCode::EmptyPayload,
            Self::DecodeFailed(_) => ErrorCode::DecodeFailed,
            Self::ImageUnavailable(_) => ErrorCode::ImageUnavailable,
            Self::TransferFailed(_) => ErrorCode::TransferFailed,
            Self::NotImplemented(_) => ErrorCode::NotImplemented,
        }
    }

    /// Whether retrying the same call later may succeed
    ///
    /// `NotImplemented` is a permanent capability gap.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotImplemented(_))
    }
}

/// Result type for printer operations
pub type PrintResult<T> = Result<T, PrintError>;

/// Numeric error codes
///
/// - 1xxx: USB subsystem and device discovery
/// - 2xxx: permission
/// - 3xxx: connection
/// - 4xxx: payload
/// - 5xxx: transfer
/// - 9xxx: capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    SystemNotReady = 1001,
    DeviceNotFound = 1002,
    DeviceGone = 1003,

    PermissionDenied = 2001,
    Superseded = 2002,
    PermissionLost = 2003,

    NoSuitableEndpoint = 3001,
    OpenFailed = 3002,
    ClaimFailed = 3003,
    NotConnected = 3004,

    EmptyPayload = 4001,
    DecodeFailed = 4002,
    ImageUnavailable = 4003,

    TransferFailed = 5001,

    NotImplemented = 9001,
}

impl ErrorCode {
    /// Numeric value of this code
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Default message for this code
    pub fn message(&self) -> &'static str {
        match self {
            Self::SystemNotReady => "USB subsystem is not initialized",
            Self::DeviceNotFound => "Device not found",
            Self::DeviceGone => "USB device detached",
            Self::PermissionDenied => "USB permission denied",
            Self::Superseded => "Permission request superseded",
            Self::PermissionLost => "USB permission answer lost",
            Self::NoSuitableEndpoint => "No suitable endpoint found",
            Self::OpenFailed => "Failed to open USB device",
            Self::ClaimFailed => "Failed to claim USB interface",
            Self::NotConnected => "failed to connect to device",
            Self::EmptyPayload => "Raw data is null or empty",
            Self::DecodeFailed => "Failed to decode base64 data",
            Self::ImageUnavailable => "image not found",
            Self::TransferFailed => "USB transfer failed",
            Self::NotImplemented => "Not implemented",
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let code = match value {
            1001 => Self::SystemNotReady,
            1002 => Self::DeviceNotFound,
            1003 => Self::DeviceGone,
            2001 => Self::PermissionDenied,
            2002 => Self::Superseded,
            2003 => Self::PermissionLost,
            3001 => Self::NoSuitableEndpoint,
            3002 => Self::OpenFailed,
            3003 => Self::ClaimFailed,
            3004 => Self::NotConnected,
            4001 => Self::EmptyPayload,
            4002 => Self::DecodeFailed,
            4003 => Self::ImageUnavailable,
            5001 => Self::TransferFailed,
            9001 => Self::NotImplemented,
            other => return Err(format!("Unknown error code: {}", other)),
        };
        Ok(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
