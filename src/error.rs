use std::time::Duration;

use crate::config::ConfigError;

/// Failures of the signaling channel itself.
///
/// Everything except `RetryBudgetExhausted` is absorbed by the reconnect loop;
/// consumers only ever see the terminal variant through
/// [`ConnectionManager::last_error`](crate::ws::ConnectionManager::last_error).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("No credential available, refusing to connect")]
    MissingCredential,

    #[error("Channel is not open")]
    NotOpen,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Channel closed abnormally: {0}")]
    AbnormalClose(String),

    #[error("No traffic from server within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("Gave up reconnecting after {0} attempts")]
    RetryBudgetExhausted(u32),
}

/// Inbound frames that could not be turned into a [`RoomEvent`](crate::ws::RoomEvent).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame is not valid JSON: {0}")]
    Malformed(String),

    #[error("Frame has no message type")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {msg_type} payload: {reason}")]
    InvalidPayload { msg_type: String, reason: String },
}

/// Device enumeration and stream acquisition failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("No capture device selected")]
    NothingSelected,

    #[error("Capture was stopped while the stream was being acquired")]
    Cancelled,
}

/// Acquisition failures surfaced by the capture session.
pub type CaptureError = DeviceError;

impl DeviceError {
    /// Whether the UI should offer a retry for this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeviceError::NothingSelected | DeviceError::Cancelled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
}

impl AppError {
    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Channel(ChannelError::RetryBudgetExhausted(_)) => {
                "Lost connection to the server. Please try again.".to_string()
            }
            AppError::Channel(_) => "Connecting to the server...".to_string(),
            AppError::Decode(_) => "Something went wrong.".to_string(),
            AppError::Server(reason) => reason.clone(),
            AppError::Device(DeviceError::PermissionDenied(_)) => {
                "Camera or microphone access was denied.".to_string()
            }
            AppError::Device(e) => e.to_string(),
            AppError::Config(e) => e.to_string(),
            AppError::InvalidCredential(_) => "Please sign in again.".to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decode(DecodeError::Malformed(err.to_string()))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::InvalidCredential(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
