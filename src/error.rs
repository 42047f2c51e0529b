use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapcoachError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },
}

impl SnapcoachError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Pre-stream rejections reported by the relay as `{ "error": ... }`
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{details}")]
    Misconfigured { details: String },

    #[error("{details}")]
    InvalidRequest { details: String },

    #[error("{0}")]
    Upstream(#[from] UpstreamError),

    #[error("Failed to bind relay to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("Relay startup failed: {details}")]
    StartupFailed { details: String },
}

impl RelayError {
    /// Machine-readable category used in logs and stats
    pub fn category(&self) -> &'static str {
        match self {
            RelayError::Misconfigured { .. } => "configuration",
            RelayError::InvalidRequest { .. } => "invalid_request",
            RelayError::Upstream(_) => "upstream",
            RelayError::BindFailed { .. } | RelayError::StartupFailed { .. } => "startup",
        }
    }
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream request failed: {details}")]
    Request { details: String },

    #[error("Upstream rejected the request (HTTP {status}): {message}")]
    Status { status: u16, message: String },

    #[error("Malformed upstream stream: {details}")]
    Protocol { details: String },

    #[error("Upstream provider error: {message}")]
    Provider { message: String },

    #[error("Upstream finished without producing any output")]
    Empty,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        let details = if e.is_timeout() {
            "request timed out".to_string()
        } else {
            e.to_string()
        };
        UpstreamError::Request { details }
    }
}

/// Camera acquisition failures, one variant per user-facing category
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera access was denied. Allow camera access and try again.")]
    PermissionDenied,

    #[error("No camera was found on this device.")]
    NoDevice,

    #[error("The camera is already in use by another application.")]
    DeviceBusy,

    #[error("Camera capture is not supported on this platform.")]
    Unsupported,

    #[error("Could not start the camera: {message}")]
    Other { message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("No active camera stream")]
    NoActiveStream,

    #[error("Stream not ready")]
    StreamNotReady,

    #[error("Failed to encode frame: {details}")]
    Encode { details: String },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {details}")]
    Network { details: String },

    #[error("Relay returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response text: {details}")]
    Decode { details: String },

    #[error("Analysis stream was interrupted: {details}")]
    Interrupted { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SnapcoachError>;
