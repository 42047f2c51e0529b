use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::VideoFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

/// Camera permission as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Prompt,
    Granted,
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionState::Prompt => "prompt",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

impl FacingMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" | "front" => Some(FacingMode::User),
            "environment" | "back" | "rear" => Some(FacingMode::Environment),
            _ => None,
        }
    }
}

/// What the session asks of the device; `ideal` is a preference, not a demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    pub facing: FacingMode,
    pub ideal_resolution: Option<(u32, u32)>,
}

impl VideoConstraints {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            facing: FacingMode::parse(&config.facing).unwrap_or(FacingMode::User),
            ideal_resolution: Some(config.ideal_resolution),
        }
    }

    /// Same facing, any resolution the device offers
    pub fn unconstrained(&self) -> Self {
        Self {
            facing: self.facing,
            ideal_resolution: None,
        }
    }
}

/// How much data the feed has buffered, in increasing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// Enough data to draw a valid frame
    pub fn can_capture(self) -> bool {
        self >= ReadyState::HaveCurrentData
    }
}

/// Settings the device actually picked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSettings {
    pub width: u32,
    pub height: u32,
    pub facing: Option<FacingMode>,
    pub device_id: String,
}

/// Reason code attached to an acquisition failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFailureCode {
    NotAllowed,
    NotFound,
    NotReadable,
    Overconstrained,
    Security,
    NotSupported,
    Abort,
    Unknown,
}

impl DeviceFailureCode {
    /// Map a platform error name (DOMException style) to a code
    pub fn from_name(name: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" => DeviceFailureCode::NotAllowed,
            "NotFoundError" | "DevicesNotFoundError" => DeviceFailureCode::NotFound,
            "NotReadableError" | "TrackStartError" => DeviceFailureCode::NotReadable,
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
                DeviceFailureCode::Overconstrained
            }
            "SecurityError" => DeviceFailureCode::Security,
            "NotSupportedError" | "TypeError" => DeviceFailureCode::NotSupported,
            "AbortError" => DeviceFailureCode::Abort,
            _ => DeviceFailureCode::Unknown,
        }
    }
}

/// Failure reported by the media layer when opening a feed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code:?}: {message}")]
pub struct AcquireFailure {
    pub code: DeviceFailureCode,
    pub message: String,
}

impl AcquireFailure {
    pub fn new<S: Into<String>>(code: DeviceFailureCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_name<S: Into<String>>(name: &str, message: S) -> Self {
        Self::new(DeviceFailureCode::from_name(name), message)
    }

    /// User-facing category for this failure
    pub fn classify(&self) -> CameraError {
        match self.code {
            DeviceFailureCode::NotAllowed | DeviceFailureCode::Security => {
                CameraError::PermissionDenied
            }
            DeviceFailureCode::NotFound => CameraError::NoDevice,
            DeviceFailureCode::NotReadable => CameraError::DeviceBusy,
            DeviceFailureCode::NotSupported => CameraError::Unsupported,
            DeviceFailureCode::Overconstrained
            | DeviceFailureCode::Abort
            | DeviceFailureCode::Unknown => CameraError::Other {
                message: self.message.clone(),
            },
        }
    }
}

/// Platform media-capture entry point
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Current permission, without prompting the user
    async fn query_permission(&self) -> Result<PermissionState, AcquireFailure>;

    /// Receiver that observes every permission change pushed by the platform
    fn watch_permission(&self) -> watch::Receiver<PermissionState>;

    /// Open a live video feed
    async fn open(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, AcquireFailure>;
}

/// A live video feed
pub trait MediaStream: Send + Sync {
    fn settings(&self) -> TrackSettings;

    fn ready_state(&self) -> ReadyState;

    /// Most recent decoded frame, if the feed has one
    fn current_frame(&self) -> Option<VideoFrame>;

    /// Tracks that are still producing
    fn live_tracks(&self) -> usize;

    /// Stop every track; calling again is a no-op
    fn stop_tracks(&self);
}
