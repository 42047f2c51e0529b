pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod relay;
pub mod upstream;

pub use client::{
    AcquireFailure, CameraSession, ClientSession, ClientSnapshot, ClientState, DeviceFailureCode,
    MediaDevices, MediaStream, PermissionMonitor, PermissionState, ReadyState, RelayClient,
    SyntheticDevices, TranscriptFollower, Utf8StreamDecoder,
};
pub use config::SnapcoachConfig;
pub use error::{Result, SnapcoachError};
pub use events::{ClientEvent, EventBus, EventFilter, EventReceiver};
pub use frame::{CaptureFrame, DataUrl, PixelFormat, VideoFrame};
pub use relay::{RelayServer, RelayServerBuilder, RelayStats};
pub use upstream::{AnalysisRequest, CompletionProvider, OpenAiProvider, ScriptedProvider};

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub use client::GstDevices;
