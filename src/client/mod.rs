pub mod camera;
pub mod decoder;
pub mod follow;
pub mod media;
pub mod permission;
pub mod session;
pub mod state;
pub mod submit;
pub mod synthetic;

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub mod gst;

#[cfg(test)]
mod tests;

pub use camera::CameraSession;
pub use decoder::Utf8StreamDecoder;
pub use follow::TranscriptFollower;
pub use media::{
    AcquireFailure, DeviceFailureCode, FacingMode, MediaDevices, MediaStream, PermissionState,
    ReadyState, TrackSettings, VideoConstraints,
};
pub use permission::PermissionMonitor;
pub use session::ClientSession;
pub use state::{ClientSnapshot, ClientState};
pub use submit::{AnalysisSummary, RelayClient};
pub use synthetic::SyntheticDevices;

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub use gst::GstDevices;
