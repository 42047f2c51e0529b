use super::media::{
    DeviceFailureCode, MediaDevices, MediaStream, TrackSettings, VideoConstraints,
};
use super::state::ClientState;
use crate::config::CameraConfig;
use crate::error::{CameraError, CaptureError};
use crate::events::{ClientEvent, EventBus};
use crate::frame::CaptureFrame;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the single live feed of a session
pub struct CameraSession {
    devices: Arc<dyn MediaDevices>,
    config: CameraConfig,
    stream: Mutex<Option<Box<dyn MediaStream>>>,
    state: Arc<ClientState>,
    bus: EventBus,
}

impl CameraSession {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        config: CameraConfig,
        state: Arc<ClientState>,
        bus: EventBus,
    ) -> Self {
        Self {
            devices,
            config,
            stream: Mutex::new(None),
            state,
            bus,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// The live feed has enough data for a capture
    pub fn is_ready(&self) -> bool {
        self.stream
            .lock()
            .as_ref()
            .map(|stream| stream.ready_state().can_capture())
            .unwrap_or(false)
    }

    /// Settings of the live feed, if any
    pub fn settings(&self) -> Option<TrackSettings> {
        self.stream.lock().as_ref().map(|stream| stream.settings())
    }

    /// Open the camera, releasing any feed that is already open
    pub async fn start(&self) -> Result<TrackSettings, CameraError> {
        self.stop();

        let constraints = VideoConstraints::from_config(&self.config);
        info!(
            "Opening camera ({:?}, ideal {:?})",
            constraints.facing, constraints.ideal_resolution
        );

        let opened = match self.devices.open(&constraints).await {
            Err(failure) if failure.code == DeviceFailureCode::Overconstrained => {
                warn!(
                    "Preferred resolution unavailable ({}), retrying unconstrained",
                    failure.message
                );
                self.devices.open(&constraints.unconstrained()).await
            }
            other => other,
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(failure) => {
                let error = failure.classify();
                warn!("Camera acquisition failed: {} ({:?})", failure, error);
                self.state.show_error(error.to_string());
                self.bus.notify(ClientEvent::ErrorShown {
                    message: error.to_string(),
                });
                return Err(error);
            }
        };

        let settings = stream.settings();

        // Another start may have raced us while the device was opening
        let previous = self.stream.lock().replace(stream);
        if let Some(previous) = previous {
            previous.stop_tracks();
        }

        self.state.set_camera_active(true);
        self.state.clear_error();
        self.bus.notify(ClientEvent::CameraStarted {
            width: settings.width,
            height: settings.height,
        });

        info!(
            "Camera started at {}x{} on {}",
            settings.width, settings.height, settings.device_id
        );
        Ok(settings)
    }

    /// Stop all tracks; a no-op when nothing is open
    pub fn stop(&self) {
        let stream = self.stream.lock().take();
        let Some(stream) = stream else {
            debug!("Camera stop requested with no active feed");
            return;
        };

        stream.stop_tracks();
        self.state.set_camera_active(false);
        self.bus.notify(ClientEvent::CameraStopped);
        info!("Camera stopped");
    }

    /// Encode the current frame of the live feed
    pub fn capture_frame(&self) -> Result<CaptureFrame, CaptureError> {
        let guard = self.stream.lock();
        let stream = guard.as_ref().ok_or(CaptureError::NoActiveStream)?;

        let ready = stream.ready_state();
        if !ready.can_capture() {
            debug!("Capture refused, feed is at {:?}", ready);
            return Err(CaptureError::StreamNotReady);
        }

        let frame = stream.current_frame().ok_or(CaptureError::StreamNotReady)?;
        drop(guard);

        let image = frame.to_rgb_image()?;
        let capture = CaptureFrame::encode(&image, self.config.jpeg_quality)?;

        debug!(
            "Captured frame {} ({}x{}, {} bytes)",
            frame.sequence,
            capture.width,
            capture.height,
            capture.jpeg.len()
        );
        Ok(capture)
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.get_mut().take() {
            stream.stop_tracks();
        }
    }
}
