use super::camera::CameraSession;
use super::media::{MediaDevices, TrackSettings};
use super::permission::PermissionMonitor;
use super::state::{ClientSnapshot, ClientState};
use super::submit::{AnalysisSummary, RelayClient};
use crate::config::SnapcoachConfig;
use crate::error::{CameraError, Result, SnapcoachError};
use crate::events::{ClientEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// One capture-and-submit session: permission, camera and relay wired
/// around a shared `ClientState`.
pub struct ClientSession {
    state: Arc<ClientState>,
    bus: EventBus,
    camera: CameraSession,
    relay: RelayClient,
    _permission: PermissionMonitor,
}

impl ClientSession {
    pub async fn new(
        config: &SnapcoachConfig,
        devices: Arc<dyn MediaDevices>,
        relay_url: Option<String>,
    ) -> Result<Self> {
        let state = Arc::new(ClientState::new());
        let bus = EventBus::default();

        let permission =
            PermissionMonitor::start(Arc::clone(&devices), Arc::clone(&state), bus.clone()).await;
        let camera = CameraSession::new(
            devices,
            config.camera.clone(),
            Arc::clone(&state),
            bus.clone(),
        );
        let url = relay_url.unwrap_or_else(|| config.client.relay_url.clone());
        let relay = RelayClient::new(url, Arc::clone(&state), bus.clone())?;

        Ok(Self {
            state,
            bus,
            camera,
            relay,
            _permission: permission,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.state.snapshot()
    }

    pub fn camera(&self) -> &CameraSession {
        &self.camera
    }

    pub fn relay(&self) -> &RelayClient {
        &self.relay
    }

    pub async fn start_camera(&self) -> std::result::Result<TrackSettings, CameraError> {
        self.camera.start().await
    }

    pub fn stop_camera(&self) {
        self.camera.stop();
    }

    /// Poll until the feed can be captured from or `timeout` passes
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.camera.is_ready() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Capture the current frame and stream its analysis into the transcript.
    ///
    /// A capture failure is shown and nothing is submitted.
    pub async fn take_photo(&self) -> Result<AnalysisSummary> {
        let frame = match self.camera.capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                info!("Capture failed: {}", e);
                self.state.show_error(e.to_string());
                self.bus.notify(ClientEvent::ErrorShown {
                    message: e.to_string(),
                });
                return Err(SnapcoachError::Capture(e));
            }
        };

        debug!("Submitting {}x{} capture", frame.width, frame.height);
        Ok(self.relay.submit(&frame).await?)
    }
}
