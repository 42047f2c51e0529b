use super::media::{
    AcquireFailure, DeviceFailureCode, MediaDevices, MediaStream, PermissionState,
    ReadyState, TrackSettings, VideoConstraints,
};
use crate::frame::{PixelFormat, VideoFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// In-process camera producing a moving test pattern.
///
/// Permission, failures and warm-up are scriptable so sessions can be
/// exercised without hardware.
pub struct SyntheticDevices {
    permission: watch::Sender<PermissionState>,
    failure: Mutex<Option<AcquireFailure>>,
    reject_constraints: AtomicBool,
    native_size: (u32, u32),
    warmup_frames: u64,
    open_tracks: Arc<AtomicUsize>,
    opens: AtomicUsize,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        let (permission, _) = watch::channel(PermissionState::Granted);
        Self {
            permission,
            failure: Mutex::new(None),
            reject_constraints: AtomicBool::new(false),
            native_size: (640, 480),
            warmup_frames: 3,
            open_tracks: Arc::new(AtomicUsize::new(0)),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn with_permission(self, permission: PermissionState) -> Self {
        self.permission.send_replace(permission);
        self
    }

    /// Frames the feed produces before it can be captured from
    pub fn with_warmup(mut self, frames: u64) -> Self {
        self.warmup_frames = frames;
        self
    }

    /// Size picked when no resolution is requested
    pub fn with_native_size(mut self, width: u32, height: u32) -> Self {
        self.native_size = (width, height);
        self
    }

    /// Fail every open with the given platform error name
    pub fn fail_with(self, name: &str, message: &str) -> Self {
        *self.failure.lock() = Some(AcquireFailure::from_name(name, message));
        self
    }

    /// Refuse opens that carry a preferred resolution
    pub fn reject_constraints(self) -> Self {
        self.reject_constraints.store(true, Ordering::SeqCst);
        self
    }

    /// Simulate the platform pushing a permission change
    pub fn set_permission(&self, permission: PermissionState) {
        self.permission.send_replace(permission);
    }

    /// Tracks currently open across all streams
    pub fn open_tracks(&self) -> usize {
        self.open_tracks.load(Ordering::SeqCst)
    }

    /// Successful opens so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn query_permission(&self) -> Result<PermissionState, AcquireFailure> {
        Ok(*self.permission.borrow())
    }

    fn watch_permission(&self) -> watch::Receiver<PermissionState> {
        self.permission.subscribe()
    }

    async fn open(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, AcquireFailure> {
        if let Some(failure) = self.failure.lock().clone() {
            return Err(failure);
        }

        if *self.permission.borrow() == PermissionState::Denied {
            return Err(AcquireFailure::new(
                DeviceFailureCode::NotAllowed,
                "Permission denied",
            ));
        }

        if let Some((width, height)) = constraints.ideal_resolution {
            if self.reject_constraints.load(Ordering::SeqCst) {
                return Err(AcquireFailure::new(
                    DeviceFailureCode::Overconstrained,
                    format!("{}x{} is not supported", width, height),
                ));
            }
        }

        let (width, height) = constraints.ideal_resolution.unwrap_or(self.native_size);
        self.open_tracks.fetch_add(1, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        debug!("Synthetic camera opened at {}x{}", width, height);

        Ok(Box::new(SyntheticStream {
            settings: TrackSettings {
                width,
                height,
                facing: Some(constraints.facing),
                device_id: "synthetic0".to_string(),
            },
            opened_at: Instant::now(),
            warmup_frames: self.warmup_frames,
            stopped: AtomicBool::new(false),
            open_tracks: Arc::clone(&self.open_tracks),
        }))
    }
}

struct SyntheticStream {
    settings: TrackSettings,
    opened_at: Instant,
    warmup_frames: u64,
    stopped: AtomicBool,
    open_tracks: Arc<AtomicUsize>,
}

impl SyntheticStream {
    fn frames_produced(&self) -> u64 {
        (self.opened_at.elapsed().as_millis() / FRAME_INTERVAL.as_millis()) as u64
    }

    fn draw(&self, sequence: u64) -> VideoFrame {
        let TrackSettings { width, height, .. } = self.settings;
        let shift = ((sequence * 4) % 256) as u32;
        let mut data = Vec::with_capacity((width * height * 3) as usize);

        for y in 0..height {
            for x in 0..width {
                data.push(((x + shift) % 256) as u8);
                data.push(((y + shift) % 256) as u8);
                data.push((((x + y) / 2) % 256) as u8);
            }
        }

        VideoFrame::new(sequence, data, width, height, PixelFormat::Rgb24)
    }
}

impl MediaStream for SyntheticStream {
    fn settings(&self) -> TrackSettings {
        self.settings.clone()
    }

    fn ready_state(&self) -> ReadyState {
        if self.stopped.load(Ordering::SeqCst) {
            ReadyState::HaveNothing
        } else if self.frames_produced() < self.warmup_frames {
            ReadyState::HaveMetadata
        } else {
            ReadyState::HaveEnoughData
        }
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        if !self.ready_state().can_capture() {
            return None;
        }
        Some(self.draw(self.frames_produced()))
    }

    fn live_tracks(&self) -> usize {
        if self.stopped.load(Ordering::SeqCst) {
            0
        } else {
            1
        }
    }

    fn stop_tracks(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.open_tracks.fetch_sub(1, Ordering::SeqCst);
            debug!("Synthetic camera track stopped");
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

