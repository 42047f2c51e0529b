use super::media::{
    AcquireFailure, DeviceFailureCode, MediaDevices, MediaStream, PermissionState, ReadyState,
    TrackSettings, VideoConstraints,
};
use crate::frame::{PixelFormat, VideoFrame};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// V4L2 camera through GStreamer (v4l2src -> videoconvert -> RGB appsink)
pub struct GstDevices {
    device: String,
    permission: watch::Sender<PermissionState>,
}

impl GstDevices {
    pub fn new<S: Into<String>>(device: S) -> Result<Self, AcquireFailure> {
        gstreamer::init().map_err(|e| {
            AcquireFailure::new(
                DeviceFailureCode::NotSupported,
                format!("Failed to initialize GStreamer: {}", e),
            )
        })?;

        let device = device.into();
        let (permission, _) = watch::channel(probe_permission(&device));
        Ok(Self { device, permission })
    }

    fn build_pipeline_string(&self, constraints: &VideoConstraints) -> String {
        let caps = match constraints.ideal_resolution {
            Some((width, height)) => format!(
                "video/x-raw,format=RGB,width={},height={}",
                width, height
            ),
            None => "video/x-raw,format=RGB".to_string(),
        };

        format!(
            "v4l2src device={} do-timestamp=true ! videoconvert ! videoscale ! {} ! \
             appsink name=sink sync=false max-buffers=1 drop=true",
            self.device, caps
        )
    }
}

/// Device nodes have no prompt; access is whatever the file mode allows
fn probe_permission(device: &str) -> PermissionState {
    match std::fs::OpenOptions::new().read(true).open(device) {
        Ok(_) => PermissionState::Granted,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => PermissionState::Denied,
        Err(_) => PermissionState::Prompt,
    }
}

#[async_trait]
impl MediaDevices for GstDevices {
    async fn query_permission(&self) -> Result<PermissionState, AcquireFailure> {
        let permission = probe_permission(&self.device);
        self.permission.send_if_modified(|current| {
            let changed = *current != permission;
            *current = permission;
            changed
        });
        Ok(permission)
    }

    fn watch_permission(&self) -> watch::Receiver<PermissionState> {
        self.permission.subscribe()
    }

    async fn open(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, AcquireFailure> {
        if let Err(e) = std::fs::metadata(&self.device) {
            return Err(match e.kind() {
                ErrorKind::NotFound => AcquireFailure::new(
                    DeviceFailureCode::NotFound,
                    format!("{} does not exist", self.device),
                ),
                ErrorKind::PermissionDenied => {
                    AcquireFailure::new(DeviceFailureCode::NotAllowed, e.to_string())
                }
                _ => AcquireFailure::new(DeviceFailureCode::Unknown, e.to_string()),
            });
        }
        if probe_permission(&self.device) == PermissionState::Denied {
            return Err(AcquireFailure::new(
                DeviceFailureCode::NotAllowed,
                format!("No read access to {}", self.device),
            ));
        }

        let pipeline_desc = self.build_pipeline_string(constraints);
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| {
                AcquireFailure::new(
                    DeviceFailureCode::NotSupported,
                    format!("Failed to create pipeline: {}", e),
                )
            })?
            .downcast::<Pipeline>()
            .map_err(|_| {
                AcquireFailure::new(DeviceFailureCode::Unknown, "Failed to downcast to Pipeline")
            })?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|sink| sink.downcast::<AppSink>().ok())
            .ok_or_else(|| AcquireFailure::new(DeviceFailureCode::Unknown, "Missing appsink"))?;

        let latest: Arc<Mutex<Option<VideoFrame>>> = Arc::new(Mutex::new(None));
        let frame_counter = Arc::new(AtomicU64::new(0));
        let sink_latest = Arc::clone(&latest);
        let sink_counter = Arc::clone(&frame_counter);

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    let sequence = sink_counter.fetch_add(1, Ordering::Relaxed);
                    match sample_to_frame(&sample, sequence) {
                        Ok(frame) => *sink_latest.lock() = Some(frame),
                        Err(e) => error!("Error processing GStreamer sample: {}", e),
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            let code = if constraints.ideal_resolution.is_some() {
                DeviceFailureCode::Overconstrained
            } else {
                DeviceFailureCode::NotReadable
            };
            warn!("Failed to start GStreamer pipeline: {}", e);
            return Err(AcquireFailure::new(code, e.to_string()));
        }

        let (width, height) = constraints.ideal_resolution.unwrap_or((0, 0));
        Ok(Box::new(GstStream {
            pipeline,
            device: self.device.clone(),
            requested: (width, height),
            facing: constraints.facing,
            latest,
            stopped: AtomicBool::new(false),
        }))
    }
}

/// Copy an RGB sample into a tightly packed frame, dropping row padding
fn sample_to_frame(sample: &gstreamer::Sample, sequence: u64) -> Result<VideoFrame, String> {
    let buffer = sample.buffer().ok_or("No buffer in sample")?;
    let caps = sample.caps().ok_or("No caps in sample")?;
    let info = VideoInfo::from_caps(caps).map_err(|e| format!("Bad caps: {}", e))?;
    let map = buffer
        .map_readable()
        .map_err(|e| format!("Failed to map buffer: {}", e))?;

    let width = info.width();
    let height = info.height();
    let stride = info.stride()[0] as usize;
    let row_len = width as usize * 3;
    let source = map.as_slice();

    let mut data = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_len;
        let pixels = source
            .get(start..end)
            .ok_or_else(|| format!("Sample truncated at row {}", row))?;
        data.extend_from_slice(pixels);
    }

    Ok(VideoFrame::new(sequence, data, width, height, PixelFormat::Rgb24))
}

struct GstStream {
    pipeline: Pipeline,
    device: String,
    requested: (u32, u32),
    facing: super::media::FacingMode,
    latest: Arc<Mutex<Option<VideoFrame>>>,
    stopped: AtomicBool,
}

impl MediaStream for GstStream {
    fn settings(&self) -> TrackSettings {
        let (width, height) = match self.latest.lock().as_ref() {
            Some(frame) => (frame.width, frame.height),
            None => self.requested,
        };
        TrackSettings {
            width,
            height,
            facing: Some(self.facing),
            device_id: self.device.clone(),
        }
    }

    fn ready_state(&self) -> ReadyState {
        if self.stopped.load(Ordering::SeqCst) {
            ReadyState::HaveNothing
        } else if self.latest.lock().is_some() {
            ReadyState::HaveCurrentData
        } else {
            ReadyState::HaveMetadata
        }
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        self.latest.lock().clone()
    }

    fn live_tracks(&self) -> usize {
        if self.stopped.load(Ordering::SeqCst) {
            0
        } else {
            1
        }
    }

    fn stop_tracks(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop GStreamer pipeline: {}", e);
        }
        self.latest.lock().take();
        debug!("GStreamer pipeline for {} stopped", self.device);
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}
