use super::*;
use crate::config::{CameraConfig, SnapcoachConfig};
use crate::error::{CameraError, CaptureError, SnapcoachError, TransportError};
use crate::events::{ClientEvent, EventBus, EventFilter};
use crate::relay::RelayServer;
use crate::upstream::ScriptedProvider;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn small_camera() -> CameraConfig {
    let mut camera = SnapcoachConfig::default().camera;
    camera.ideal_resolution = (64, 48);
    camera
}

fn camera_session(devices: Arc<SyntheticDevices>) -> (CameraSession, Arc<ClientState>) {
    let state = Arc::new(ClientState::new());
    let dyn_devices: Arc<dyn MediaDevices> = devices;
    let session = CameraSession::new(
        dyn_devices,
        small_camera(),
        Arc::clone(&state),
        EventBus::default(),
    );
    (session, state)
}

fn relay_client(url: &str) -> (RelayClient, Arc<ClientState>) {
    let state = Arc::new(ClientState::new());
    let client = RelayClient::new(url, Arc::clone(&state), EventBus::default()).unwrap();
    (client, state)
}

async fn spawn_relay(provider: Arc<ScriptedProvider>) -> (String, CancellationToken) {
    let config = SnapcoachConfig::default();
    let server = RelayServer::new(config.relay, config.upstream, provider);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move { server.serve(listener, token).await });

    (format!("http://{}/api/analyze", addr), shutdown)
}

const IMAGE: &str = "data:image/jpeg;base64,AAAA";

#[test]
fn test_decoder_holds_split_characters() {
    let mut decoder = Utf8StreamDecoder::new();
    let bytes = "café ☕".as_bytes();

    // Split inside 'é' and inside the cup
    let a = decoder.push(&bytes[..4]).unwrap();
    assert_eq!(a, "caf");
    assert_eq!(decoder.pending_len(), 1);

    let b = decoder.push(&bytes[4..8]).unwrap();
    assert_eq!(b, "é ");

    let c = decoder.push(&bytes[8..]).unwrap();
    assert_eq!(c, "☕");
    assert!(decoder.finish().is_ok());
}

#[test]
fn test_decoder_rejects_invalid_and_dangling_bytes() {
    let mut decoder = Utf8StreamDecoder::new();
    assert!(matches!(
        decoder.push(&[b'o', b'k', 0xff]),
        Err(TransportError::Decode { .. })
    ));

    let mut decoder = Utf8StreamDecoder::new();
    assert_eq!(decoder.push(&[b'a', 0xe2, 0x98]).unwrap(), "a");
    assert!(matches!(
        decoder.finish(),
        Err(TransportError::Decode { .. })
    ));
}

#[test]
fn test_failure_classification_table() {
    let cases = [
        ("NotAllowedError", CameraError::PermissionDenied),
        ("PermissionDeniedError", CameraError::PermissionDenied),
        ("SecurityError", CameraError::PermissionDenied),
        ("NotFoundError", CameraError::NoDevice),
        ("DevicesNotFoundError", CameraError::NoDevice),
        ("NotReadableError", CameraError::DeviceBusy),
        ("TrackStartError", CameraError::DeviceBusy),
        ("NotSupportedError", CameraError::Unsupported),
    ];

    for (name, expected) in cases {
        assert_eq!(
            AcquireFailure::from_name(name, "details").classify(),
            expected,
            "{}",
            name
        );
    }

    assert_eq!(
        AcquireFailure::from_name("SomethingOdd", "driver exploded").classify(),
        CameraError::Other {
            message: "driver exploded".to_string()
        }
    );

    // Each category has its own message
    let messages: std::collections::HashSet<String> = [
        CameraError::PermissionDenied,
        CameraError::NoDevice,
        CameraError::DeviceBusy,
        CameraError::Unsupported,
    ]
    .iter()
    .map(|e| e.to_string())
    .collect();
    assert_eq!(messages.len(), 4);
}

#[test]
fn test_constraints_and_ready_state() {
    let constraints = VideoConstraints::from_config(&SnapcoachConfig::default().camera);
    assert_eq!(constraints.facing, FacingMode::User);
    assert_eq!(constraints.ideal_resolution, Some((1280, 720)));
    assert_eq!(constraints.unconstrained().ideal_resolution, None);

    assert!(!ReadyState::HaveNothing.can_capture());
    assert!(!ReadyState::HaveMetadata.can_capture());
    assert!(ReadyState::HaveCurrentData.can_capture());
    assert!(ReadyState::HaveEnoughData.can_capture());
}

#[tokio::test]
async fn test_stop_twice_is_noop() {
    let devices = Arc::new(SyntheticDevices::new().with_warmup(0));
    let (camera, state) = camera_session(Arc::clone(&devices));

    camera.stop();

    camera.start().await.unwrap();
    assert!(state.snapshot().camera_active);
    assert_eq!(devices.open_tracks(), 1);

    camera.stop();
    camera.stop();

    assert!(!camera.is_active());
    assert!(!state.snapshot().camera_active);
    assert_eq!(devices.open_tracks(), 0);
}

#[tokio::test]
async fn test_restart_releases_prior_tracks() {
    let devices = Arc::new(SyntheticDevices::new().with_warmup(0));
    let (camera, _) = camera_session(Arc::clone(&devices));

    camera.start().await.unwrap();
    camera.start().await.unwrap();
    camera.start().await.unwrap();

    assert_eq!(devices.opens(), 3);
    assert_eq!(devices.open_tracks(), 1);

    drop(camera);
    assert_eq!(devices.open_tracks(), 0);
}

#[tokio::test]
async fn test_overconstrained_degrades_to_native_size() {
    let devices = Arc::new(
        SyntheticDevices::new()
            .with_warmup(0)
            .with_native_size(32, 24)
            .reject_constraints(),
    );
    let (camera, state) = camera_session(Arc::clone(&devices));

    let settings = camera.start().await.unwrap();

    assert_eq!((settings.width, settings.height), (32, 24));
    assert!(state.snapshot().error.is_none());
}

#[tokio::test]
async fn test_acquisition_failure_is_classified_and_shown() {
    let devices = Arc::new(SyntheticDevices::new().fail_with("NotReadableError", "in use"));
    let (camera, state) = camera_session(Arc::clone(&devices));

    let err = camera.start().await.unwrap_err();

    assert_eq!(err, CameraError::DeviceBusy);
    let snapshot = state.snapshot();
    assert_eq!(snapshot.error, Some(CameraError::DeviceBusy.to_string()));
    assert!(!snapshot.camera_active);
    assert_eq!(devices.open_tracks(), 0);
}

#[tokio::test]
async fn test_denied_permission_blocks_open() {
    let devices = Arc::new(SyntheticDevices::new().with_permission(PermissionState::Denied));
    let (camera, _) = camera_session(devices);

    assert_eq!(
        camera.start().await.unwrap_err(),
        CameraError::PermissionDenied
    );
}

#[tokio::test]
async fn test_capture_requires_ready_feed() {
    let devices = Arc::new(SyntheticDevices::new().with_warmup(1_000_000));
    let (camera, _) = camera_session(devices);

    assert_eq!(
        camera.capture_frame().unwrap_err(),
        CaptureError::NoActiveStream
    );

    camera.start().await.unwrap();
    assert!(!camera.is_ready());
    assert_eq!(
        camera.capture_frame().unwrap_err(),
        CaptureError::StreamNotReady
    );
}

#[tokio::test]
async fn test_capture_encodes_native_size_jpeg() {
    let devices = Arc::new(SyntheticDevices::new().with_warmup(0));
    let (camera, _) = camera_session(devices);

    camera.start().await.unwrap();
    let frame = camera.capture_frame().unwrap();

    assert_eq!((frame.width, frame.height), (64, 48));
    assert_eq!(&frame.jpeg[..2], &[0xff, 0xd8]);
    assert!(frame.to_data_url().starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn test_permission_monitor_follows_changes() {
    let devices = Arc::new(SyntheticDevices::new());
    let state = Arc::new(ClientState::new());
    let bus = EventBus::default();
    let mut permissions =
        bus.subscribe_filtered(EventFilter::EventTypes(vec!["permission_changed"]));

    let dyn_devices: Arc<dyn MediaDevices> = devices.clone();
    let monitor = PermissionMonitor::start(dyn_devices, Arc::clone(&state), bus.clone()).await;
    assert!(monitor.is_running());
    assert_eq!(state.snapshot().permission, PermissionState::Granted);

    devices.set_permission(PermissionState::Denied);

    // First event is the initial query, second the pushed change
    let mut last = None;
    for _ in 0..2 {
        last = Some(
            timeout(Duration::from_secs(1), permissions.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    assert_eq!(
        last,
        Some(ClientEvent::PermissionChanged {
            state: PermissionState::Denied
        })
    );
    assert_eq!(state.snapshot().permission, PermissionState::Denied);
}

#[tokio::test]
async fn test_consume_appends_in_order() {
    let (client, state) = relay_client("http://127.0.0.1:9/api/analyze");
    let chunks = vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"Hello")),
        Ok(Bytes::from_static(b"")),
        Ok(Bytes::from_static(b" world")),
    ];

    let summary = client.consume(futures::stream::iter(chunks)).await.unwrap();

    assert_eq!(state.transcript(), "Hello world");
    assert_eq!(summary.bytes, 11);
}

#[tokio::test]
async fn test_consume_keeps_partial_on_interruption() {
    let (client, state) = relay_client("http://127.0.0.1:9/api/analyze");
    let chunks = vec![
        Ok(Bytes::from_static(b"Partial")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        Ok(Bytes::from_static(b" never")),
    ];

    let err = client
        .consume(futures::stream::iter(chunks))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Interrupted { .. }));
    assert_eq!(state.transcript(), "Partial");
}

#[tokio::test]
async fn test_submit_streams_hello_world() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["Hello", " world"]));
    let (url, shutdown) = spawn_relay(Arc::clone(&provider)).await;
    let (client, state) = relay_client(&url);

    let summary = client.submit_data_url(IMAGE).await.unwrap();

    let snapshot = state.snapshot();
    assert_eq!(snapshot.transcript, "Hello world");
    assert!(!snapshot.busy);
    assert_eq!(snapshot.error, None);
    assert_eq!(summary.bytes, 11);
    assert_eq!(provider.calls(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_submit_keeps_partial_on_provider_error() {
    let provider = Arc::new(
        ScriptedProvider::builder()
            .fragments(["Partial", " lost"])
            .fail_after(1, "provider exploded")
            .delay(Duration::from_millis(20))
            .build(),
    );
    let (url, shutdown) = spawn_relay(provider).await;
    let (client, state) = relay_client(&url);

    let err = client.submit_data_url(IMAGE).await.unwrap_err();

    assert!(matches!(err, TransportError::Interrupted { .. }));
    let snapshot = state.snapshot();
    assert_eq!(snapshot.transcript, "Partial");
    assert!(snapshot.error.is_some());
    assert!(!snapshot.busy);

    shutdown.cancel();
}

#[tokio::test]
async fn test_submit_surfaces_relay_error_message() {
    let provider = Arc::new(ScriptedProvider::builder().unconfigured().build());
    let (url, shutdown) = spawn_relay(Arc::clone(&provider)).await;
    let (client, state) = relay_client(&url);

    state.append("stale answer");
    let err = client.submit_data_url(IMAGE).await.unwrap_err();

    match err {
        TransportError::Status { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Upstream API key is not configured");
        }
        other => panic!("expected status error, got {:?}", other),
    }

    let snapshot = state.snapshot();
    assert_eq!(snapshot.transcript, "");
    assert!(snapshot
        .error
        .unwrap()
        .contains("Upstream API key is not configured"));
    assert!(!snapshot.busy);
    assert_eq!(provider.calls(), 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_submit_network_failure_clears_busy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (client, state) = relay_client(&format!("http://{}/api/analyze", addr));
    let err = client.submit_data_url(IMAGE).await.unwrap_err();

    assert!(matches!(err, TransportError::Network { .. }));
    assert!(!state.is_busy());
    assert!(state.snapshot().error.is_some());
}

#[tokio::test]
async fn test_session_refuses_capture_before_ready() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["unused"]));
    let (url, shutdown) = spawn_relay(Arc::clone(&provider)).await;

    let mut config = SnapcoachConfig::default();
    config.camera = small_camera();
    let devices: Arc<dyn MediaDevices> = Arc::new(SyntheticDevices::new().with_warmup(1_000_000));
    let session = ClientSession::new(&config, devices, Some(url)).await.unwrap();

    session.start_camera().await.unwrap();
    let err = session.take_photo().await.unwrap_err();

    assert!(matches!(
        err,
        SnapcoachError::Capture(CaptureError::StreamNotReady)
    ));
    assert_eq!(session.snapshot().error.as_deref(), Some("Stream not ready"));
    assert_eq!(provider.calls(), 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_session_end_to_end() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["The answer", " is 42."]));
    let (url, shutdown) = spawn_relay(Arc::clone(&provider)).await;

    let mut config = SnapcoachConfig::default();
    config.camera = small_camera();
    let devices: Arc<dyn MediaDevices> = Arc::new(SyntheticDevices::new().with_warmup(0));
    let session = ClientSession::new(&config, devices, Some(url)).await.unwrap();
    let mut fragments = session
        .events()
        .subscribe_filtered(EventFilter::EventTypes(vec!["fragment_appended"]));

    session.start_camera().await.unwrap();
    assert!(session.wait_until_ready(Duration::from_secs(1)).await);
    session.take_photo().await.unwrap();
    session.stop_camera();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.transcript, "The answer is 42.");
    assert!(!snapshot.busy);
    assert!(!snapshot.camera_active);
    assert_eq!(snapshot.permission, PermissionState::Granted);

    let appended: String = fragments
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::FragmentAppended { text, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(appended, "The answer is 42.");

    let request = provider.last_request().unwrap();
    assert_eq!(request.image.mime_type, "image/jpeg");

    shutdown.cancel();
}

async fn follow_to_end(follower: &mut TranscriptFollower) -> Vec<String> {
    let mut chunks = Vec::new();
    while let Some(text) = timeout(Duration::from_secs(1), follower.next_text())
        .await
        .unwrap()
    {
        chunks.push(text);
    }
    chunks
}

#[tokio::test]
async fn test_follower_prints_fragments_until_error() {
    let bus = EventBus::default();
    let state = Arc::new(ClientState::new());
    let mut follower = TranscriptFollower::new(&bus, Arc::clone(&state));

    state.begin_submission();
    bus.notify(ClientEvent::TranscriptCleared);
    for text in ["Partial", " answer"] {
        let transcript_len = state.append(text);
        bus.notify(ClientEvent::FragmentAppended {
            text: text.to_string(),
            transcript_len,
        });
    }
    bus.notify(ClientEvent::ErrorShown {
        message: "Stream interrupted".to_string(),
    });

    let chunks = follow_to_end(&mut follower).await;

    assert_eq!(chunks, vec!["Partial", " answer"]);
    assert!(follower.next_text().await.is_none());
}

#[tokio::test]
async fn test_follower_recovers_fragments_after_lag() {
    let bus = EventBus::new(4);
    let state = Arc::new(ClientState::new());
    let mut follower = TranscriptFollower::new(&bus, Arc::clone(&state));

    state.begin_submission();
    bus.notify(ClientEvent::TranscriptCleared);
    for i in 0..20 {
        let text = format!("word{} ", i);
        let transcript_len = state.append(&text);
        bus.notify(ClientEvent::FragmentAppended {
            text,
            transcript_len,
        });
    }
    bus.notify(ClientEvent::AnalysisCompleted { fragments: 20 });

    let chunks = follow_to_end(&mut follower).await;

    assert_eq!(chunks.concat(), state.transcript());
    assert!(chunks.concat().ends_with("word19 "));
    assert_eq!(follower.printed(), state.transcript().len());
}
