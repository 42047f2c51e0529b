use super::*;
use crate::config::SnapcoachConfig;
use crate::upstream::ScriptedProvider;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

const IMAGE: &str = "data:image/jpeg;base64,AAAA";

fn test_router(provider: Arc<ScriptedProvider>) -> (Router, Arc<RelayStats>) {
    let config = SnapcoachConfig::default();
    let state = RelayState::new(provider, config.upstream);
    let stats = state.stats();
    (build_router(state, config.relay.max_body_bytes), stats)
}

fn analyze_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/analyze")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_streams_fragments_in_order() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["Hello", " world"]));
    let (router, stats) = test_router(Arc::clone(&provider));

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );

    let chunks: Vec<_> = response
        .into_body()
        .into_data_stream()
        .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
        .collect()
        .await;

    assert_eq!(chunks, vec!["Hello".to_string(), " world".to_string()]);
    assert_eq!(chunks.concat(), "Hello world");

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.requests, 1);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.fragments_forwarded, 2);
    assert_eq!(snapshot.bytes_forwarded, 11);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_forwards_fixed_instruction_and_limits() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["ok"]));
    let (router, _) = test_router(Arc::clone(&provider));

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();
    let _ = axum::body::to_bytes(response.into_body(), usize::MAX).await;

    let request = provider.last_request().unwrap();
    let defaults = SnapcoachConfig::default().upstream;
    assert_eq!(request.prompt, defaults.prompt);
    assert!(request.prompt.contains("interview"));
    assert_eq!(request.max_tokens, 500);
    assert_eq!(request.detail, "high");
    assert_eq!(request.image.mime_type, "image/jpeg");
    assert_eq!(request.image.data, vec![0, 0, 0]);
}

#[tokio::test]
async fn test_missing_credential_never_calls_upstream() {
    let provider = Arc::new(
        ScriptedProvider::builder()
            .fragments(["unused"])
            .unconfigured()
            .build(),
    );
    let (router, stats) = test_router(Arc::clone(&provider));

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("API key"));
    assert_eq!(provider.calls(), 0);
    assert_eq!(stats.snapshot().rejected, 1);
}

#[tokio::test]
async fn test_credential_is_checked_before_image() {
    let provider = Arc::new(ScriptedProvider::builder().unconfigured().build());
    let (router, _) = test_router(Arc::clone(&provider));

    let response = router
        .oneshot(analyze_request(serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_missing_image_is_bad_request() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["unused"]));
    let (router, stats) = test_router(Arc::clone(&provider));

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "picture": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "No image provided");
    assert_eq!(provider.calls(), 0);
    assert_eq!(stats.snapshot().rejected, 1);
}

#[tokio::test]
async fn test_malformed_images_are_bad_requests() {
    let cases = [
        serde_json::json!({ "image": "" }),
        serde_json::json!({ "image": "https://example.com/photo.jpg" }),
        serde_json::json!({ "image": "data:text/plain;base64,aGk=" }),
        serde_json::json!({ "image": "data:image/jpeg;base64," }),
        serde_json::json!({ "image": 42 }),
    ];

    for case in cases {
        let provider = Arc::new(ScriptedProvider::with_fragments(["unused"]));
        let (router, _) = test_router(Arc::clone(&provider));

        let response = router.oneshot(analyze_request(case.clone())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "case {}", case);
        let body = json_body(response).await;
        assert!(body["error"].is_string(), "case {}", case);
        assert_eq!(provider.calls(), 0, "case {}", case);
    }
}

#[tokio::test]
async fn test_unparseable_body_is_bad_request() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["unused"]));
    let (router, _) = test_router(Arc::clone(&provider));

    let request = Request::builder()
        .method("POST")
        .uri("/api/analyze")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_upstream_rejection_is_structured_error() {
    let provider = Arc::new(
        ScriptedProvider::builder()
            .reject(401, "Incorrect API key provided")
            .build(),
    );
    let (router, stats) = test_router(Arc::clone(&provider));

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Incorrect API key provided"));
    assert_eq!(provider.calls(), 1);
    assert_eq!(stats.snapshot().upstream_failures, 1);
}

#[tokio::test]
async fn test_failure_before_first_delta_is_structured_error() {
    let provider = Arc::new(
        ScriptedProvider::builder()
            .fragments(["never"])
            .fail_after(0, "model overloaded")
            .build(),
    );
    let (router, _) = test_router(provider);

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("model overloaded"));
}

#[tokio::test]
async fn test_empty_upstream_answer_is_not_a_silent_success() {
    let provider = Arc::new(ScriptedProvider::with_fragments(Vec::<String>::new()));
    let (router, _) = test_router(provider);

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_only_empty_deltas_is_not_a_silent_success() {
    for fragments in [vec![""], vec!["", ""]] {
        let provider = Arc::new(ScriptedProvider::with_fragments(fragments.clone()));
        let (router, stats) = test_router(Arc::clone(&provider));

        let response = router
            .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
            .await
            .unwrap();

        assert_eq!(
            response.status(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "fragments {:?}",
            fragments
        );
        let body = json_body(response).await;
        assert!(body["error"].is_string());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.upstream_failures, 1);
        assert_eq!(snapshot.fragments_forwarded, fragments.len() as u64);
    }
}

#[tokio::test]
async fn test_failure_after_empty_deltas_is_structured_error() {
    let provider = Arc::new(
        ScriptedProvider::builder()
            .fragments(["", "never"])
            .fail_after(1, "content filtered")
            .build(),
    );
    let (router, stats) = test_router(provider);

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("content filtered"));
    assert_eq!(stats.snapshot().stream_errors, 0);
}

#[tokio::test]
async fn test_mid_stream_failure_aborts_body() {
    let provider = Arc::new(
        ScriptedProvider::builder()
            .fragments(["Partial", " dropped"])
            .fail_after(1, "connection reset by provider")
            .build(),
    );
    let (router, stats) = test_router(provider);

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"Partial");
    assert!(body.next().await.unwrap().is_err());

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.stream_errors, 1);
    assert_eq!(snapshot.completed, 0);
}

#[tokio::test]
async fn test_mid_stream_failure_is_distinct_from_completion() {
    let provider = Arc::new(
        ScriptedProvider::builder()
            .fragments(["Partial"])
            .fail_after(1, "boom")
            .build(),
    );
    let (router, _) = test_router(provider);

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert!(axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .is_err());
}

#[tokio::test]
async fn test_empty_fragments_are_harmless() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["", "A", "", "B"]));
    let (router, stats) = test_router(provider);

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"AB");
    assert_eq!(stats.snapshot().fragments_forwarded, 4);
}

#[tokio::test]
async fn test_dropped_client_is_counted_as_abandoned() {
    let provider = Arc::new(
        ScriptedProvider::builder()
            .fragments(["one", "two", "three"])
            .delay(Duration::from_millis(5))
            .build(),
    );
    let (router, stats) = test_router(provider);

    let response = router
        .oneshot(analyze_request(serde_json::json!({ "image": IMAGE })))
        .await
        .unwrap();

    let mut body = response.into_body().into_data_stream();
    assert_eq!(&body.next().await.unwrap().unwrap()[..], b"one");
    drop(body);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.abandoned, 1);
    assert_eq!(snapshot.completed, 0);
}

#[tokio::test]
async fn test_health_reports_configuration_and_stats() {
    let provider = Arc::new(ScriptedProvider::with_fragments(["x"]));
    let (router, _) = test_router(provider);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["provider"], "scripted");
    assert_eq!(body["configured"], true);
    assert_eq!(body["stats"]["requests"], 0);
}

#[tokio::test]
async fn test_relay_server_builder_validation() {
    let config = SnapcoachConfig::default();
    let provider: Arc<dyn crate::upstream::CompletionProvider> =
        Arc::new(ScriptedProvider::with_fragments(["x"]));

    let server = RelayServerBuilder::new()
        .config(config.relay.clone())
        .upstream(config.upstream.clone())
        .provider(Arc::clone(&provider))
        .build()
        .unwrap();
    assert_eq!(server.config.port, 3000);

    assert!(RelayServerBuilder::new()
        .upstream(config.upstream.clone())
        .provider(Arc::clone(&provider))
        .build()
        .is_err());

    assert!(RelayServerBuilder::new()
        .config(config.relay.clone())
        .provider(provider)
        .build()
        .is_err());

    assert!(RelayServerBuilder::new()
        .config(config.relay)
        .upstream(config.upstream)
        .build()
        .is_err());
}

#[test]
fn test_phase_transitions() {
    use RequestPhase::*;

    assert!(Idle.can_transition_to(Validating));
    assert!(Validating.can_transition_to(Rejected));
    assert!(Validating.can_transition_to(Upstreaming));
    assert!(Upstreaming.can_transition_to(Rejected));
    assert!(Upstreaming.can_transition_to(Streaming));
    assert!(Streaming.can_transition_to(Completed));
    assert!(Streaming.can_transition_to(StreamError));

    assert!(!Idle.can_transition_to(Streaming));
    assert!(!Validating.can_transition_to(Streaming));
    assert!(!Streaming.can_transition_to(Rejected));
    assert!(!Completed.can_transition_to(Streaming));
    assert!(!StreamError.can_transition_to(Completed));

    assert!(Completed.is_terminal());
    assert!(StreamError.is_terminal());
    assert!(Rejected.is_terminal());
    assert!(!Streaming.is_terminal());
}

#[test]
fn test_tracker_refuses_illegal_transition() {
    let stats = Arc::new(RelayStats::new());
    let mut tracker = PhaseTracker::new(Uuid::new_v4(), Arc::clone(&stats));

    assert!(!tracker.advance(RequestPhase::Streaming));
    assert_eq!(tracker.phase(), RequestPhase::Idle);

    assert!(tracker.advance(RequestPhase::Validating));
    tracker.complete();
    assert_eq!(tracker.phase(), RequestPhase::Validating);
    assert_eq!(stats.snapshot().completed, 0);
    assert_eq!(stats.snapshot().requests, 1);
}
