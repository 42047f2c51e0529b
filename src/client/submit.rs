use super::decoder::Utf8StreamDecoder;
use super::state::ClientState;
use crate::error::TransportError;
use crate::events::{ClientEvent, EventBus};
use crate::frame::CaptureFrame;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct SubmitBody<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct RelayErrorBody {
    error: String,
}

/// Result of a stream that ran to clean completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub fragments: usize,
    pub bytes: usize,
}

/// Submits frames to the relay and renders the streamed answer into
/// `ClientState`.
pub struct RelayClient {
    http: reqwest::Client,
    url: String,
    state: Arc<ClientState>,
    bus: EventBus,
}

impl RelayClient {
    pub fn new<S: Into<String>>(
        url: S,
        state: Arc<ClientState>,
        bus: EventBus,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Network {
                details: e.to_string(),
            })?;

        Ok(Self {
            http,
            url: url.into(),
            state,
            bus,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> Arc<ClientState> {
        Arc::clone(&self.state)
    }

    /// Submit a captured frame and consume the answer
    pub async fn submit(&self, frame: &CaptureFrame) -> Result<AnalysisSummary, TransportError> {
        self.submit_data_url(&frame.to_data_url()).await
    }

    /// Submit an already-encoded data URL and consume the answer.
    ///
    /// Busy is cleared on every exit path; fragments appended before a
    /// failure stay in the transcript.
    pub async fn submit_data_url(&self, image: &str) -> Result<AnalysisSummary, TransportError> {
        self.state.begin_submission();
        self.bus.notify(ClientEvent::TranscriptCleared);
        self.bus.notify(ClientEvent::BusyChanged { busy: true });

        let started = Instant::now();
        let result = self.exchange(image).await;

        match &result {
            Ok(summary) => {
                info!(
                    "Analysis finished: {} fragments, {} bytes in {:?}",
                    summary.fragments,
                    summary.bytes,
                    started.elapsed()
                );
                self.bus.notify(ClientEvent::AnalysisCompleted {
                    fragments: summary.fragments,
                });
            }
            Err(e) => {
                warn!("Analysis failed: {}", e);
                self.state.show_error(e.to_string());
                self.bus.notify(ClientEvent::ErrorShown {
                    message: e.to_string(),
                });
            }
        }

        self.state.set_busy(false);
        self.bus.notify(ClientEvent::BusyChanged { busy: false });
        result
    }

    async fn exchange(&self, image: &str) -> Result<AnalysisSummary, TransportError> {
        debug!("Posting {} byte image to {}", image.len(), self.url);

        let response = self
            .http
            .post(&self.url)
            .json(&SubmitBody { image })
            .send()
            .await
            .map_err(|e| TransportError::Network {
                details: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<RelayErrorBody>(&text)
                .map(|body| body.error)
                .unwrap_or_else(|_| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        self.consume(response.bytes_stream()).await
    }

    /// Append every decoded fragment of `body` to the transcript, in order
    pub async fn consume<S, B, E>(&self, body: S) -> Result<AnalysisSummary, TransportError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        let mut decoder = Utf8StreamDecoder::new();
        let mut summary = AnalysisSummary {
            fragments: 0,
            bytes: 0,
        };

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransportError::Interrupted {
                details: e.to_string(),
            })?;

            let text = decoder.push(chunk.as_ref())?;
            summary.fragments += 1;
            if text.is_empty() {
                continue;
            }

            summary.bytes += text.len();
            let transcript_len = self.state.append(&text);
            self.bus.notify(ClientEvent::FragmentAppended {
                text,
                transcript_len,
            });
        }

        decoder.finish()?;
        Ok(summary)
    }
}
