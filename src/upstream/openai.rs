use super::provider::{AnalysisRequest, CompletionProvider, DeltaStream};
use super::sse::{SseDecoder, SseEvent};
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// --- Chat-completions request structs ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
    detail: String,
}

// --- Error body returned with non-2xx statuses ---

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// OpenAI-compatible chat-completions provider with streamed output
pub struct OpenAiProvider {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        // Bounds the gap between body chunks, not the whole streamed answer
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;

        Ok(Self {
            api_key: config.credential().map(str::to_string),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            client,
        })
    }

    fn build_body(&self, request: AnalysisRequest) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: request.prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: request.image.to_string(),
                            detail: request.detail,
                        },
                    },
                ],
            }],
            max_tokens: request.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn stream_completion(
        &self,
        request: AnalysisRequest,
    ) -> Result<DeltaStream, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| UpstreamError::Request {
            details: "no upstream credential configured".to_string(),
        })?;

        debug!(
            "Requesting streamed completion from {} ({} image bytes, max_tokens {})",
            self.model,
            request.image.data.len(),
            request.max_tokens
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.build_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or_else(|_| {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_string()
                });
            error!("Upstream returned HTTP {}: {}", status, message);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message,
            });
        }

        info!("Upstream accepted request, event stream established");

        let mut body = Box::pin(response.bytes_stream());
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Upstream body failed mid-stream: {}", e);
                        yield Err(UpstreamError::from(e));
                        return;
                    }
                };

                match decoder.push(&chunk) {
                    Ok(events) => {
                        for event in events {
                            if let SseEvent::Delta(text) = event {
                                yield Ok(text);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Upstream stream reported an error: {}", e);
                        yield Err(e);
                        return;
                    }
                }

                if decoder.is_finished() {
                    debug!("Upstream end-of-stream marker received");
                    return;
                }
            }

            match decoder.finish() {
                Ok(events) => {
                    for event in events {
                        if let SseEvent::Delta(text) = event {
                            yield Ok(text);
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            if !decoder.is_finished() {
                yield Err(UpstreamError::Protocol {
                    details: "stream closed before the end-of-stream marker".to_string(),
                });
            }
        };

        Ok(stream.boxed())
    }
}
