use crate::error::UpstreamError;
use crate::frame::DataUrl;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Ordered text deltas from the model; an `Err` ends the stream abnormally
pub type DeltaStream = BoxStream<'static, Result<String, UpstreamError>>;

/// One image plus the fixed instruction, sent as a single upstream call
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image: DataUrl,
    pub prompt: String,
    pub max_tokens: u32,
    pub detail: String,
}

/// A multimodal completion backend that streams its answer
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short name for logs and health output
    fn name(&self) -> &str;

    /// Whether the credential needed to call upstream is present
    fn is_configured(&self) -> bool;

    /// Issue exactly one upstream request. Errors returned here happen
    /// before any delta exists; later failures arrive inside the stream.
    async fn stream_completion(
        &self,
        request: AnalysisRequest,
    ) -> Result<DeltaStream, UpstreamError>;
}
