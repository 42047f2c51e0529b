use super::provider::{AnalysisRequest, CompletionProvider, DeltaStream};
use crate::error::UpstreamError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Deterministic provider that replays a fixed answer.
///
/// Used for offline runs (`serve --scripted`) and in tests.
pub struct ScriptedProvider {
    fragments: Vec<String>,
    fail_after: Option<(usize, String)>,
    reject: Option<(u16, String)>,
    delay: Duration,
    configured: bool,
    calls: AtomicUsize,
    last_request: Mutex<Option<AnalysisRequest>>,
}

impl ScriptedProvider {
    pub fn builder() -> ScriptedProviderBuilder {
        ScriptedProviderBuilder::new()
    }

    /// Provider that streams the given fragments then ends cleanly
    pub fn with_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().fragments(fragments).build()
    }

    /// Number of upstream calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<AnalysisRequest> {
        self.last_request.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn stream_completion(
        &self,
        request: AnalysisRequest,
    ) -> Result<DeltaStream, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request);

        if let Some((status, message)) = &self.reject {
            return Err(UpstreamError::Status {
                status: *status,
                message: message.clone(),
            });
        }

        let fragments = self.fragments.clone();
        let fail_after = self.fail_after.clone();
        let delay = self.delay;

        let stream = async_stream::stream! {
            for (index, fragment) in fragments.into_iter().enumerate() {
                if let Some((after, message)) = &fail_after {
                    if index == *after {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        yield Err(UpstreamError::Provider { message: message.clone() });
                        return;
                    }
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                debug!("Scripted provider emitting fragment {}", index);
                yield Ok(fragment);
            }

            if let Some((_, message)) = fail_after {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Err(UpstreamError::Provider { message });
            }
        };

        Ok(stream.boxed())
    }
}

/// Builder for scripted providers
pub struct ScriptedProviderBuilder {
    fragments: Vec<String>,
    fail_after: Option<(usize, String)>,
    reject: Option<(u16, String)>,
    delay: Duration,
    configured: bool,
}

impl ScriptedProviderBuilder {
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
            fail_after: None,
            reject: None,
            delay: Duration::ZERO,
            configured: true,
        }
    }

    pub fn fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments = fragments.into_iter().map(Into::into).collect();
        self
    }

    /// Raise a provider error once `count` fragments have been emitted
    pub fn fail_after<S: Into<String>>(mut self, count: usize, message: S) -> Self {
        self.fail_after = Some((count, message.into()));
        self
    }

    /// Reject the call before any fragment is produced
    pub fn reject<S: Into<String>>(mut self, status: u16, message: S) -> Self {
        self.reject = Some((status, message.into()));
        self
    }

    /// Pause before each fragment
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Simulate a missing credential
    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn build(self) -> ScriptedProvider {
        ScriptedProvider {
            fragments: self.fragments,
            fail_after: self.fail_after,
            reject: self.reject,
            delay: self.delay,
            configured: self.configured,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }
}

impl Default for ScriptedProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
