mod openai;
mod provider;
mod scripted;
mod sse;

pub use openai::OpenAiProvider;
pub use provider::{AnalysisRequest, CompletionProvider, DeltaStream};
pub use scripted::{ScriptedProvider, ScriptedProviderBuilder};
pub use sse::{SseDecoder, SseEvent};
