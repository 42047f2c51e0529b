use super::state::ClientState;
use crate::error::EventBusError;
use crate::events::{ClientEvent, EventBus, EventFilter, EventReceiver};
use std::sync::Arc;
use tracing::warn;

/// Follows one streamed answer and hands out the text not yet seen.
///
/// Fragment events are the fast path. When the receiver lags behind the bus
/// the missing text is recovered from the transcript, so no fragment is lost.
pub struct TranscriptFollower {
    events: EventReceiver,
    state: Arc<ClientState>,
    printed: usize,
    finished: bool,
}

impl TranscriptFollower {
    /// Subscribe before submitting so no fragment event is missed
    pub fn new(bus: &EventBus, state: Arc<ClientState>) -> Self {
        let events = bus.subscribe_filtered(EventFilter::EventTypes(vec![
            "transcript_cleared",
            "fragment_appended",
            "analysis_completed",
            "error_shown",
        ]));

        Self {
            events,
            state,
            printed: 0,
            finished: false,
        }
    }

    /// Next unseen text of the answer, or `None` once the answer ended
    pub async fn next_text(&mut self) -> Option<String> {
        while !self.finished {
            match self.events.recv().await {
                Ok(ClientEvent::TranscriptCleared) => self.printed = 0,
                Ok(ClientEvent::FragmentAppended {
                    text,
                    transcript_len,
                }) => {
                    if let Some(fresh) = self.unseen(&text, transcript_len) {
                        return Some(fresh);
                    }
                }
                Ok(_) | Err(EventBusError::ChannelClosed) => {
                    self.finished = true;
                    return self.catch_up();
                }
                Err(EventBusError::Lagged { skipped }) => {
                    warn!("Answer output fell {} events behind; reading transcript", skipped);
                    if let Some(tail) = self.catch_up() {
                        return Some(tail);
                    }
                }
                Err(e) => {
                    warn!("Answer event stream failed: {}", e);
                    self.finished = true;
                    return self.catch_up();
                }
            }
        }
        None
    }

    /// Bytes of the transcript handed out so far
    pub fn printed(&self) -> usize {
        self.printed
    }

    fn unseen(&mut self, text: &str, transcript_len: usize) -> Option<String> {
        if transcript_len <= self.printed {
            return None;
        }

        let start = transcript_len.saturating_sub(text.len());
        let fresh = text.get(self.printed.saturating_sub(start)..)?.to_string();
        self.printed = transcript_len;
        (!fresh.is_empty()).then_some(fresh)
    }

    fn catch_up(&mut self) -> Option<String> {
        let transcript = self.state.transcript();
        let tail = transcript.get(self.printed..).map(str::to_string);
        self.printed = transcript.len();
        tail.filter(|tail| !tail.is_empty())
    }
}
