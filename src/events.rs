use crate::client::PermissionState;
use crate::error::EventBusError;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events that can occur in a capture-and-submit session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ClientEvent {
    /// Camera permission changed (or was first queried)
    PermissionChanged { state: PermissionState },
    /// A live feed was opened at the given native size
    CameraStarted { width: u32, height: u32 },
    /// All tracks of the live feed were stopped
    CameraStopped,
    /// Transcript and error were cleared for a new submission
    TranscriptCleared,
    /// Busy indicator changed
    BusyChanged { busy: bool },
    /// A decoded fragment was appended to the transcript
    FragmentAppended { text: String, transcript_len: usize },
    /// The relay closed the stream cleanly
    AnalysisCompleted { fragments: usize },
    /// A user-facing error message is now shown
    ErrorShown { message: String },
}

impl ClientEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ClientEvent::PermissionChanged { state } => {
                format!("Camera permission is {}", state)
            }
            ClientEvent::CameraStarted { width, height } => {
                format!("Camera started at {}x{}", width, height)
            }
            ClientEvent::CameraStopped => "Camera stopped".to_string(),
            ClientEvent::TranscriptCleared => "Transcript cleared".to_string(),
            ClientEvent::BusyChanged { busy } => {
                format!("Busy: {}", busy)
            }
            ClientEvent::FragmentAppended {
                text,
                transcript_len,
            } => {
                format!(
                    "Appended {} bytes (transcript now {} bytes)",
                    text.len(),
                    transcript_len
                )
            }
            ClientEvent::AnalysisCompleted { fragments } => {
                format!("Analysis completed after {} fragments", fragments)
            }
            ClientEvent::ErrorShown { message } => format!("Error: {}", message),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::PermissionChanged { .. } => "permission_changed",
            ClientEvent::CameraStarted { .. } => "camera_started",
            ClientEvent::CameraStopped => "camera_stopped",
            ClientEvent::TranscriptCleared => "transcript_cleared",
            ClientEvent::BusyChanged { .. } => "busy_changed",
            ClientEvent::FragmentAppended { .. } => "fragment_appended",
            ClientEvent::AnalysisCompleted { .. } => "analysis_completed",
            ClientEvent::ErrorShown { .. } => "error_shown",
        }
    }
}

/// Broadcast bus the client publishes its state changes on
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ClientEvent) -> Result<usize, EventBusError> {
        match &event {
            ClientEvent::PermissionChanged { state } => {
                info!("Camera permission: {}", state);
            }
            ClientEvent::ErrorShown { message } => {
                warn!("Showing error: {}", message);
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish without caring whether anyone is listening
    pub fn notify(&self, event: ClientEvent) {
        if self.publish(event).is_err() {
            debug!("No subscribers for client event");
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &ClientEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<ClientEvent>,
    filter: EventFilter,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<ClientEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next event that passes the filter
    pub async fn recv(&mut self) -> Result<ClientEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event receiver lagged behind by {} events", skipped);
                    return Err(EventBusError::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain whatever is queued without waiting
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            if self.filter.matches(&event) {
                events.push(event);
            }
        }
        events
    }
}
