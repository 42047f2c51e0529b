use super::media::PermissionState;
use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time copy of what the user would see
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    pub transcript: String,
    pub error: Option<String>,
    pub busy: bool,
    pub permission: PermissionState,
    pub camera_active: bool,
}

impl Default for ClientSnapshot {
    fn default() -> Self {
        Self {
            transcript: String::new(),
            error: None,
            busy: false,
            permission: PermissionState::Prompt,
            camera_active: false,
        }
    }
}

/// Visible state of one capture-and-submit session
#[derive(Debug, Default)]
pub struct ClientState {
    inner: Mutex<ClientSnapshot>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.inner.lock().clone()
    }

    pub fn transcript(&self) -> String {
        self.inner.lock().transcript.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock().busy
    }

    pub fn set_permission(&self, permission: PermissionState) {
        self.inner.lock().permission = permission;
    }

    pub fn set_camera_active(&self, active: bool) {
        self.inner.lock().camera_active = active;
    }

    /// Clear transcript and error, then mark busy
    pub fn begin_submission(&self) {
        let mut inner = self.inner.lock();
        inner.transcript.clear();
        inner.error = None;
        inner.busy = true;
    }

    /// Append a fragment and return the new transcript length
    pub fn append(&self, fragment: &str) -> usize {
        let mut inner = self.inner.lock();
        inner.transcript.push_str(fragment);
        inner.transcript.len()
    }

    /// Show a message; the transcript is left untouched
    pub fn show_error<S: Into<String>>(&self, message: S) {
        self.inner.lock().error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.inner.lock().error = None;
    }

    pub fn set_busy(&self, busy: bool) {
        self.inner.lock().busy = busy;
    }
}
