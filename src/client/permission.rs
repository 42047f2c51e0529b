use super::media::{MediaDevices, PermissionState};
use super::state::ClientState;
use crate::events::{ClientEvent, EventBus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Keeps `ClientState::permission` in sync with the platform for the
/// lifetime of the session.
pub struct PermissionMonitor {
    task: JoinHandle<()>,
}

impl PermissionMonitor {
    /// Query the current permission without prompting, then follow changes
    pub async fn start(
        devices: Arc<dyn MediaDevices>,
        state: Arc<ClientState>,
        bus: EventBus,
    ) -> Self {
        // Subscribe before querying so a change in between is not lost
        let mut changes = devices.watch_permission();

        match devices.query_permission().await {
            Ok(permission) => apply(&state, &bus, permission),
            Err(e) => warn!("Camera permission query unavailable: {}", e),
        }

        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let permission = *changes.borrow_and_update();
                apply(&state, &bus, permission);
            }
            debug!("Permission source closed");
        });

        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PermissionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn apply(state: &ClientState, bus: &EventBus, permission: PermissionState) {
    state.set_permission(permission);
    bus.notify(ClientEvent::PermissionChanged { state: permission });
}
