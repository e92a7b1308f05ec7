//! Change notifications.
//!
//! A single event bus; hosts subscribe and relay events to whatever local or
//! cross-process channels they need.

use tokio::sync::broadcast;
use tracing::debug;

use kanisync_common::{ResourceType, Timestamp};

/// "Resource of this type changed" event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub resource_type: ResourceType,
    /// Request-start time of the attempt that applied the change.
    pub synced_at: Timestamp,
}

/// Largest per-subscriber buffer a notifier allocates.
pub const MAX_CAPACITY: usize = 4096;

/// Fire-and-forget fan-out of [`ChangeEvent`]s.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<ChangeEvent>,
    base_name: String,
}

impl ChangeNotifier {
    /// Create a notifier buffering up to `capacity` events per subscriber,
    /// clamped to `1..=MAX_CAPACITY`.
    pub fn new(capacity: usize, base_name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(capacity.clamp(1, MAX_CAPACITY));
        Self {
            sender,
            base_name: base_name.into(),
        }
    }

    /// Emit a change event. Never waits on subscribers.
    pub fn notify(&self, resource_type: ResourceType, synced_at: Timestamp) {
        debug!("Sending notifications for resource {}", resource_type);
        // No receivers is fine
        let _ = self.sender.send(ChangeEvent {
            resource_type,
            synced_at,
        });
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Fully qualified event name for a resource type, e.g.
    /// `com.kanisync.notifications.waniKaniSubjectsDidChange`.
    pub fn event_name(&self, resource_type: ResourceType) -> String {
        format!("{}.{}", self.base_name, resource_type.change_event_name())
    }
}
