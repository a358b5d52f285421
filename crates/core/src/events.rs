//! Event System
//!
//! Pub/sub notification bus between the project layer and presentation
//! collaborators. Observers hold subscriptions, never project references.

use std::path::PathBuf;

use crossbeam_channel::{unbounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::project::Status;

/// Notifications emitted by the project lifecycle.
#[derive(Debug, Clone)]
pub enum ProjectEvent {
    /// Project appended to the registry at `index`.
    Added { id: Uuid, index: usize },
    /// Project removed from the registry.
    Removed { id: Uuid },
    /// Status or dirty flag changed; `error` carries stage failure detail.
    Changed {
        id: Uuid,
        status: Status,
        error: Option<String>,
    },
    /// Decode finished; the contents tree is editable.
    Unpacked { id: Uuid, path: PathBuf },
    /// Pack pipeline finished; `path` is the packaged artifact.
    Packed { id: Uuid, path: PathBuf },
    /// Device install finished.
    Installed { id: Uuid, path: PathBuf },
}

impl ProjectEvent {
    /// Identity of the project the event concerns.
    pub fn project_id(&self) -> Uuid {
        match self {
            ProjectEvent::Added { id, .. }
            | ProjectEvent::Removed { id }
            | ProjectEvent::Changed { id, .. }
            | ProjectEvent::Unpacked { id, .. }
            | ProjectEvent::Packed { id, .. }
            | ProjectEvent::Installed { id, .. } => *id,
        }
    }
}

/// Subscriber handle for receiving events.
pub struct EventSubscription {
    receiver: Receiver<ProjectEvent>,
}

impl EventSubscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ProjectEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ProjectEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with a deadline.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ProjectEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Iterate over events until all emitters are gone.
    pub fn iter(&self) -> impl Iterator<Item = ProjectEvent> + '_ {
        self.receiver.iter()
    }
}

/// Event bus for the publish/subscribe pattern.
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<ProjectEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to all project events.
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Emit an event to every live subscriber, pruning disconnected ones.
    pub fn emit(&self, event: ProjectEvent) -> usize {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_every_subscriber() {
        let bus = EventBus::new();
        let sub1 = bus.subscribe();
        let sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let id = Uuid::new_v4();
        let delivered = bus.emit(ProjectEvent::Removed { id });
        assert_eq!(delivered, 2);

        assert_eq!(sub1.try_recv().unwrap().project_id(), id);
        assert_eq!(sub2.try_recv().unwrap().project_id(), id);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        drop(bus.subscribe());

        let delivered = bus.emit(ProjectEvent::Removed { id: Uuid::new_v4() });
        assert_eq!(delivered, 1);
        assert!(sub.try_recv().is_ok());
    }
}
