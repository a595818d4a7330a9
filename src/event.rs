use tokio::sync::broadcast;

use crate::tile::TileId;

/// Payload carried by one of the five named events a `MainLoop` frame
/// publishes (§9 Design Notes): a narrow in-process publish/subscribe,
/// named rather than typed per-listener, the way collaborators such as a
/// GUI inspector or a picking overlay are expected to register against it.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    UpdateStart { frame: u64 },
    BeforeRender { frame: u64 },
    AfterRender { frame: u64 },
    UpdateEnd { frame: u64, displayed: usize },
    PickingEnd { tile: Option<TileId> },
}

impl CoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::UpdateStart { .. } => "update-start",
            CoreEvent::BeforeRender { .. } => "before-render",
            CoreEvent::AfterRender { .. } => "after-render",
            CoreEvent::UpdateEnd { .. } => "update-end",
            CoreEvent::PickingEnd { .. } => "picking-end",
        }
    }
}

/// Broadcast channel backing the core's named events, the same shape as
/// `RequestQueue`'s `QueueEvent` stream: any number of collaborators
/// subscribe, and a publish that finds no subscribers is simply dropped.
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
