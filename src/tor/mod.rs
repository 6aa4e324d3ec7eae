//! Tor daemon interaction
//!
//! The onion engine talks to Tor only through [`ControlConnection`]:
//! one command/response pair at a time, plus subscriptions to named
//! asynchronous event classes. [`TorController`] is the TCP implementation.

pub mod conf;
pub mod control;
pub mod events;
pub mod version;

pub use conf::{ControlConfStore, HiddenServiceEntry, HiddenServiceStore};
pub use control::{EventListeners, TorController};
pub use events::{HsDescAction, HsDescEvent, HS_DESC_EVENT};
pub use version::{Capabilities, TorVersion};

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Identifies one listener within an event class
pub type ListenerId = u64;

/// A live subscription to one event class.
///
/// Events delivered before the holder starts reading are buffered.
#[derive(Debug)]
pub struct EventSubscription {
    id: ListenerId,
    event: String,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl EventSubscription {
    pub fn new(id: ListenerId, event: &str, receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            id,
            event: event.to_string(),
            receiver,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Next event body, or `None` once the connection has gone away
    pub async fn next_event(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Contract required from a Tor control connection
#[async_trait]
pub trait ControlConnection: Send + Sync {
    /// Send one command and return its reply text with status codes
    /// stripped. Error statuses and transport failures are errors.
    async fn send_command(&self, command: &str) -> Result<String>;

    /// Start receiving events of the given class
    async fn subscribe(&self, event: &str) -> Result<EventSubscription>;

    /// Stop receiving events for a subscription
    async fn unsubscribe(&self, subscription: EventSubscription) -> Result<()>;

    /// Version string reported by Tor, e.g. `0.4.8.9`
    fn version(&self) -> &str;
}
