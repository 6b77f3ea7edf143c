// Event fan-out for plugin listeners
// Backends emit into the hub; host code subscribes or registers callbacks per event name

use crate::{EndpointId, NearbyEndpoint, NearbyShareError, NearbyStatus, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default number of events buffered per subscriber before it starts lagging
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: NearbyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRef {
    pub endpoint_id: EndpointId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedPayload {
    pub endpoint_id: EndpointId,
    pub payload: String,
}

/// Notification delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NearbyEvent {
    Status(StatusChange),
    Error(ErrorNotice),
    EndpointFound(NearbyEndpoint),
    EndpointLost(EndpointRef),
    ConnectionInitiated(NearbyEndpoint),
    Connected(NearbyEndpoint),
    Disconnected(EndpointRef),
    Payload(ReceivedPayload),
}

impl NearbyEvent {
    pub fn status(status: NearbyStatus) -> Self {
        NearbyEvent::Status(StatusChange { status })
    }

    pub fn error(message: impl Into<String>) -> Self {
        NearbyEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            NearbyEvent::Status(_) => EventKind::Status,
            NearbyEvent::Error(_) => EventKind::Error,
            NearbyEvent::EndpointFound(_) => EventKind::EndpointFound,
            NearbyEvent::EndpointLost(_) => EventKind::EndpointLost,
            NearbyEvent::ConnectionInitiated(_) => EventKind::ConnectionInitiated,
            NearbyEvent::Connected(_) => EventKind::Connected,
            NearbyEvent::Disconnected(_) => EventKind::Disconnected,
            NearbyEvent::Payload(_) => EventKind::Payload,
        }
    }

    /// Event name as listeners register it
    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// JSON body handed to listeners in the host runtime
    pub fn data(&self) -> serde_json::Value {
        let value = match self {
            NearbyEvent::Status(body) => serde_json::to_value(body),
            NearbyEvent::Error(body) => serde_json::to_value(body),
            NearbyEvent::EndpointFound(body)
            | NearbyEvent::ConnectionInitiated(body)
            | NearbyEvent::Connected(body) => serde_json::to_value(body),
            NearbyEvent::EndpointLost(body) | NearbyEvent::Disconnected(body) => {
                serde_json::to_value(body)
            }
            NearbyEvent::Payload(body) => serde_json::to_value(body),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Event names exposed to the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    Error,
    EndpointFound,
    EndpointLost,
    ConnectionInitiated,
    Connected,
    Disconnected,
    Payload,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Status,
        EventKind::Error,
        EventKind::EndpointFound,
        EventKind::EndpointLost,
        EventKind::ConnectionInitiated,
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Payload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "nearbyStatus",
            EventKind::Error => "nearbyError",
            EventKind::EndpointFound => "nearbyEndpointFound",
            EventKind::EndpointLost => "nearbyEndpointLost",
            EventKind::ConnectionInitiated => "nearbyConnectionInitiated",
            EventKind::Connected => "nearbyConnected",
            EventKind::Disconnected => "nearbyDisconnected",
            EventKind::Payload => "nearbyPayload",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = NearbyShareError;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| NearbyShareError::InvalidInput(format!("Unknown event: {}", s)))
    }
}

/// Broadcast hub shared by a backend and its listeners
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<NearbyEvent>,
    listeners: Arc<DashMap<Uuid, AbortHandle>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: Arc::new(DashMap::new()),
        }
    }

    /// Deliver an event to every current subscriber
    pub fn emit(&self, event: NearbyEvent) {
        debug!(event = event.name(), "Emitting nearby event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NearbyEvent> {
        self.sender.subscribe()
    }

    /// Register a callback for one event name
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_listener<F>(&self, event_name: &str, callback: F) -> Result<ListenerHandle>
    where
        F: Fn(NearbyEvent) + Send + Sync + 'static,
    {
        let kind = EventKind::from_str(event_name)?;
        let mut receiver = self.sender.subscribe();
        let id = Uuid::new_v4();
        let listeners = Arc::clone(&self.listeners);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            // Wait until the handle is stored so the exit path can prune it
            let _ = registered_rx.await;
            loop {
                match receiver.recv().await {
                    Ok(event) if event.kind() == kind => callback(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Listener for {} lagged, skipped {} event(s)", kind, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            listeners.remove(&id);
            debug!("Listener for {} terminated", kind);
        });

        self.listeners.insert(id, task.abort_handle());
        let _ = registered_tx.send(());
        debug!("Added listener {} for {}", id, kind);

        Ok(ListenerHandle {
            id,
            kind,
            listeners: Arc::clone(&self.listeners),
        })
    }

    /// Drop every registered callback
    pub fn remove_all_listeners(&self) {
        let count = self.listeners.len();
        self.listeners.retain(|_, handle| {
            handle.abort();
            false
        });
        debug!("Removed {} listener(s)", count);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Handle returned by `add_listener`
#[derive(Debug)]
pub struct ListenerHandle {
    id: Uuid,
    kind: EventKind,
    listeners: Arc<DashMap<Uuid, AbortHandle>>,
}

impl ListenerHandle {
    pub fn event_kind(&self) -> EventKind {
        self.kind
    }

    /// Whether the callback is still registered
    pub fn is_active(&self) -> bool {
        self.listeners.contains_key(&self.id)
    }

    pub fn remove(self) {
        if let Some((_, handle)) = self.listeners.remove(&self.id) {
            handle.abort();
            debug!("Removed listener {} for {}", self.id, self.kind);
        }
    }
}
