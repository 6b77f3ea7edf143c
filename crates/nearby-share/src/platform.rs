// Platform abstraction layer for nearby connections
// The native backend drives a platform SDK through this trait; the SDK reports
// back through a channel of client events

use crate::{EndpointId, Strategy};
use async_trait::async_trait;
use std::borrow::Cow;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure reported by the platform SDK
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Unknown endpoint: {0}")]
    EndpointUnknown(EndpointId),

    #[error("Not connected to endpoint: {0}")]
    NotConnected(EndpointId),

    #[error("No pending connection with endpoint: {0}")]
    NoPendingConnection(EndpointId),

    #[error("Already advertising")]
    AlreadyAdvertising,

    #[error("Already discovering")]
    AlreadyDiscovering,

    #[error("Platform service unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Whether the platform proximity service can be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// Service missing or disabled, with the platform's reason
    Unavailable(String),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Data carried between connected endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    File { name: String, size: u64 },
    Stream,
}

impl Payload {
    pub fn from_text(text: &str) -> Self {
        Payload::Bytes(text.as_bytes().to_vec())
    }

    /// Text content of a byte payload, invalid UTF-8 replaced with U+FFFD;
    /// `None` for file and stream payloads
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Payload::Bytes(bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }
}

/// Callback from the platform SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    EndpointFound {
        endpoint_id: EndpointId,
        endpoint_name: Option<String>,
        service_id: String,
    },
    EndpointLost {
        endpoint_id: EndpointId,
    },
    /// Either side asked to connect; both sides must now accept or reject
    ConnectionInitiated {
        endpoint_id: EndpointId,
        endpoint_name: Option<String>,
    },
    ConnectionResult {
        endpoint_id: EndpointId,
        success: bool,
    },
    Disconnected {
        endpoint_id: EndpointId,
    },
    /// Delivered only for endpoints whose connection this side accepted
    PayloadReceived {
        endpoint_id: EndpointId,
        payload: Payload,
    },
}

/// Trait for platform-specific proximity connection clients
#[async_trait]
pub trait ConnectionsClient: Send + Sync {
    /// Get the platform name
    fn platform_name(&self) -> &str;

    async fn availability(&self) -> Availability;

    /// Start broadcasting presence
    async fn start_advertising(
        &self,
        endpoint_name: &str,
        service_id: &str,
        strategy: Strategy,
    ) -> ClientResult<()>;

    /// Start scanning for advertisers
    async fn start_discovery(&self, service_id: &str, strategy: Strategy) -> ClientResult<()>;

    /// Ask a remote endpoint for a connection
    async fn request_connection(&self, local_name: &str, endpoint_id: &str) -> ClientResult<()>;

    async fn accept_connection(&self, endpoint_id: &str) -> ClientResult<()>;

    async fn reject_connection(&self, endpoint_id: &str) -> ClientResult<()>;

    /// Queue a payload; resolves once handed to the platform, not on delivery
    async fn send_payload(&self, endpoint_id: &str, payload: Payload) -> ClientResult<()>;

    async fn stop_discovery(&self) -> ClientResult<()>;

    async fn stop_advertising(&self) -> ClientResult<()>;

    /// Disconnect every endpoint and drop pending requests
    async fn stop_all_endpoints(&self) -> ClientResult<()>;

    /// Hand over the callback channel; returns `None` once taken
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>>;
}
