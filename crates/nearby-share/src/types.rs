use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier the platform assigns to a remote device
pub type EndpointId = String;

/// A remote device seen during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyEndpoint {
    pub endpoint_id: EndpointId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_name: Option<String>,
}

impl NearbyEndpoint {
    pub fn new(endpoint_id: impl Into<EndpointId>, endpoint_name: Option<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            endpoint_name,
        }
    }
}

/// Peer-connection lifecycle label reported through `nearbyStatus` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NearbyStatus {
    Idle,
    Advertising,
    Discovering,
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

impl Default for NearbyStatus {
    fn default() -> Self {
        NearbyStatus::Idle
    }
}

impl std::fmt::Display for NearbyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NearbyStatus::Idle => write!(f, "idle"),
            NearbyStatus::Advertising => write!(f, "advertising"),
            NearbyStatus::Discovering => write!(f, "discovering"),
            NearbyStatus::Connecting => write!(f, "connecting"),
            NearbyStatus::Connected => write!(f, "connected"),
            NearbyStatus::Disconnected => write!(f, "disconnected"),
            NearbyStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Topology the platform uses when advertising and discovering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Many-to-many, each device may connect to several others
    P2pCluster,
    /// One hub, many spokes
    P2pStar,
    /// Exactly one peer at a time
    P2pPointToPoint,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::P2pCluster => write!(f, "P2P_CLUSTER"),
            Strategy::P2pStar => write!(f, "P2P_STAR"),
            Strategy::P2pPointToPoint => write!(f, "P2P_POINT_TO_POINT"),
        }
    }
}

/// Result of the capability query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportResult {
    pub supported: bool,
}

// Call shapes. Fields the JS contract marks as required are still decoded as
// `Option` so that each backend decides what a missing value means.

/// Options for `startAdvertising`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisingOptions {
    /// Any JSON object; pushed to each peer that connects while advertising
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Display name shown to other devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

impl AdvertisingOptions {
    pub fn new(data: serde_json::Value, service_id: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            endpoint_name: None,
            service_id: Some(service_id.into()),
        }
    }

    pub fn with_endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = Some(name.into());
        self
    }
}

/// Options for `startDiscovery`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

impl DiscoveryOptions {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
        }
    }
}

/// Options for `requestConnection`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<EndpointId>,
    /// Name the remote side sees for this device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
}

impl ConnectionRequestOptions {
    pub fn new(endpoint_id: impl Into<EndpointId>) -> Self {
        Self {
            endpoint_id: Some(endpoint_id.into()),
            local_name: None,
        }
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }
}

/// Options for `sendPayload`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayloadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<EndpointId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl SendPayloadOptions {
    pub fn new(endpoint_id: impl Into<EndpointId>, payload: impl Into<String>) -> Self {
        Self {
            endpoint_id: Some(endpoint_id.into()),
            payload: Some(payload.into()),
        }
    }
}

/// Options for `acceptConnection` and `rejectConnection`
///
/// When the endpoint id is absent the backend resolves the pending one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDecisionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<EndpointId>,
}

impl ConnectionDecisionOptions {
    pub fn for_endpoint(endpoint_id: impl Into<EndpointId>) -> Self {
        Self {
            endpoint_id: Some(endpoint_id.into()),
        }
    }
}

/// An endpoint the native backend currently knows about
#[derive(Debug, Clone)]
pub struct KnownEndpoint {
    pub endpoint: NearbyEndpoint,
    pub discovered_at: DateTime<Utc>,
}
