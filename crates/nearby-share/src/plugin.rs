// Plugin contract shared by every backend

use crate::events::{EventHub, ListenerHandle, NearbyEvent};
use crate::{
    AdvertisingOptions, ConnectionDecisionOptions, ConnectionRequestOptions, DiscoveryOptions,
    Result, SendPayloadOptions, SupportResult,
};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capability name the host runtime routes calls by
pub const NEARBY_SHARE_PLUGIN_NAME: &str = "NearbyShare";

/// Operations exposed to the host runtime
///
/// Each call is single-shot: it resolves or rejects once, with no partial
/// results and no cancellation. Independently issued calls carry no ordering
/// guarantee.
#[async_trait]
pub trait NearbySharePlugin: Send + Sync {
    /// Short name of the backend, used in logs
    fn backend_name(&self) -> &str;

    /// Hub listeners attach to
    fn events(&self) -> &EventHub;

    /// Whether call options should be decoded before reaching this backend
    fn inspects_input(&self) -> bool {
        true
    }

    /// Query whether proximity sharing works on this device. Never fails on
    /// the fallback.
    async fn is_supported(&self) -> Result<SupportResult>;

    /// Ask for the platform permissions nearby sharing needs
    async fn request_permissions(&self) -> Result<()>;

    /// Begin broadcasting presence under a service id
    async fn start_advertising(&self, options: AdvertisingOptions) -> Result<()>;

    /// Begin scanning for advertisers under a service id
    async fn start_discovery(&self, options: DiscoveryOptions) -> Result<()>;

    /// Initiate a connection handshake with a discovered endpoint
    async fn request_connection(&self, options: ConnectionRequestOptions) -> Result<()>;

    /// Send a text payload to an endpoint
    async fn send_payload(&self, options: SendPayloadOptions) -> Result<()>;

    /// Accept a pending incoming connection
    async fn accept_connection(&self, options: Option<ConnectionDecisionOptions>) -> Result<()>;

    /// Reject a pending incoming connection
    async fn reject_connection(&self, options: Option<ConnectionDecisionOptions>) -> Result<()>;

    /// Tear down advertising, discovery and connections
    async fn stop(&self) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<NearbyEvent> {
        self.events().subscribe()
    }

    fn add_listener(
        &self,
        event_name: &str,
        callback: Box<dyn Fn(NearbyEvent) + Send + Sync>,
    ) -> Result<ListenerHandle> {
        self.events().add_listener(event_name, callback)
    }

    fn remove_all_listeners(&self) {
        self.events().remove_all_listeners()
    }
}
