// Backend selected when no native implementation is registered

use crate::events::EventHub;
use crate::plugin::NearbySharePlugin;
use crate::{
    AdvertisingOptions, ConnectionDecisionOptions, ConnectionRequestOptions, DiscoveryOptions,
    NearbyShareError, Result, SendPayloadOptions, SupportResult,
};
use async_trait::async_trait;
use tracing::debug;

/// Rejects every operation as unimplemented, except the capability query
/// which reports `supported: false`. Input is never inspected.
pub struct UnimplementedBackend {
    events: EventHub,
}

impl UnimplementedBackend {
    pub fn new() -> Self {
        Self {
            events: EventHub::default(),
        }
    }

    fn reject(&self, method: &str) -> Result<()> {
        debug!("{} called on fallback backend", method);
        Err(NearbyShareError::unimplemented())
    }
}

impl Default for UnimplementedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NearbySharePlugin for UnimplementedBackend {
    fn backend_name(&self) -> &str {
        "web"
    }

    fn events(&self) -> &EventHub {
        &self.events
    }

    fn inspects_input(&self) -> bool {
        false
    }

    async fn is_supported(&self) -> Result<SupportResult> {
        Ok(SupportResult { supported: false })
    }

    async fn request_permissions(&self) -> Result<()> {
        self.reject("requestPermissions")
    }

    async fn start_advertising(&self, _options: AdvertisingOptions) -> Result<()> {
        self.reject("startAdvertising")
    }

    async fn start_discovery(&self, _options: DiscoveryOptions) -> Result<()> {
        self.reject("startDiscovery")
    }

    async fn request_connection(&self, _options: ConnectionRequestOptions) -> Result<()> {
        self.reject("requestConnection")
    }

    async fn send_payload(&self, _options: SendPayloadOptions) -> Result<()> {
        self.reject("sendPayload")
    }

    async fn accept_connection(&self, _options: Option<ConnectionDecisionOptions>) -> Result<()> {
        self.reject("acceptConnection")
    }

    async fn reject_connection(&self, _options: Option<ConnectionDecisionOptions>) -> Result<()> {
        self.reject("rejectConnection")
    }

    async fn stop(&self) -> Result<()> {
        self.reject("stop")
    }
}
