use anyhow::Context;
use std::env;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::Strategy;

pub const DEFAULT_SERVICE_ID: &str = "com.meetfolio.app.nearby";
pub const DEFAULT_ENDPOINT_NAME: &str = "Nearby Device";
pub const DEFAULT_LOCAL_NAME: &str = "Nearby User";

#[derive(Debug, Clone)]
pub struct NearbyConfig {
    /// Service id used when a call omits `serviceId`
    pub default_service_id: String,
    /// Advertised name used when `startAdvertising` omits `endpointName`
    pub default_endpoint_name: String,
    /// Name sent with `requestConnection` when `localName` is omitted
    pub default_local_name: String,
    /// Events buffered per subscriber
    pub event_capacity: usize,
    /// Topology requested from the platform
    pub strategy: Strategy,
}

fn default_strategy() -> Strategy {
    Strategy::P2pCluster
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            default_service_id: DEFAULT_SERVICE_ID.to_string(),
            default_endpoint_name: DEFAULT_ENDPOINT_NAME.to_string(),
            default_local_name: DEFAULT_LOCAL_NAME.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            strategy: default_strategy(),
        }
    }
}

impl NearbyConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(NearbyConfig {
            default_service_id: env::var("NEARBY_DEFAULT_SERVICE_ID")
                .unwrap_or_else(|_| DEFAULT_SERVICE_ID.to_string()),
            default_endpoint_name: env::var("NEARBY_DEFAULT_ENDPOINT_NAME")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT_NAME.to_string()),
            default_local_name: env::var("NEARBY_DEFAULT_LOCAL_NAME")
                .unwrap_or_else(|_| DEFAULT_LOCAL_NAME.to_string()),
            event_capacity: env::var("NEARBY_EVENT_CAPACITY")
                .unwrap_or_else(|_| DEFAULT_EVENT_CAPACITY.to_string())
                .parse()
                .context("NEARBY_EVENT_CAPACITY must be a positive integer")?,
            strategy: default_strategy(),
        })
    }
}
