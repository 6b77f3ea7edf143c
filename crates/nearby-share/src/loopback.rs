// In-process connections medium
// Lets several clients in one process advertise, discover, connect and
// exchange payloads without a radio. Used for desktop development and tests.

use crate::platform::{
    Availability, ClientError, ClientEvent, ClientResult, ConnectionsClient, Payload,
};
use crate::{EndpointId, Strategy};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

const ENDPOINT_ID_LEN: usize = 4;
const ENDPOINT_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone)]
struct Advertisement {
    endpoint_name: String,
    service_id: String,
}

struct Device {
    events: mpsc::UnboundedSender<ClientEvent>,
    advertising: Option<Advertisement>,
    discovering: Option<String>,
}

impl Device {
    fn deliver(&self, event: ClientEvent) {
        // The owning backend may already be gone
        let _ = self.events.send(event);
    }
}

#[derive(Debug)]
struct Link {
    accepted: Vec<EndpointId>,
    connected: bool,
}

#[derive(Default)]
struct MediumState {
    devices: HashMap<EndpointId, Device>,
    links: HashMap<(EndpointId, EndpointId), Link>,
}

impl MediumState {
    fn deliver(&self, endpoint_id: &str, event: ClientEvent) {
        if let Some(device) = self.devices.get(endpoint_id) {
            device.deliver(event);
        }
    }
}

fn link_key(a: &str, b: &str) -> (EndpointId, EndpointId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn other_end<'a>(key: &'a (EndpointId, EndpointId), me: &str) -> &'a EndpointId {
    if key.0 == me {
        &key.1
    } else {
        &key.0
    }
}

/// Shared medium every loopback client joins
#[derive(Clone, Default)]
pub struct LoopbackMedium {
    state: Arc<RwLock<MediumState>>,
}

impl LoopbackMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new device and return its client
    pub async fn join(&self) -> LoopbackClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;

        let endpoint_id = loop {
            let candidate = generate_endpoint_id();
            if !state.devices.contains_key(&candidate) {
                break candidate;
            }
        };

        state.devices.insert(
            endpoint_id.clone(),
            Device {
                events: tx,
                advertising: None,
                discovering: None,
            },
        );
        debug!("Device {} joined loopback medium", endpoint_id);

        LoopbackClient {
            endpoint_id,
            medium: self.clone(),
            events: Mutex::new(Some(rx)),
            available: AtomicBool::new(true),
        }
    }

    pub async fn device_count(&self) -> usize {
        self.state.read().await.devices.len()
    }
}

fn generate_endpoint_id() -> EndpointId {
    let mut rng = rand::thread_rng();
    (0..ENDPOINT_ID_LEN)
        .map(|_| ENDPOINT_ID_ALPHABET[rng.gen_range(0..ENDPOINT_ID_ALPHABET.len())] as char)
        .collect()
}

/// One device's view of a loopback medium
pub struct LoopbackClient {
    endpoint_id: EndpointId,
    medium: LoopbackMedium,
    events: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    available: AtomicBool,
}

impl LoopbackClient {
    /// Id other devices see this client under
    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    /// Simulate the platform service being switched off or back on
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> ClientResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Unavailable("loopback device disabled".to_string()))
        }
    }
}

#[async_trait]
impl ConnectionsClient for LoopbackClient {
    fn platform_name(&self) -> &str {
        "loopback"
    }

    async fn availability(&self) -> Availability {
        match self.ensure_available() {
            Ok(()) => Availability::Available,
            Err(e) => Availability::Unavailable(e.to_string()),
        }
    }

    async fn start_advertising(
        &self,
        endpoint_name: &str,
        service_id: &str,
        strategy: Strategy,
    ) -> ClientResult<()> {
        self.ensure_available()?;
        let mut state = self.medium.state.write().await;

        let device = state
            .devices
            .get_mut(&self.endpoint_id)
            .ok_or_else(|| ClientError::EndpointUnknown(self.endpoint_id.clone()))?;
        if device.advertising.is_some() {
            return Err(ClientError::AlreadyAdvertising);
        }
        device.advertising = Some(Advertisement {
            endpoint_name: endpoint_name.to_string(),
            service_id: service_id.to_string(),
        });

        info!(
            "{} advertising as '{}' on {} ({})",
            self.endpoint_id, endpoint_name, service_id, strategy
        );

        for (id, other) in &state.devices {
            if id != &self.endpoint_id && other.discovering.as_deref() == Some(service_id) {
                other.deliver(ClientEvent::EndpointFound {
                    endpoint_id: self.endpoint_id.clone(),
                    endpoint_name: Some(endpoint_name.to_string()),
                    service_id: service_id.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn start_discovery(&self, service_id: &str, strategy: Strategy) -> ClientResult<()> {
        self.ensure_available()?;
        let mut state = self.medium.state.write().await;

        let device = state
            .devices
            .get_mut(&self.endpoint_id)
            .ok_or_else(|| ClientError::EndpointUnknown(self.endpoint_id.clone()))?;
        if device.discovering.is_some() {
            return Err(ClientError::AlreadyDiscovering);
        }
        device.discovering = Some(service_id.to_string());

        info!("{} discovering on {} ({})", self.endpoint_id, service_id, strategy);

        let found: Vec<ClientEvent> = state
            .devices
            .iter()
            .filter(|(id, _)| *id != &self.endpoint_id)
            .filter_map(|(id, other)| {
                other
                    .advertising
                    .as_ref()
                    .filter(|ad| ad.service_id == service_id)
                    .map(|ad| ClientEvent::EndpointFound {
                        endpoint_id: id.clone(),
                        endpoint_name: Some(ad.endpoint_name.clone()),
                        service_id: service_id.to_string(),
                    })
            })
            .collect();

        for event in found {
            state.deliver(&self.endpoint_id, event);
        }
        Ok(())
    }

    async fn request_connection(&self, local_name: &str, endpoint_id: &str) -> ClientResult<()> {
        self.ensure_available()?;
        let mut state = self.medium.state.write().await;

        let remote_name = state
            .devices
            .get(endpoint_id)
            .filter(|_| endpoint_id != self.endpoint_id)
            .and_then(|device| device.advertising.as_ref())
            .map(|ad| ad.endpoint_name.clone())
            .ok_or_else(|| ClientError::EndpointUnknown(endpoint_id.to_string()))?;

        let key = link_key(&self.endpoint_id, endpoint_id);
        if state.links.contains_key(&key) {
            return Err(ClientError::Other(format!(
                "Already connecting or connected to {}",
                endpoint_id
            )));
        }
        state.links.insert(
            key,
            Link {
                accepted: Vec::new(),
                connected: false,
            },
        );

        debug!("{} requested connection to {}", self.endpoint_id, endpoint_id);

        state.deliver(
            endpoint_id,
            ClientEvent::ConnectionInitiated {
                endpoint_id: self.endpoint_id.clone(),
                endpoint_name: Some(local_name.to_string()),
            },
        );
        state.deliver(
            &self.endpoint_id,
            ClientEvent::ConnectionInitiated {
                endpoint_id: endpoint_id.to_string(),
                endpoint_name: Some(remote_name),
            },
        );
        Ok(())
    }

    async fn accept_connection(&self, endpoint_id: &str) -> ClientResult<()> {
        let mut state = self.medium.state.write().await;
        let key = link_key(&self.endpoint_id, endpoint_id);

        let link = state
            .links
            .get_mut(&key)
            .filter(|link| !link.connected)
            .ok_or_else(|| ClientError::NoPendingConnection(endpoint_id.to_string()))?;

        if !link.accepted.contains(&self.endpoint_id) {
            link.accepted.push(self.endpoint_id.clone());
        }
        if link.accepted.len() < 2 {
            debug!("{} accepted {}, waiting for the other side", self.endpoint_id, endpoint_id);
            return Ok(());
        }
        link.connected = true;

        info!("{} and {} connected", self.endpoint_id, endpoint_id);
        state.deliver(
            &self.endpoint_id,
            ClientEvent::ConnectionResult {
                endpoint_id: endpoint_id.to_string(),
                success: true,
            },
        );
        state.deliver(
            endpoint_id,
            ClientEvent::ConnectionResult {
                endpoint_id: self.endpoint_id.clone(),
                success: true,
            },
        );
        Ok(())
    }

    async fn reject_connection(&self, endpoint_id: &str) -> ClientResult<()> {
        let mut state = self.medium.state.write().await;
        let key = link_key(&self.endpoint_id, endpoint_id);

        match state.links.get(&key) {
            Some(link) if !link.connected => {}
            _ => return Err(ClientError::NoPendingConnection(endpoint_id.to_string())),
        }
        state.links.remove(&key);

        info!("{} rejected connection with {}", self.endpoint_id, endpoint_id);
        state.deliver(
            &self.endpoint_id,
            ClientEvent::ConnectionResult {
                endpoint_id: endpoint_id.to_string(),
                success: false,
            },
        );
        state.deliver(
            endpoint_id,
            ClientEvent::ConnectionResult {
                endpoint_id: self.endpoint_id.clone(),
                success: false,
            },
        );
        Ok(())
    }

    async fn send_payload(&self, endpoint_id: &str, payload: Payload) -> ClientResult<()> {
        self.ensure_available()?;
        let state = self.medium.state.read().await;

        if !state.devices.contains_key(endpoint_id) {
            return Err(ClientError::EndpointUnknown(endpoint_id.to_string()));
        }
        let connected = state
            .links
            .get(&link_key(&self.endpoint_id, endpoint_id))
            .map(|link| link.connected)
            .unwrap_or(false);
        if !connected {
            return Err(ClientError::NotConnected(endpoint_id.to_string()));
        }

        state.deliver(
            endpoint_id,
            ClientEvent::PayloadReceived {
                endpoint_id: self.endpoint_id.clone(),
                payload,
            },
        );
        Ok(())
    }

    async fn stop_discovery(&self) -> ClientResult<()> {
        let mut state = self.medium.state.write().await;
        if let Some(device) = state.devices.get_mut(&self.endpoint_id) {
            device.discovering = None;
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> ClientResult<()> {
        let mut state = self.medium.state.write().await;
        let stopped = state
            .devices
            .get_mut(&self.endpoint_id)
            .and_then(|device| device.advertising.take());

        if let Some(ad) = stopped {
            debug!("{} stopped advertising on {}", self.endpoint_id, ad.service_id);
            for (id, other) in &state.devices {
                if id != &self.endpoint_id
                    && other.discovering.as_deref() == Some(ad.service_id.as_str())
                {
                    other.deliver(ClientEvent::EndpointLost {
                        endpoint_id: self.endpoint_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn stop_all_endpoints(&self) -> ClientResult<()> {
        let mut state = self.medium.state.write().await;
        let mine: Vec<(EndpointId, EndpointId)> = state
            .links
            .keys()
            .filter(|(a, b)| *a == self.endpoint_id || *b == self.endpoint_id)
            .cloned()
            .collect();

        for key in mine {
            let Some(link) = state.links.remove(&key) else {
                continue;
            };
            let peer = other_end(&key, &self.endpoint_id).clone();

            // Only the remote side is told; the caller initiated the teardown
            if link.connected {
                state.deliver(
                    &peer,
                    ClientEvent::Disconnected {
                        endpoint_id: self.endpoint_id.clone(),
                    },
                );
            } else {
                state.deliver(
                    &peer,
                    ClientEvent::ConnectionResult {
                        endpoint_id: self.endpoint_id.clone(),
                        success: false,
                    },
                );
            }
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events.lock().ok().and_then(|mut slot| slot.take())
    }
}
