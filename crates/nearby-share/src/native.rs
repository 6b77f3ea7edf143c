// Native backend - session logic on top of a platform connections client
// Tracks endpoints, the pending and connected peer, and turns client callbacks
// into plugin events

use crate::config::NearbyConfig;
use crate::events::{EndpointRef, EventHub, NearbyEvent, ReceivedPayload};
use crate::permissions::{PermissionManager, PermissionStatus, PERMISSIONS_DENIED};
use crate::platform::{Availability, ClientEvent, ConnectionsClient, Payload};
use crate::plugin::NearbySharePlugin;
use crate::{
    AdvertisingOptions, ConnectionDecisionOptions, ConnectionRequestOptions, DiscoveryOptions,
    EndpointId, KnownEndpoint, NearbyEndpoint, NearbyShareError, NearbyStatus, Result,
    SendPayloadOptions, SupportResult,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct SessionState {
    endpoints: HashMap<EndpointId, KnownEndpoint>,
    /// Serialised `data` from the last `startAdvertising`
    advertising_payload: Option<String>,
    advertising: bool,
    discovering: bool,
    connected_endpoint_id: Option<EndpointId>,
    pending: Option<NearbyEndpoint>,
    status: NearbyStatus,
}

/// State shared between plugin calls and the client callback task
struct Session {
    client: Arc<dyn ConnectionsClient>,
    state: RwLock<SessionState>,
    events: EventHub,
}

impl Session {
    async fn notify_status(&self, status: NearbyStatus) {
        self.state.write().await.status = status;
        self.events.emit(NearbyEvent::status(status));
    }

    fn notify_error(&self, message: impl Into<String>) {
        self.events.emit(NearbyEvent::error(message));
    }

    /// Reset everything and ask the client to tear down radio activity
    async fn stop_all(&self) {
        {
            let mut state = self.state.write().await;
            state.endpoints.clear();
            state.advertising = false;
            state.discovering = false;
            state.connected_endpoint_id = None;
            state.pending = None;
        }

        if let Err(e) = self.client.stop_discovery().await {
            debug!("Ignoring stop_discovery failure: {}", e);
        }
        if let Err(e) = self.client.stop_advertising().await {
            debug!("Ignoring stop_advertising failure: {}", e);
        }
        if let Err(e) = self.client.stop_all_endpoints().await {
            debug!("Ignoring stop_all_endpoints failure: {}", e);
        }

        self.notify_status(NearbyStatus::Stopped).await;
    }

    async fn handle_client_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::EndpointFound {
                endpoint_id,
                endpoint_name,
                service_id,
            } => {
                let endpoint = NearbyEndpoint::new(endpoint_id.clone(), endpoint_name);
                self.state.write().await.endpoints.insert(
                    endpoint_id.clone(),
                    KnownEndpoint {
                        endpoint: endpoint.clone(),
                        discovered_at: Utc::now(),
                    },
                );
                info!("Endpoint found: {} on {}", endpoint_id, service_id);
                self.events.emit(NearbyEvent::EndpointFound(endpoint));
            }
            ClientEvent::EndpointLost { endpoint_id } => {
                self.state.write().await.endpoints.remove(&endpoint_id);
                info!("Endpoint lost: {}", endpoint_id);
                self.events
                    .emit(NearbyEvent::EndpointLost(EndpointRef { endpoint_id }));
            }
            ClientEvent::ConnectionInitiated {
                endpoint_id,
                endpoint_name,
            } => {
                let endpoint = NearbyEndpoint::new(endpoint_id.clone(), endpoint_name);
                self.state.write().await.pending = Some(endpoint.clone());
                info!("Connection initiated with {}", endpoint_id);
                self.events.emit(NearbyEvent::ConnectionInitiated(endpoint));
            }
            ClientEvent::ConnectionResult {
                endpoint_id,
                success: true,
            } => {
                let (endpoint, auto_payload) = {
                    let mut state = self.state.write().await;
                    state.pending = None;
                    let name = state
                        .endpoints
                        .get(&endpoint_id)
                        .and_then(|known| known.endpoint.endpoint_name.clone());
                    state.connected_endpoint_id = Some(endpoint_id.clone());

                    let auto_payload = if state.advertising {
                        state.advertising_payload.clone()
                    } else {
                        None
                    };
                    (NearbyEndpoint::new(endpoint_id.clone(), name), auto_payload)
                };

                info!("Connected to {}", endpoint_id);
                self.notify_status(NearbyStatus::Connected).await;
                self.events.emit(NearbyEvent::Connected(endpoint));

                if let Some(payload) = auto_payload {
                    debug!("Pushing advertised data to {}", endpoint_id);
                    if let Err(e) = self
                        .client
                        .send_payload(&endpoint_id, Payload::from_text(&payload))
                        .await
                    {
                        warn!("Failed to push advertised data to {}: {}", endpoint_id, e);
                    }
                }
            }
            ClientEvent::ConnectionResult {
                endpoint_id,
                success: false,
            } => {
                warn!("Connection with {} failed", endpoint_id);
                self.notify_error("Connection failed.");
            }
            ClientEvent::Disconnected { endpoint_id } => {
                let was_connected = {
                    let mut state = self.state.write().await;
                    let matches =
                        state.connected_endpoint_id.as_deref() == Some(endpoint_id.as_str());
                    if matches {
                        state.connected_endpoint_id = None;
                    }
                    matches
                };
                info!("Disconnected from {}", endpoint_id);
                self.events
                    .emit(NearbyEvent::Disconnected(EndpointRef { endpoint_id }));
                // A stale peer must not override the current lifecycle status
                if was_connected {
                    self.notify_status(NearbyStatus::Disconnected).await;
                }
            }
            ClientEvent::PayloadReceived {
                endpoint_id,
                payload,
            } => match payload.as_text() {
                Some(text) => {
                    debug!("Payload of {} byte(s) from {}", text.len(), endpoint_id);
                    self.events.emit(NearbyEvent::Payload(ReceivedPayload {
                        endpoint_id,
                        payload: text.into_owned(),
                    }));
                }
                None => debug!("Ignoring file or stream payload from {}", endpoint_id),
            },
        }
    }
}

/// Backend that forwards calls to a platform connections client
pub struct NativeBackend {
    session: Arc<Session>,
    permissions: PermissionManager,
    config: NearbyConfig,
    callback_task: JoinHandle<()>,
}

impl NativeBackend {
    /// Take over the client's callback channel and start draining it
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        client: Arc<dyn ConnectionsClient>,
        permissions: PermissionManager,
        config: NearbyConfig,
    ) -> Result<Self> {
        let client_events = client.take_events().ok_or_else(|| {
            NearbyShareError::Backend(format!(
                "{} client events already taken by another backend",
                client.platform_name()
            ))
        })?;

        info!(
            "Native nearby backend loaded on {} (strategy {})",
            client.platform_name(),
            config.strategy
        );

        let session = Arc::new(Session {
            client,
            state: RwLock::new(SessionState::default()),
            events: EventHub::new(config.event_capacity),
        });
        let callback_task = Self::spawn_callback_task(Arc::clone(&session), client_events);

        Ok(Self {
            session,
            permissions,
            config,
            callback_task,
        })
    }

    fn spawn_callback_task(
        session: Arc<Session>,
        mut client_events: mpsc::UnboundedReceiver<ClientEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = client_events.recv().await {
                session.handle_client_event(event).await;
            }
            debug!("Client callback channel closed");
        })
    }

    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    /// Last status emitted
    pub async fn status(&self) -> NearbyStatus {
        self.session.state.read().await.status
    }

    pub async fn is_advertising(&self) -> bool {
        self.session.state.read().await.advertising
    }

    pub async fn is_discovering(&self) -> bool {
        self.session.state.read().await.discovering
    }

    pub async fn connected_endpoint(&self) -> Option<EndpointId> {
        self.session.state.read().await.connected_endpoint_id.clone()
    }

    /// Endpoint whose incoming connection awaits a decision
    pub async fn pending_endpoint(&self) -> Option<NearbyEndpoint> {
        self.session.state.read().await.pending.clone()
    }

    pub async fn known_endpoints(&self) -> Vec<KnownEndpoint> {
        self.session
            .state
            .read()
            .await
            .endpoints
            .values()
            .cloned()
            .collect()
    }

    /// Explicit id when given and non-blank, otherwise the pending endpoint
    async fn resolve_decision_target(
        &self,
        options: Option<ConnectionDecisionOptions>,
    ) -> Result<EndpointId> {
        let explicit = options
            .and_then(|o| o.endpoint_id)
            .filter(|id| !id.trim().is_empty());
        if let Some(endpoint_id) = explicit {
            return Ok(endpoint_id);
        }

        self.session
            .state
            .read()
            .await
            .pending
            .as_ref()
            .map(|p| p.endpoint_id.clone())
            .ok_or_else(|| NearbyShareError::InvalidInput("Missing endpointId.".to_string()))
    }

    async fn clear_pending(&self) {
        self.session.state.write().await.pending = None;
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        self.callback_task.abort();
    }
}

#[async_trait]
impl NearbySharePlugin for NativeBackend {
    fn backend_name(&self) -> &str {
        self.session.client.platform_name()
    }

    fn events(&self) -> &EventHub {
        &self.session.events
    }

    async fn is_supported(&self) -> Result<SupportResult> {
        let availability = self.session.client.availability().await;
        let supported = availability.is_available();
        debug!("isSupported check - supported: {}", supported);

        if let Availability::Unavailable(reason) = availability {
            warn!("Nearby service not available: {}", reason);
        }

        Ok(SupportResult { supported })
    }

    async fn request_permissions(&self) -> Result<()> {
        let current = self.permissions.check_permission().await;
        debug!("requestPermissions called. Current state: {:?}", current);

        if current == PermissionStatus::Granted {
            debug!("Permissions already granted");
            return Ok(());
        }

        match self.permissions.request_permission().await {
            PermissionStatus::Granted => {
                info!("Permissions granted");
                Ok(())
            }
            status => {
                warn!(
                    "Permissions denied: {:?}, grant them from {}",
                    status,
                    self.permissions.get_settings_link()
                );
                Err(NearbyShareError::PermissionDenied(PERMISSIONS_DENIED.to_string()))
            }
        }
    }

    async fn start_advertising(&self, options: AdvertisingOptions) -> Result<()> {
        debug!("startAdvertising called");
        self.permissions.verify_permission().await?;

        let data = match options.data {
            Some(data @ serde_json::Value::Object(_)) => data,
            _ => {
                error!("startAdvertising failed: missing data");
                return Err(NearbyShareError::InvalidInput("Missing data object.".to_string()));
            }
        };

        let endpoint_name = options
            .endpoint_name
            .unwrap_or_else(|| self.config.default_endpoint_name.clone());
        let service_id = options
            .service_id
            .unwrap_or_else(|| self.config.default_service_id.clone());

        info!(
            "Starting advertising with endpointName: {} serviceId: {}",
            endpoint_name, service_id
        );

        self.session.state.write().await.advertising_payload = Some(data.to_string());
        self.session.stop_all().await;

        match self
            .session
            .client
            .start_advertising(&endpoint_name, &service_id, self.config.strategy)
            .await
        {
            Ok(()) => {
                self.session.state.write().await.advertising = true;
                info!("Advertising started successfully");
                self.session.notify_status(NearbyStatus::Advertising).await;
                Ok(())
            }
            Err(e) => {
                error!("Advertising failed: {}", e);
                self.session.notify_error(format!("Advertising failed: {}", e));
                Err(NearbyShareError::AdvertisingFailed(format!(
                    "Failed to start advertising. {}",
                    e
                )))
            }
        }
    }

    async fn start_discovery(&self, options: DiscoveryOptions) -> Result<()> {
        debug!("startDiscovery called");
        self.permissions.verify_permission().await?;

        // Advertising keeps running alongside discovery
        let service_id = options
            .service_id
            .unwrap_or_else(|| self.config.default_service_id.clone());

        match self
            .session
            .client
            .start_discovery(&service_id, self.config.strategy)
            .await
        {
            Ok(()) => {
                self.session.state.write().await.discovering = true;
                info!("Discovery started successfully on {}", service_id);
                self.session.notify_status(NearbyStatus::Discovering).await;
                Ok(())
            }
            Err(e) => {
                error!("Discovery failed: {}", e);
                let message = format!("Discovery failed: {}", e);
                self.session.notify_error(message.clone());
                Err(NearbyShareError::DiscoveryFailed(message))
            }
        }
    }

    async fn request_connection(&self, options: ConnectionRequestOptions) -> Result<()> {
        self.permissions.verify_permission().await?;

        let endpoint_id = options
            .endpoint_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| NearbyShareError::InvalidInput("Missing endpointId.".to_string()))?;
        let local_name = options
            .local_name
            .unwrap_or_else(|| self.config.default_local_name.clone());

        self.session.notify_status(NearbyStatus::Connecting).await;

        self.session
            .client
            .request_connection(&local_name, &endpoint_id)
            .await
            .map_err(|e| {
                error!("Connection request to {} failed: {}", endpoint_id, e);
                self.session.notify_error("Connection request failed.");
                NearbyShareError::ConnectionFailed("Connection request failed.".to_string())
            })
    }

    async fn send_payload(&self, options: SendPayloadOptions) -> Result<()> {
        let (endpoint_id, payload) = match (options.endpoint_id, options.payload) {
            (Some(endpoint_id), Some(payload)) => (endpoint_id, payload),
            _ => {
                return Err(NearbyShareError::InvalidInput(
                    "Missing endpointId or payload.".to_string(),
                ))
            }
        };

        // Delivery is not awaited; a refused hand-off surfaces as an error event
        if let Err(e) = self
            .session
            .client
            .send_payload(&endpoint_id, Payload::from_text(&payload))
            .await
        {
            warn!("Payload to {} was not queued: {}", endpoint_id, e);
            self.session
                .notify_error(format!("Failed to send payload to {}.", endpoint_id));
        }
        Ok(())
    }

    async fn accept_connection(&self, options: Option<ConnectionDecisionOptions>) -> Result<()> {
        let endpoint_id = self.resolve_decision_target(options).await?;

        match self.session.client.accept_connection(&endpoint_id).await {
            Ok(()) => {
                info!("Accepted connection from {}", endpoint_id);
                self.clear_pending().await;
                Ok(())
            }
            Err(e) => {
                error!("Failed to accept connection from {}: {}", endpoint_id, e);
                Err(NearbyShareError::ConnectionFailed(
                    "Failed to accept connection.".to_string(),
                ))
            }
        }
    }

    async fn reject_connection(&self, options: Option<ConnectionDecisionOptions>) -> Result<()> {
        let endpoint_id = self.resolve_decision_target(options).await?;

        match self.session.client.reject_connection(&endpoint_id).await {
            Ok(()) => {
                info!("Rejected connection from {}", endpoint_id);
                self.clear_pending().await;
                Ok(())
            }
            Err(e) => {
                error!("Failed to reject connection from {}: {}", endpoint_id, e);
                Err(NearbyShareError::ConnectionFailed(
                    "Failed to reject connection.".to_string(),
                ))
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        info!("Stopping nearby session");
        self.session.stop_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::FixedPermissionPrompt;
    use crate::platform::{ClientError, ClientResult};
    use crate::Strategy;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::broadcast;
    use tokio::time::{timeout, Duration};

    /// Client that records calls and fails the operations it is told to
    struct ScriptedClient {
        calls: Mutex<Vec<String>>,
        fail_advertising: bool,
        fail_discovery: bool,
        fail_connection: bool,
        events: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    }

    impl ScriptedClient {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<ClientEvent>) {
            Self::failing(false, false, false)
        }

        fn failing(
            fail_advertising: bool,
            fail_discovery: bool,
            fail_connection: bool,
        ) -> (Arc<Self>, mpsc::UnboundedSender<ClientEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let client = Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_advertising,
                fail_discovery,
                fail_connection,
                events: Mutex::new(Some(rx)),
            });
            (client, tx)
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConnectionsClient for ScriptedClient {
        fn platform_name(&self) -> &str {
            "scripted"
        }

        async fn availability(&self) -> Availability {
            Availability::Unavailable("SERVICE_MISSING".to_string())
        }

        async fn start_advertising(
            &self,
            endpoint_name: &str,
            service_id: &str,
            strategy: Strategy,
        ) -> ClientResult<()> {
            self.record(format!("advertise:{}:{}:{}", endpoint_name, service_id, strategy));
            if self.fail_advertising {
                return Err(ClientError::Other("radio busy".to_string()));
            }
            Ok(())
        }

        async fn start_discovery(&self, service_id: &str, _strategy: Strategy) -> ClientResult<()> {
            self.record(format!("discover:{}", service_id));
            if self.fail_discovery {
                return Err(ClientError::AlreadyDiscovering);
            }
            Ok(())
        }

        async fn request_connection(&self, local_name: &str, endpoint_id: &str) -> ClientResult<()> {
            self.record(format!("connect:{}:{}", local_name, endpoint_id));
            if self.fail_connection {
                return Err(ClientError::EndpointUnknown(endpoint_id.to_string()));
            }
            Ok(())
        }

        async fn accept_connection(&self, endpoint_id: &str) -> ClientResult<()> {
            self.record(format!("accept:{}", endpoint_id));
            Ok(())
        }

        async fn reject_connection(&self, endpoint_id: &str) -> ClientResult<()> {
            self.record(format!("reject:{}", endpoint_id));
            Err(ClientError::NoPendingConnection(endpoint_id.to_string()))
        }

        async fn send_payload(&self, endpoint_id: &str, payload: Payload) -> ClientResult<()> {
            self.record(format!("send:{}:{}", endpoint_id, payload.as_text().unwrap_or_default()));
            Ok(())
        }

        async fn stop_discovery(&self) -> ClientResult<()> {
            self.record("stop_discovery".to_string());
            Ok(())
        }

        async fn stop_advertising(&self) -> ClientResult<()> {
            self.record("stop_advertising".to_string());
            Err(ClientError::Other("not advertising".to_string()))
        }

        async fn stop_all_endpoints(&self) -> ClientResult<()> {
            self.record("stop_all_endpoints".to_string());
            Ok(())
        }

        fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
            self.events.lock().unwrap().take()
        }
    }

    fn granted_backend(client: Arc<ScriptedClient>) -> NativeBackend {
        NativeBackend::new(
            client,
            PermissionManager::new(Arc::new(FixedPermissionPrompt(PermissionStatus::Granted))),
            NearbyConfig::default(),
        )
        .unwrap()
    }

    async fn next_event(rx: &mut broadcast::Receiver<NearbyEvent>) -> NearbyEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_events_can_only_be_taken_once() {
        let (client, _tx) = ScriptedClient::new();
        let _first = granted_backend(client.clone());
        let second = NativeBackend::new(client, PermissionManager::default(), NearbyConfig::default());
        assert!(matches!(second, Err(NearbyShareError::Backend(_))));
    }

    #[tokio::test]
    async fn test_is_supported_reflects_availability() {
        let (client, _tx) = ScriptedClient::new();
        let backend = granted_backend(client);
        assert!(!backend.is_supported().await.unwrap().supported);
    }

    #[tokio::test]
    async fn test_operations_require_permissions() {
        let (client, _tx) = ScriptedClient::new();
        let backend = granted_backend(client.clone());

        let result = backend.start_discovery(DiscoveryOptions::new("svc")).await;
        assert_eq!(
            result,
            Err(NearbyShareError::PermissionDenied("Permissions not granted.".to_string()))
        );
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_request_permissions_denied() {
        let (client, _tx) = ScriptedClient::new();
        let backend = NativeBackend::new(
            client,
            PermissionManager::new(Arc::new(FixedPermissionPrompt(PermissionStatus::Denied))),
            NearbyConfig::default(),
        )
        .unwrap();

        let err = backend.request_permissions().await.unwrap_err();
        assert_eq!(err.to_string(), PERMISSIONS_DENIED);
    }

    #[tokio::test]
    async fn test_start_advertising_requires_data_object() {
        let (client, _tx) = ScriptedClient::new();
        let backend = granted_backend(client);
        backend.request_permissions().await.unwrap();

        let missing = backend.start_advertising(AdvertisingOptions::default()).await;
        assert_eq!(
            missing,
            Err(NearbyShareError::InvalidInput("Missing data object.".to_string()))
        );

        let not_object = backend
            .start_advertising(AdvertisingOptions::new(json!("text"), "svc"))
            .await;
        assert!(matches!(not_object, Err(NearbyShareError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_start_advertising_stops_first_and_uses_defaults() {
        let (client, _tx) = ScriptedClient::new();
        let backend = granted_backend(client.clone());
        backend.request_permissions().await.unwrap();
        let mut rx = backend.subscribe();

        let options = AdvertisingOptions {
            data: Some(json!({ "name": "Ada" })),
            endpoint_name: None,
            service_id: None,
        };
        backend.start_advertising(options).await.unwrap();

        assert_eq!(
            client.calls(),
            vec![
                "stop_discovery",
                "stop_advertising",
                "stop_all_endpoints",
                "advertise:Nearby Device:com.meetfolio.app.nearby:P2P_CLUSTER",
            ]
        );
        assert_eq!(next_event(&mut rx).await, NearbyEvent::status(NearbyStatus::Stopped));
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::status(NearbyStatus::Advertising)
        );
        assert!(backend.is_advertising().await);
        assert_eq!(backend.status().await, NearbyStatus::Advertising);
    }

    #[tokio::test]
    async fn test_advertising_failure_emits_error() {
        let (client, _tx) = ScriptedClient::failing(true, false, false);
        let backend = granted_backend(client);
        backend.request_permissions().await.unwrap();
        let mut rx = backend.subscribe();

        let err = backend
            .start_advertising(AdvertisingOptions::new(json!({}), "svc"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to start advertising. radio busy");

        assert_eq!(next_event(&mut rx).await, NearbyEvent::status(NearbyStatus::Stopped));
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::error("Advertising failed: radio busy")
        );
        assert!(!backend.is_advertising().await);
    }

    #[tokio::test]
    async fn test_discovery_failure() {
        let (client, _tx) = ScriptedClient::failing(false, true, false);
        let backend = granted_backend(client);
        backend.request_permissions().await.unwrap();

        let err = backend
            .start_discovery(DiscoveryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            NearbyShareError::DiscoveryFailed("Discovery failed: Already discovering".to_string())
        );
        assert!(!backend.is_discovering().await);
    }

    #[tokio::test]
    async fn test_request_connection_validation_and_failure() {
        let (client, _tx) = ScriptedClient::failing(false, false, true);
        let backend = granted_backend(client.clone());
        backend.request_permissions().await.unwrap();
        let mut rx = backend.subscribe();

        let blank = backend
            .request_connection(ConnectionRequestOptions::new("   "))
            .await;
        assert_eq!(
            blank,
            Err(NearbyShareError::InvalidInput("Missing endpointId.".to_string()))
        );

        let err = backend
            .request_connection(ConnectionRequestOptions::new("ZX9Q"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Connection request failed.");
        assert_eq!(client.calls(), vec!["connect:Nearby User:ZX9Q"]);

        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::status(NearbyStatus::Connecting)
        );
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::error("Connection request failed.")
        );
    }

    #[tokio::test]
    async fn test_send_payload_validation() {
        let (client, _tx) = ScriptedClient::new();
        let backend = granted_backend(client.clone());

        let missing = backend
            .send_payload(SendPayloadOptions {
                endpoint_id: Some("ZX9Q".to_string()),
                payload: None,
            })
            .await;
        assert_eq!(
            missing,
            Err(NearbyShareError::InvalidInput("Missing endpointId or payload.".to_string()))
        );

        backend
            .send_payload(SendPayloadOptions::new("ZX9Q", "hello"))
            .await
            .unwrap();
        assert_eq!(client.calls(), vec!["send:ZX9Q:hello"]);
    }

    #[tokio::test]
    async fn test_accept_uses_pending_endpoint() {
        let (client, tx) = ScriptedClient::new();
        let backend = granted_backend(client.clone());
        let mut rx = backend.subscribe();

        let none_pending = backend.accept_connection(None).await;
        assert_eq!(
            none_pending,
            Err(NearbyShareError::InvalidInput("Missing endpointId.".to_string()))
        );

        tx.send(ClientEvent::ConnectionInitiated {
            endpoint_id: "ZX9Q".to_string(),
            endpoint_name: Some("Bob".to_string()),
        })
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::ConnectionInitiated(NearbyEndpoint::new("ZX9Q", Some("Bob".to_string())))
        );
        assert_eq!(
            backend.pending_endpoint().await.map(|p| p.endpoint_id),
            Some("ZX9Q".to_string())
        );

        backend
            .accept_connection(Some(ConnectionDecisionOptions::for_endpoint(" ")))
            .await
            .unwrap();
        assert_eq!(client.calls(), vec!["accept:ZX9Q"]);
        assert!(backend.pending_endpoint().await.is_none());
    }

    #[tokio::test]
    async fn test_reject_failure_keeps_pending() {
        let (client, tx) = ScriptedClient::new();
        let backend = granted_backend(client);
        let mut rx = backend.subscribe();

        tx.send(ClientEvent::ConnectionInitiated {
            endpoint_id: "ZX9Q".to_string(),
            endpoint_name: None,
        })
        .unwrap();
        next_event(&mut rx).await;

        let err = backend.reject_connection(None).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to reject connection.");
        assert!(backend.pending_endpoint().await.is_some());
    }

    #[tokio::test]
    async fn test_connection_result_pushes_advertised_data() {
        let (client, tx) = ScriptedClient::new();
        let backend = granted_backend(client.clone());
        backend.request_permissions().await.unwrap();
        backend
            .start_advertising(AdvertisingOptions::new(json!({ "card": 1 }), "svc"))
            .await
            .unwrap();
        let mut rx = backend.subscribe();

        tx.send(ClientEvent::ConnectionInitiated {
            endpoint_id: "ZX9Q".to_string(),
            endpoint_name: Some("Bob".to_string()),
        })
        .unwrap();
        tx.send(ClientEvent::ConnectionResult {
            endpoint_id: "ZX9Q".to_string(),
            success: true,
        })
        .unwrap();

        next_event(&mut rx).await;
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::status(NearbyStatus::Connected)
        );
        // Name comes from the discovery table only; ZX9Q was never discovered
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::Connected(NearbyEndpoint::new("ZX9Q", None))
        );
        assert!(backend.pending_endpoint().await.is_none());

        timeout(Duration::from_secs(1), async {
            while !client.calls().iter().any(|c| c.starts_with("send:")) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(client.calls().contains(&r#"send:ZX9Q:{"card":1}"#.to_string()));
        assert_eq!(backend.connected_endpoint().await, Some("ZX9Q".to_string()));
    }

    #[tokio::test]
    async fn test_failed_connection_and_disconnect() {
        let (client, tx) = ScriptedClient::new();
        let backend = granted_backend(client);
        let mut rx = backend.subscribe();

        tx.send(ClientEvent::ConnectionResult {
            endpoint_id: "ZX9Q".to_string(),
            success: false,
        })
        .unwrap();
        assert_eq!(next_event(&mut rx).await, NearbyEvent::error("Connection failed."));

        tx.send(ClientEvent::ConnectionResult {
            endpoint_id: "ZX9Q".to_string(),
            success: true,
        })
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::status(NearbyStatus::Connected)
        );
        next_event(&mut rx).await;

        tx.send(ClientEvent::Disconnected {
            endpoint_id: "ZX9Q".to_string(),
        })
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::Disconnected(EndpointRef {
                endpoint_id: "ZX9Q".to_string()
            })
        );
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::status(NearbyStatus::Disconnected)
        );
        assert!(backend.connected_endpoint().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_of_untracked_peer_keeps_status() {
        let (client, tx) = ScriptedClient::new();
        let backend = granted_backend(client);
        backend.stop().await.unwrap();
        let mut rx = backend.subscribe();

        tx.send(ClientEvent::Disconnected {
            endpoint_id: "ZX9Q".to_string(),
        })
        .unwrap();
        tx.send(ClientEvent::EndpointLost {
            endpoint_id: "ZX9Q".to_string(),
        })
        .unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::Disconnected(EndpointRef {
                endpoint_id: "ZX9Q".to_string()
            })
        );
        // No status change between the two events
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::EndpointLost(EndpointRef {
                endpoint_id: "ZX9Q".to_string()
            })
        );
        assert_eq!(backend.status().await, NearbyStatus::Stopped);
    }

    #[tokio::test]
    async fn test_endpoint_table_and_payloads() {
        let (client, tx) = ScriptedClient::new();
        let backend = granted_backend(client);
        let mut rx = backend.subscribe();

        tx.send(ClientEvent::EndpointFound {
            endpoint_id: "ZX9Q".to_string(),
            endpoint_name: Some("Bob".to_string()),
            service_id: "svc".to_string(),
        })
        .unwrap();
        next_event(&mut rx).await;
        assert_eq!(backend.known_endpoints().await.len(), 1);

        tx.send(ClientEvent::PayloadReceived {
            endpoint_id: "ZX9Q".to_string(),
            payload: Payload::Stream,
        })
        .unwrap();
        tx.send(ClientEvent::PayloadReceived {
            endpoint_id: "ZX9Q".to_string(),
            payload: Payload::from_text("hi"),
        })
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::Payload(ReceivedPayload {
                endpoint_id: "ZX9Q".to_string(),
                payload: "hi".to_string(),
            })
        );

        tx.send(ClientEvent::PayloadReceived {
            endpoint_id: "ZX9Q".to_string(),
            payload: Payload::Bytes(b"hi\xff".to_vec()),
        })
        .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            NearbyEvent::Payload(ReceivedPayload {
                endpoint_id: "ZX9Q".to_string(),
                payload: "hi\u{fffd}".to_string(),
            })
        );

        tx.send(ClientEvent::EndpointLost {
            endpoint_id: "ZX9Q".to_string(),
        })
        .unwrap();
        next_event(&mut rx).await;
        assert!(backend.known_endpoints().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_ignores_client_failures() {
        let (client, _tx) = ScriptedClient::new();
        let backend = granted_backend(client.clone());
        let mut rx = backend.subscribe();

        backend.stop().await.unwrap();

        assert_eq!(
            client.calls(),
            vec!["stop_discovery", "stop_advertising", "stop_all_endpoints"]
        );
        assert_eq!(next_event(&mut rx).await, NearbyEvent::status(NearbyStatus::Stopped));
        assert_eq!(backend.status().await, NearbyStatus::Stopped);
    }
}
