mod logging;

use anyhow::{bail, Result};
use nearby_share::{
    register_plugin, ConnectionRequestOptions, DiscoveryOptions, EventKind, LoopbackMedium,
    NativeBackend, NearbyConfig, NearbyEvent, NearbySharePlugin, PermissionManager, Platform,
    PluginCall, PluginHost, SendPayloadOptions, NEARBY_SHARE_PLUGIN_NAME,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for the first event matching `pred`
async fn wait_for<F>(rx: &mut broadcast::Receiver<NearbyEvent>, what: &str, pred: F) -> Result<NearbyEvent>
where
    F: Fn(&NearbyEvent) -> bool,
{
    let found = timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match found {
        Ok(Some(event)) => Ok(event),
        Ok(None) => bail!("event stream closed while waiting for {}", what),
        Err(_) => bail!("timed out waiting for {}", what),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    tracing::info!("Starting nearby share demo");

    let config = NearbyConfig::from_env()?;
    tracing::info!(
        "Configuration loaded (service id {}, strategy {})",
        config.default_service_id,
        config.strategy
    );

    // Runtimes without a native backend get the fallback
    let web = register_plugin().resolve_for(Platform::Web);
    let supported = web.call(&PluginCall::new("isSupported", json!(null))).await?;
    tracing::info!("Fallback isSupported -> {}", supported);
    if let Err(e) = web.call(&PluginCall::new("startDiscovery", json!({}))).await {
        tracing::info!("Fallback startDiscovery -> {} ({})", e, e.code());
    }

    let medium = LoopbackMedium::new();
    let alice = Arc::new(NativeBackend::new(
        Arc::new(medium.join().await),
        PermissionManager::default(),
        config.clone(),
    )?);
    let bob = Arc::new(NativeBackend::new(
        Arc::new(medium.join().await),
        PermissionManager::default(),
        config.clone(),
    )?);

    // Alice is driven through the bridge, the way a host runtime would
    let mut host = PluginHost::new();
    host.install(register_plugin().with_native(Platform::current(), alice.clone()).resolve());

    for kind in EventKind::ALL {
        bob.add_listener(
            kind.as_str(),
            Box::new(|event: NearbyEvent| {
                tracing::info!("[bob] {} {}", event.name(), event.data());
            }),
        )?;
    }
    alice.add_listener(
        EventKind::Payload.as_str(),
        Box::new(|event: NearbyEvent| {
            tracing::info!("[alice] received {}", event.data());
        }),
    )?;

    let mut alice_events = alice.subscribe();
    let mut bob_events = bob.subscribe();

    host.call(NEARBY_SHARE_PLUGIN_NAME, &PluginCall::new("requestPermissions", json!({})))
        .await?;
    bob.request_permissions().await?;

    host.call(
        NEARBY_SHARE_PLUGIN_NAME,
        &PluginCall::new(
            "startAdvertising",
            json!({
                "data": { "name": "Alice", "title": "Engineer" },
                "endpointName": "Alice",
            }),
        ),
    )
    .await?;
    bob.start_discovery(DiscoveryOptions::default()).await?;

    let found = wait_for(&mut bob_events, "endpoint found", |e| {
        matches!(e, NearbyEvent::EndpointFound(_))
    })
    .await?;
    let NearbyEvent::EndpointFound(endpoint) = found else {
        bail!("unexpected event while waiting for an endpoint");
    };
    let alice_id = endpoint.endpoint_id;

    bob.request_connection(ConnectionRequestOptions::new(alice_id.clone()).with_local_name("Bob"))
        .await?;

    wait_for(&mut alice_events, "incoming connection", |e| {
        matches!(e, NearbyEvent::ConnectionInitiated(_))
    })
    .await?;
    wait_for(&mut bob_events, "outgoing connection", |e| {
        matches!(e, NearbyEvent::ConnectionInitiated(_))
    })
    .await?;

    host.call(NEARBY_SHARE_PLUGIN_NAME, &PluginCall::new("acceptConnection", json!(null)))
        .await?;
    bob.accept_connection(None).await?;

    wait_for(&mut bob_events, "advertised data", |e| matches!(e, NearbyEvent::Payload(_))).await?;

    bob.send_payload(SendPayloadOptions::new(
        alice_id,
        json!({ "name": "Bob", "title": "Designer" }).to_string(),
    ))
    .await?;
    wait_for(&mut alice_events, "reply", |e| matches!(e, NearbyEvent::Payload(_))).await?;

    host.call(NEARBY_SHARE_PLUGIN_NAME, &PluginCall::new("stop", json!(null)))
        .await?;
    wait_for(&mut bob_events, "disconnect", |e| matches!(e, NearbyEvent::Disconnected(_))).await?;
    bob.stop().await?;

    alice.remove_all_listeners();
    bob.remove_all_listeners();

    tracing::info!("Demo finished");
    Ok(())
}
