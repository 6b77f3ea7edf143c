// JSON call bridge
// Decodes host-runtime calls (method name + JSON options) into typed plugin calls

use crate::plugin::NearbySharePlugin;
use crate::error::ErrorContext;
use crate::{NearbyShareError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

/// Methods callable through the bridge, by their JS names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginMethod {
    IsSupported,
    RequestPermissions,
    StartAdvertising,
    StartDiscovery,
    RequestConnection,
    SendPayload,
    AcceptConnection,
    RejectConnection,
    Stop,
}

impl PluginMethod {
    pub const ALL: [PluginMethod; 9] = [
        PluginMethod::IsSupported,
        PluginMethod::RequestPermissions,
        PluginMethod::StartAdvertising,
        PluginMethod::StartDiscovery,
        PluginMethod::RequestConnection,
        PluginMethod::SendPayload,
        PluginMethod::AcceptConnection,
        PluginMethod::RejectConnection,
        PluginMethod::Stop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginMethod::IsSupported => "isSupported",
            PluginMethod::RequestPermissions => "requestPermissions",
            PluginMethod::StartAdvertising => "startAdvertising",
            PluginMethod::StartDiscovery => "startDiscovery",
            PluginMethod::RequestConnection => "requestConnection",
            PluginMethod::SendPayload => "sendPayload",
            PluginMethod::AcceptConnection => "acceptConnection",
            PluginMethod::RejectConnection => "rejectConnection",
            PluginMethod::Stop => "stop",
        }
    }
}

impl std::fmt::Display for PluginMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginMethod {
    type Err = NearbyShareError;

    fn from_str(s: &str) -> Result<Self> {
        PluginMethod::ALL
            .iter()
            .copied()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| NearbyShareError::MethodNotFound(s.to_string()))
    }
}

/// A call as the host runtime delivers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginCall {
    pub method: String,
    #[serde(default)]
    pub options: Value,
}

impl PluginCall {
    pub fn new(method: impl Into<String>, options: Value) -> Self {
        Self {
            method: method.into(),
            options,
        }
    }
}

/// Decode options for a backend that inspects them; `null` means "not given"
fn decode<T>(plugin: &dyn NearbySharePlugin, options: &Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !plugin.inspects_input() || options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone())
        .map_err(|e| NearbyShareError::InvalidInput(format!("Invalid options: {}", e)))
}

/// Route a call to the plugin and encode its result
///
/// `isSupported` resolves to `{ "supported": bool }`; every other method
/// resolves to `null`.
pub async fn dispatch(plugin: &dyn NearbySharePlugin, call: &PluginCall) -> Result<Value> {
    let result = match PluginMethod::from_str(&call.method) {
        Ok(method) => route(plugin, method, &call.options).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        e.log_with_context(&call_context(plugin, call));
    }
    result
}

fn call_context(plugin: &dyn NearbySharePlugin, call: &PluginCall) -> ErrorContext {
    let mut context = ErrorContext::new()
        .with_method(call.method.as_str())
        .with_backend(plugin.backend_name());
    if let Some(endpoint_id) = call.options.get("endpointId").and_then(Value::as_str) {
        context = context.with_endpoint_id(endpoint_id);
    }
    if let Some(service_id) = call.options.get("serviceId").and_then(Value::as_str) {
        context = context.with_service_id(service_id);
    }
    context
}

async fn route(plugin: &dyn NearbySharePlugin, method: PluginMethod, options: &Value) -> Result<Value> {
    debug!("Dispatching {} to {} backend", method, plugin.backend_name());

    match method {
        PluginMethod::IsSupported => {
            let result = plugin.is_supported().await?;
            Ok(serde_json::to_value(result)?)
        }
        PluginMethod::RequestPermissions => plugin.request_permissions().await.map(|_| Value::Null),
        PluginMethod::StartAdvertising => plugin
            .start_advertising(decode(plugin, options)?)
            .await
            .map(|_| Value::Null),
        PluginMethod::StartDiscovery => plugin
            .start_discovery(decode(plugin, options)?)
            .await
            .map(|_| Value::Null),
        PluginMethod::RequestConnection => plugin
            .request_connection(decode(plugin, options)?)
            .await
            .map(|_| Value::Null),
        PluginMethod::SendPayload => plugin
            .send_payload(decode(plugin, options)?)
            .await
            .map(|_| Value::Null),
        PluginMethod::AcceptConnection => {
            let decision = decode::<Option<_>>(plugin, options)?;
            plugin.accept_connection(decision).await.map(|_| Value::Null)
        }
        PluginMethod::RejectConnection => {
            let decision = decode::<Option<_>>(plugin, options)?;
            plugin.reject_connection(decision).await.map(|_| Value::Null)
        }
        PluginMethod::Stop => plugin.stop().await.map(|_| Value::Null),
    }
}
