// Plugin registration and routing
// Picks the native backend for the running platform, or the fallback when none
// is registered, and routes host calls to it by capability name

use crate::bridge::{self, PluginCall};
use crate::fallback::UnimplementedBackend;
use crate::plugin::{NearbySharePlugin, NEARBY_SHARE_PLUGIN_NAME};
use crate::{NearbyShareError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime a backend is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Android,
    Ios,
    Desktop,
    Web,
}

impl Platform {
    /// Platform this binary was compiled for
    pub fn current() -> Self {
        #[cfg(target_os = "android")]
        {
            Platform::Android
        }

        #[cfg(target_os = "ios")]
        {
            Platform::Ios
        }

        #[cfg(target_arch = "wasm32")]
        {
            Platform::Web
        }

        #[cfg(not(any(target_os = "android", target_os = "ios", target_arch = "wasm32")))]
        {
            Platform::Desktop
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Android => write!(f, "android"),
            Platform::Ios => write!(f, "ios"),
            Platform::Desktop => write!(f, "desktop"),
            Platform::Web => write!(f, "web"),
        }
    }
}

/// Backends registered under one capability name
pub struct PluginRegistration {
    name: &'static str,
    native: HashMap<Platform, Arc<dyn NearbySharePlugin>>,
}

impl PluginRegistration {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            native: HashMap::new(),
        }
    }

    pub fn with_native(mut self, platform: Platform, backend: Arc<dyn NearbySharePlugin>) -> Self {
        debug!("Registering {} backend for {} on {}", backend.backend_name(), self.name, platform);
        self.native.insert(platform, backend);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve for the running platform
    pub fn resolve(self) -> NearbyShare {
        self.resolve_for(Platform::current())
    }

    /// Native backend for `platform`, or the fallback
    pub fn resolve_for(mut self, platform: Platform) -> NearbyShare {
        let backend = match self.native.remove(&platform) {
            Some(backend) => backend,
            None => {
                info!("No native {} backend for {}, using fallback", self.name, platform);
                Arc::new(UnimplementedBackend::new()) as Arc<dyn NearbySharePlugin>
            }
        };
        NearbyShare {
            name: self.name,
            backend,
        }
    }
}

/// Register the nearby share capability under its canonical name
pub fn register_plugin() -> PluginRegistration {
    PluginRegistration::new(NEARBY_SHARE_PLUGIN_NAME)
}

/// Handle to the resolved backend
#[derive(Clone)]
pub struct NearbyShare {
    name: &'static str,
    backend: Arc<dyn NearbySharePlugin>,
}

impl NearbyShare {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn backend(&self) -> &Arc<dyn NearbySharePlugin> {
        &self.backend
    }

    pub async fn call(&self, call: &PluginCall) -> Result<Value> {
        bridge::dispatch(self.backend.as_ref(), call).await
    }
}

impl std::ops::Deref for NearbyShare {
    type Target = dyn NearbySharePlugin;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

/// Routes calls from the host runtime to plugins by capability name
#[derive(Default, Clone)]
pub struct PluginHost {
    plugins: HashMap<&'static str, NearbyShare>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, plugin: NearbyShare) {
        info!("Installed plugin {} ({})", plugin.name(), plugin.backend_name());
        self.plugins.insert(plugin.name(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<&NearbyShare> {
        self.plugins.get(name)
    }

    pub async fn call(&self, plugin_name: &str, call: &PluginCall) -> Result<Value> {
        let plugin = self
            .plugins
            .get(plugin_name)
            .ok_or_else(|| NearbyShareError::MethodNotFound(format!("{}.{}", plugin_name, call.method)))?;
        plugin.call(call).await
    }
}
