//! Nearby share plugin
//!
//! A typed contract for proximity-based peer discovery and data exchange,
//! with a native backend that drives a platform connections client and a
//! fallback that rejects every call on runtimes without one.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod fallback;
pub mod loopback;
pub mod native;
pub mod permissions;
pub mod platform;
pub mod plugin;
pub mod registry;
pub mod types;

pub use bridge::{dispatch, PluginCall, PluginMethod};
pub use config::NearbyConfig;
pub use error::{ErrorCategory, ErrorContext, NearbyShareError, Result};
pub use events::{EventHub, EventKind, ListenerHandle, NearbyEvent};
pub use fallback::UnimplementedBackend;
pub use loopback::{LoopbackClient, LoopbackMedium};
pub use native::NativeBackend;
pub use permissions::{PermissionManager, PermissionPrompt, PermissionStatus};
pub use platform::{Availability, ClientError, ClientEvent, ConnectionsClient, Payload};
pub use plugin::{NearbySharePlugin, NEARBY_SHARE_PLUGIN_NAME};
pub use registry::{register_plugin, NearbyShare, Platform, PluginHost, PluginRegistration};
pub use types::*;
