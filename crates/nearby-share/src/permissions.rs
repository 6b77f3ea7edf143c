// Permission handling for nearby sharing
// Caches the status of the platform permission group and gates operations on it

use crate::{NearbyShareError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Platform permissions nearby sharing needs, requested as one group
pub const NEARBY_PERMISSIONS: &[&str] = &[
    "android.permission.BLUETOOTH",
    "android.permission.BLUETOOTH_ADMIN",
    "android.permission.BLUETOOTH_SCAN",
    "android.permission.BLUETOOTH_CONNECT",
    "android.permission.BLUETOOTH_ADVERTISE",
    "android.permission.ACCESS_COARSE_LOCATION",
    "android.permission.ACCESS_FINE_LOCATION",
    "android.permission.NEARBY_WIFI_DEVICES",
];

pub const PERMISSIONS_NOT_GRANTED: &str = "Permissions not granted.";
pub const PERMISSIONS_DENIED: &str =
    "Permissions denied. Location and Bluetooth permissions are required for Nearby Share.";

/// Permission status for the nearby permission group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Permission has been granted
    Granted,
    /// Permission has been denied by the user
    Denied,
    /// Permission has not been requested yet
    NotRequested,
    /// Permission is not applicable on this platform
    NotApplicable,
}

/// Shows the platform permission dialog
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn request(&self, permissions: &[&str]) -> PermissionStatus;
}

/// Prompt for the current platform
///
/// Desktop platforms need no explicit grant. Mobile hosts supply their own
/// prompt bridged to the OS dialog.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPermissionPrompt;

#[async_trait]
impl PermissionPrompt for SystemPermissionPrompt {
    #[cfg(target_arch = "wasm32")]
    async fn request(&self, _permissions: &[&str]) -> PermissionStatus {
        debug!("Web platform: nearby permissions not applicable");
        PermissionStatus::NotApplicable
    }

    #[cfg(any(target_os = "ios", target_os = "android"))]
    async fn request(&self, permissions: &[&str]) -> PermissionStatus {
        warn!(
            "No host permission prompt registered, treating {} permission(s) as denied",
            permissions.len()
        );
        PermissionStatus::Denied
    }

    #[cfg(not(any(target_arch = "wasm32", target_os = "ios", target_os = "android")))]
    async fn request(&self, _permissions: &[&str]) -> PermissionStatus {
        debug!("Desktop platform: nearby permissions not required");
        PermissionStatus::Granted
    }
}

/// Prompt that always answers with the same status
#[derive(Debug, Clone, Copy)]
pub struct FixedPermissionPrompt(pub PermissionStatus);

#[async_trait]
impl PermissionPrompt for FixedPermissionPrompt {
    async fn request(&self, _permissions: &[&str]) -> PermissionStatus {
        self.0
    }
}

/// Manages the nearby permission group
pub struct PermissionManager {
    status: Arc<RwLock<PermissionStatus>>,
    prompt: Arc<dyn PermissionPrompt>,
}

impl PermissionManager {
    pub fn new(prompt: Arc<dyn PermissionPrompt>) -> Self {
        Self {
            status: Arc::new(RwLock::new(PermissionStatus::NotRequested)),
            prompt,
        }
    }

    /// Current cached status
    pub async fn check_permission(&self) -> PermissionStatus {
        *self.status.read().await
    }

    /// Show the prompt unless the group is already granted
    pub async fn request_permission(&self) -> PermissionStatus {
        let current = *self.status.read().await;
        if current == PermissionStatus::Granted {
            debug!("Nearby permissions already granted");
            return current;
        }

        info!("Requesting nearby permissions (current: {:?})", current);
        let status = self.prompt.request(NEARBY_PERMISSIONS).await;
        *self.status.write().await = status;

        info!("Nearby permission status: {:?}", status);
        status
    }

    /// Verify that permission is granted before touching the radio
    pub async fn verify_permission(&self) -> Result<()> {
        match self.check_permission().await {
            PermissionStatus::Granted => Ok(()),
            status => {
                warn!("Nearby permissions not granted: {:?}", status);
                Err(NearbyShareError::PermissionDenied(
                    PERMISSIONS_NOT_GRANTED.to_string(),
                ))
            }
        }
    }

    /// Get a link to device settings for permission management
    pub fn get_settings_link(&self) -> String {
        #[cfg(target_os = "ios")]
        {
            "app-settings:".to_string()
        }

        #[cfg(target_os = "android")]
        {
            "android.settings.APPLICATION_DETAILS_SETTINGS".to_string()
        }

        #[cfg(target_arch = "wasm32")]
        {
            "Browser settings".to_string()
        }

        #[cfg(not(any(target_os = "ios", target_os = "android", target_arch = "wasm32")))]
        {
            "System settings".to_string()
        }
    }

    /// Manually set permission status, e.g. after the host observed an OS change
    pub async fn set_permission(&self, status: PermissionStatus) {
        *self.status.write().await = status;
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemPermissionPrompt))
    }
}
