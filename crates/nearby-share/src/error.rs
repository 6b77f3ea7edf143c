use thiserror::Error;
use tracing::error;

/// Message the fallback backend rejects every call with
pub const UNIMPLEMENTED_MESSAGE: &str = "Not implemented on web.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NearbyShareError {
    #[error("{0}")]
    Unimplemented(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    AdvertisingFailed(String),

    #[error("{0}")]
    DiscoveryFailed(String),

    #[error("{0}")]
    ConnectionFailed(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for NearbyShareError {
    fn from(err: serde_json::Error) -> Self {
        NearbyShareError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NearbyShareError>;

/// Context for error logging
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub method: Option<String>,
    pub endpoint_id: Option<String>,
    pub service_id: Option<String>,
    pub backend: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_endpoint_id(mut self, endpoint_id: impl Into<String>) -> Self {
        self.endpoint_id = Some(endpoint_id.into());
        self
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }
}

impl NearbyShareError {
    pub fn unimplemented() -> Self {
        NearbyShareError::Unimplemented(UNIMPLEMENTED_MESSAGE.to_string())
    }

    /// Log error with structured context
    pub fn log_with_context(&self, context: &ErrorContext) {
        error!(
            error = %self,
            code = self.code(),
            category = %self.category(),
            method = ?context.method,
            endpoint_id = ?context.endpoint_id,
            service_id = ?context.service_id,
            backend = ?context.backend,
            timestamp = %chrono::Utc::now(),
            "Nearby share call rejected"
        );
    }

    /// Stable code surfaced to the host runtime alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            NearbyShareError::Unimplemented(_) => "UNIMPLEMENTED",
            NearbyShareError::PermissionDenied(_) => "PERMISSION_DENIED",
            NearbyShareError::InvalidInput(_) => "INVALID_INPUT",
            NearbyShareError::AdvertisingFailed(_) => "ADVERTISING_FAILED",
            NearbyShareError::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            NearbyShareError::ConnectionFailed(_) => "CONNECTION_FAILED",
            NearbyShareError::MethodNotFound(_) => "METHOD_NOT_FOUND",
            NearbyShareError::SerializationError(_) => "SERIALIZATION_ERROR",
            NearbyShareError::Backend(_) => "BACKEND_ERROR",
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            NearbyShareError::Unimplemented(_) => ErrorCategory::Unsupported,
            NearbyShareError::MethodNotFound(_) => ErrorCategory::Unsupported,
            NearbyShareError::PermissionDenied(_) => ErrorCategory::Permission,
            NearbyShareError::InvalidInput(_) => ErrorCategory::Validation,
            NearbyShareError::SerializationError(_) => ErrorCategory::Validation,
            NearbyShareError::AdvertisingFailed(_) => ErrorCategory::Backend,
            NearbyShareError::DiscoveryFailed(_) => ErrorCategory::Backend,
            NearbyShareError::ConnectionFailed(_) => ErrorCategory::Backend,
            NearbyShareError::Backend(_) => ErrorCategory::Backend,
        }
    }

    pub fn is_unimplemented(&self) -> bool {
        matches!(self, NearbyShareError::Unimplemented(_))
    }
}

/// Error categories for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Unsupported,
    Permission,
    Validation,
    Backend,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Unsupported => write!(f, "unsupported"),
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Backend => write!(f, "backend"),
        }
    }
}
