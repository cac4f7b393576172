use thiserror::Error;

/// Status-like code reported for requests rejected before any round trip.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Status-like code reported for every backend-side failure.
pub const STATUS_INTERNAL: u16 = 500;

/// Structured failure surfaced by the gateway.
///
/// Every variant raised after a backend round trip carries the action
/// signature, the number of attempts made and the last underlying message,
/// so the calling layer can log or alert without re-deriving context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Invalid request for '{signature}': {message}")]
    InvalidRequest { signature: String, message: String },

    #[error("Serialization error for '{signature}': {message}")]
    Serialization { signature: String, message: String },

    /// An error-marked row came back in the cursor. Never retried.
    #[error("Database operation failed: {message}")]
    Embedded {
        signature: String,
        attempts: u32,
        message: String,
    },

    /// A non-transient backend fault (bad procedure, permission, etc).
    #[error("Database operation failed: {message}")]
    Backend {
        signature: String,
        attempts: u32,
        message: String,
    },

    #[error("Database operation failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        signature: String,
        attempts: u32,
        last_error: String,
    },

    /// The backoff wait was cancelled. Not counted as an attempt.
    #[error("Query interrupted after {attempts} attempts: {last_error}")]
    Interrupted {
        signature: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Numeric status-like code for the request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => STATUS_BAD_REQUEST,
            _ => STATUS_INTERNAL,
        }
    }

    /// Action signature the failure belongs to, when one was resolved.
    pub fn signature(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest { signature, .. }
            | Self::Serialization { signature, .. }
            | Self::Embedded { signature, .. }
            | Self::Backend { signature, .. }
            | Self::RetriesExhausted { signature, .. }
            | Self::Interrupted { signature, .. } => Some(signature),
            Self::Config(_) => None,
        }
    }

    /// Backend attempts made before the failure was raised.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Embedded { attempts, .. }
            | Self::Backend { attempts, .. }
            | Self::RetriesExhausted { attempts, .. }
            | Self::Interrupted { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Last underlying message, without the variant prefix.
    pub fn underlying_message(&self) -> &str {
        match self {
            Self::Config(message) => message,
            Self::InvalidRequest { message, .. }
            | Self::Serialization { message, .. }
            | Self::Embedded { message, .. }
            | Self::Backend { message, .. } => message,
            Self::RetriesExhausted { last_error, .. } | Self::Interrupted { last_error, .. } => {
                last_error
            }
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}
