//! Error types for xenapi.

use serde_json::Value;
use thiserror::Error;

/// Main error type for xenapi operations.
#[derive(Error, Debug)]
pub enum XenApiError {
    /// Connection URI was unparsable or used an unknown scheme.
    #[error("invalid connection target: {0}")]
    Configuration(String),

    /// Requested transport exists but is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The session is invalid and there is no login to replay.
    #[error("you must log in")]
    AuthenticationRequired,

    /// Response from the server did not follow the Status/Value format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Well-formed failure reported by the server.
    #[error(transparent)]
    Failure(#[from] Failure),

    /// The session kept being invalidated on every attempt.
    #[error("tried {attempts} times to get a valid session, but failed")]
    RetryBudgetExhausted { attempts: u32 },

    /// The server answered SESSION_INVALID to a login call.
    #[error("received SESSION_INVALID when logging in")]
    SessionInvalidOnLogin,

    /// Method name is not of the form `class.method`.
    #[error("invalid method name: {0}")]
    InvalidMethod(String),

    /// Transport-level fault reported by the transport itself.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

impl XenApiError {
    /// Whether this error belongs to the transport-level fault family,
    /// as opposed to a configuration error or a server-side `Failure`.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired
                | Self::Protocol(_)
                | Self::RetryBudgetExhausted { .. }
                | Self::SessionInvalidOnLogin
                | Self::Transport(_)
                | Self::Http(_)
        )
    }

    /// Fault code for the faults synthesised by the client.
    pub fn fault_code(&self) -> Option<i32> {
        match self {
            Self::AuthenticationRequired => Some(401),
            Self::RetryBudgetExhausted { .. } | Self::SessionInvalidOnLogin => Some(500),
            _ => None,
        }
    }

    /// The server-side failure, if this is one.
    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Convenience Result type for xenapi operations.
pub type Result<T> = std::result::Result<T, XenApiError>;

/// Application-level failure returned by the server.
///
/// Built from an `ErrorDescription` list: the first element is the
/// machine-readable error code, the rest are details.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error_type}: {}", render_details(.error_details))]
pub struct Failure {
    /// Error code, e.g. `HANDLE_INVALID`.
    pub error_type: String,
    /// Remaining description elements.
    pub error_details: Vec<String>,
}

impl Failure {
    /// Create a failure from a code and its details.
    pub fn new(error_type: impl Into<String>, error_details: Vec<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_details,
        }
    }

    /// Build a failure from the elements of an `ErrorDescription` list.
    ///
    /// Non-string elements are kept as their JSON text.
    pub fn from_description(description: &[Value]) -> Self {
        let mut parts = description.iter().map(value_text);
        let error_type = parts.next().unwrap_or_default();
        Self {
            error_type,
            error_details: parts.collect(),
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_details(details: &[String]) -> String {
    match details {
        [] => String::new(),
        [single] => single.clone(),
        many => format!("{:?}", many),
    }
}
