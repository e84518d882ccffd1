//! Engine error types.
//!
//! `WatchError` covers everything a [`crate::WatchSource`] can report,
//! `HandlerError` covers notification backends, and `EngineError` is what
//! ends a reconciliation loop.

use thiserror::Error;

/// Errors reported by a watch source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// The API server could not be reached or answered with a server error.
    #[error("API server unavailable: {0}")]
    ApiUnavailable(String),

    /// Credentials were rejected (HTTP 401/403).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested resource version was compacted away (HTTP 410).
    #[error("Watch expired: {0}")]
    WatchExpired(String),

    /// A payload could not be decoded into the expected kind.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl WatchError {
    /// Short label used for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            WatchError::ApiUnavailable(_) => "api_unavailable",
            WatchError::Unauthorized(_) => "unauthorized",
            WatchError::WatchExpired(_) => "watch_expired",
            WatchError::Decode(_) => "decode",
        }
    }

    /// Map a kube client error onto the watch taxonomy.
    #[must_use]
    pub fn from_kube(err: &kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Self::from_status_code(resp.code, &resp.message),
            kube::Error::SerdeError(e) => WatchError::Decode(e.to_string()),
            other => WatchError::ApiUnavailable(other.to_string()),
        }
    }

    /// Map an HTTP status code reported by the API server.
    #[must_use]
    pub fn from_status_code(code: u16, message: &str) -> Self {
        match code {
            401 | 403 => WatchError::Unauthorized(message.to_string()),
            410 => WatchError::WatchExpired(message.to_string()),
            _ => WatchError::ApiUnavailable(format!("{code}: {message}")),
        }
    }
}

/// Errors returned by a notification backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The notification could not be delivered (transport failure).
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The backend answered but refused the notification.
    #[error("Notification rejected: {0}")]
    Rejected(String),

    /// The handler panicked while processing the notification.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Delivery was abandoned because the loop is shutting down.
    #[error("Delivery cancelled")]
    Cancelled,
}

/// Errors that terminate a reconciliation loop or prevent engine startup.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Credentials were rejected by the API server.
    #[error("Unauthorized watching {kind}: {message}")]
    Unauthorized {
        /// Resource kind whose loop gave up.
        kind: crate::ResourceKind,
        /// Server message.
        message: String,
    },

    /// Metrics registration failed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert!(matches!(WatchError::from_status_code(401, "no"), WatchError::Unauthorized(_)));
        assert!(matches!(WatchError::from_status_code(403, "no"), WatchError::Unauthorized(_)));
        assert!(matches!(WatchError::from_status_code(410, "too old"), WatchError::WatchExpired(_)));
        assert!(matches!(WatchError::from_status_code(500, "boom"), WatchError::ApiUnavailable(_)));
        assert!(matches!(WatchError::from_status_code(503, "busy"), WatchError::ApiUnavailable(_)));
    }

    #[test]
    fn test_labels() {
        assert_eq!(WatchError::WatchExpired(String::new()).label(), "watch_expired");
        assert_eq!(WatchError::ApiUnavailable(String::new()).label(), "api_unavailable");
    }
}
