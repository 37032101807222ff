use std::fmt;
use thiserror::Error;

/// Boxed error as returned by [`Transport`](crate::transport::Transport) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Transport-layer failure categories recognised by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    BadUrl,
    UnsupportedUrl,
    TimedOut,
    CannotConnect,
    ConnectionLost,
    BadServerResponse,
    Cancelled,
}

impl TransportErrorKind {
    /// Stable numeric code, reported in diagnostics.
    pub fn code(&self) -> i32 {
        match self {
            TransportErrorKind::BadUrl => 1,
            TransportErrorKind::UnsupportedUrl => 2,
            TransportErrorKind::TimedOut => 3,
            TransportErrorKind::CannotConnect => 4,
            TransportErrorKind::ConnectionLost => 5,
            TransportErrorKind::BadServerResponse => 6,
            TransportErrorKind::Cancelled => 7,
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::BadUrl => "bad URL",
            TransportErrorKind::UnsupportedUrl => "unsupported URL",
            TransportErrorKind::TimedOut => "timed out",
            TransportErrorKind::CannotConnect => "cannot connect to host",
            TransportErrorKind::ConnectionLost => "network connection lost",
            TransportErrorKind::BadServerResponse => "bad server response",
            TransportErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind} (code {}): {message}", .kind.code())]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// Two transport errors are the same failure when their kinds match; the message is diagnostic only.
impl PartialEq for TransportError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for TransportError {}

/// Failures surfaced by [`NetworkCacheManager`](crate::manager::NetworkCacheManager).
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No cached data available")]
    NoCachedData,

    #[error("Received invalid response with status code: {status_code}")]
    InvalidResponse { status_code: i32 },

    #[error("Network error: {0}")]
    NetworkError(#[source] TransportError),

    #[error("Failed with unknown error: {0}")]
    UnknownError(#[source] BoxError),

    #[error("Unable to create image from data")]
    InvalidImageData,
}

impl CacheError {
    /// Status code for `InvalidResponse`, a fixed code for every other kind.
    ///
    /// `NoCachedData` and `InvalidImageData` both report 2; callers matching on codes
    /// rely on that pairing, so match on the variant to tell them apart.
    pub fn error_code(&self) -> i32 {
        match self {
            CacheError::InvalidResponse { status_code } => *status_code,
            CacheError::NetworkError(_) => 1,
            CacheError::NoCachedData => 2,
            CacheError::InvalidImageData => 2,
            CacheError::UnknownError(_) => -1,
        }
    }

    pub(crate) fn unclassified_response() -> Self {
        CacheError::InvalidResponse { status_code: -1 }
    }

    /// Sorts a transport failure into the taxonomy.
    pub(crate) fn from_transport_failure(error: BoxError) -> Self {
        let error = match error.downcast::<TransportError>() {
            Ok(transport) => return CacheError::NetworkError(*transport),
            Err(other) => other,
        };
        match error.downcast::<CacheError>() {
            Ok(cache) => *cache,
            Err(other) => CacheError::UnknownError(other),
        }
    }
}

impl PartialEq for CacheError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheError::NoCachedData, CacheError::NoCachedData) => true,
            (
                CacheError::InvalidResponse { status_code: lhs },
                CacheError::InvalidResponse { status_code: rhs },
            ) => lhs == rhs,
            (CacheError::NetworkError(lhs), CacheError::NetworkError(rhs)) => lhs == rhs,
            (CacheError::UnknownError(lhs), CacheError::UnknownError(rhs)) => {
                lhs.to_string() == rhs.to_string()
            }
            (CacheError::InvalidImageData, CacheError::InvalidImageData) => true,
            _ => false,
        }
    }
}

/// Failures opening the persisted byte store or TTL ledger.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Acceptable response range {min}..={max} is empty")]
    EmptyResponseRange { min: u16, max: u16 },

    #[error("Could not determine a cache directory for this platform")]
    NoHomeDirectory,
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CacheError::InvalidResponse { status_code: 400 }.error_code(), 400);
        assert_eq!(CacheError::unclassified_response().error_code(), -1);
        assert_eq!(
            CacheError::NetworkError(TransportError::new(TransportErrorKind::TimedOut, "slow"))
                .error_code(),
            1
        );
        assert_eq!(CacheError::NoCachedData.error_code(), 2);
        assert_eq!(CacheError::InvalidImageData.error_code(), 2);
        assert_eq!(CacheError::UnknownError("boom".into()).error_code(), -1);
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(
            CacheError::InvalidResponse { status_code: 404 },
            CacheError::InvalidResponse { status_code: 404 }
        );
        assert_ne!(
            CacheError::InvalidResponse { status_code: 404 },
            CacheError::InvalidResponse { status_code: 500 }
        );
        assert_eq!(
            CacheError::NetworkError(TransportError::new(TransportErrorKind::CannotConnect, "a")),
            CacheError::NetworkError(TransportError::new(TransportErrorKind::CannotConnect, "b"))
        );
        assert_ne!(
            CacheError::NetworkError(TransportError::new(TransportErrorKind::CannotConnect, "a")),
            CacheError::NetworkError(TransportError::new(TransportErrorKind::TimedOut, "a"))
        );
        assert_ne!(CacheError::NoCachedData, CacheError::InvalidImageData);
    }

    #[test]
    fn test_transport_failure_translation() {
        let network: BoxError =
            Box::new(TransportError::new(TransportErrorKind::ConnectionLost, "reset"));
        assert_eq!(
            CacheError::from_transport_failure(network),
            CacheError::NetworkError(TransportError::new(TransportErrorKind::ConnectionLost, ""))
        );

        let passthrough: BoxError = Box::new(CacheError::InvalidResponse { status_code: 503 });
        assert_eq!(
            CacheError::from_transport_failure(passthrough),
            CacheError::InvalidResponse { status_code: 503 }
        );

        let other: BoxError = Box::new(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        match CacheError::from_transport_failure(other) {
            CacheError::UnknownError(e) => assert_eq!(e.to_string(), "disk"),
            e => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::InvalidResponse { status_code: 418 };
        assert!(err.to_string().contains("418"));

        let err = CacheError::NetworkError(TransportError::new(TransportErrorKind::TimedOut, "30s"));
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("30s"));
    }
}
