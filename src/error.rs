//! Error types for resilience policies and HTTP clients
use crate::codec::{DecodeError, EncodeError};
use crate::transport::TransportError;
use http::StatusCode;
use std::fmt;
use std::time::Duration;

/// Outcome of a policy-guarded operation that did not produce a value.
///
/// `CircuitOpen` and `Cancelled` are produced by the policies themselves and are always
/// terminal; `Inner` carries the operation's own error.
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// The circuit breaker rejected the call before it reached the operation.
    CircuitOpen { endpoint: String, failure_count: usize, open_for: Duration },
    /// The caller's cancellation token fired.
    Cancelled,
    /// The underlying operation failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { endpoint, failure_count, open_for } => write!(
                f,
                "circuit breaker '{}' open ({} failures, open for {:?})",
                endpoint, failure_count, open_for
            ),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is due to circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Why a retryable call ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum TransientFailure {
    #[error("network error: {0}")]
    Network(#[source] TransportError),
    #[error("upstream responded with status {0}")]
    Status(StatusCode),
}

/// The single terminal error a client call surfaces.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network failure or 5xx/408/429 that survived every retry.
    #[error("transient transport failure: {0}")]
    TransientTransportFailure(#[source] TransientFailure),
    /// Any other 4xx. Never retried.
    #[error("request rejected with status {status}")]
    PermanentClientError { status: StatusCode },
    #[error("circuit breaker '{endpoint}' is open ({failure_count} failures, open for {open_for:?})")]
    CircuitOpen { endpoint: String, failure_count: usize, open_for: Duration },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientTransportFailure(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// HTTP status behind the error, when the upstream answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::PermanentClientError { status } => Some(*status),
            Self::TransientTransportFailure(TransientFailure::Status(status)) => Some(*status),
            _ => None,
        }
    }
}

impl From<ResilienceError<TransportError>> for ClientError {
    fn from(err: ResilienceError<TransportError>) -> Self {
        match err {
            ResilienceError::CircuitOpen { endpoint, failure_count, open_for } => {
                ClientError::CircuitOpen { endpoint, failure_count, open_for }
            }
            ResilienceError::Cancelled | ResilienceError::Inner(TransportError::Cancelled) => {
                ClientError::Cancelled
            }
            ResilienceError::Inner(e) => {
                ClientError::TransientTransportFailure(TransientFailure::Network(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);
    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for DummyError {}

    #[test]
    fn circuit_open_error_display() {
        let err: ResilienceError<DummyError> = ResilienceError::CircuitOpen {
            endpoint: "crm".into(),
            failure_count: 10,
            open_for: Duration::from_secs(30),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("circuit breaker 'crm'"));
        assert!(msg.contains("10"));
        assert!(err.is_circuit_open());
        assert!(err.source().is_none());
    }

    #[test]
    fn inner_exposes_source() {
        let err = ResilienceError::Inner(DummyError("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(err.source().is_some());
        assert_eq!(err.as_inner(), Some(&DummyError("boom")));
        assert_eq!(err.into_inner(), Some(DummyError("boom")));
    }

    #[test]
    fn policy_errors_map_onto_client_errors() {
        let open: ClientError = ResilienceError::<TransportError>::CircuitOpen {
            endpoint: "crm".into(),
            failure_count: 3,
            open_for: Duration::from_millis(5),
        }
        .into();
        assert!(open.is_circuit_open());

        let cancelled: ClientError = ResilienceError::<TransportError>::Cancelled.into();
        assert!(matches!(cancelled, ClientError::Cancelled));

        let transport_cancel: ClientError =
            ResilienceError::Inner(TransportError::Cancelled).into();
        assert!(matches!(transport_cancel, ClientError::Cancelled));

        let network: ClientError =
            ResilienceError::Inner(TransportError::Connect("refused".into())).into();
        assert!(network.is_transient());
        assert!(network.status().is_none());
        assert!(network.to_string().contains("refused"));
    }

    #[test]
    fn status_accessor_covers_http_failures() {
        let permanent = ClientError::PermanentClientError { status: StatusCode::NOT_FOUND };
        assert_eq!(permanent.status(), Some(StatusCode::NOT_FOUND));
        let transient = ClientError::TransientTransportFailure(TransientFailure::Status(
            StatusCode::SERVICE_UNAVAILABLE,
        ));
        assert_eq!(transient.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert!(transient.to_string().contains("503"));
    }
}
