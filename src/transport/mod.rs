//! Transport boundary for the RPC client.
//!
//! The resilience core never looks inside payloads. It hands an opaque
//! [`TransportRequest`] to a [`Transport`] and interprets failures only
//! through their status or OS error codes.

mod http;

pub use self::http::HttpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Transport-level status codes.
///
/// Numeric values follow the canonical RPC status code table so that codes
/// received as integers (trailers, headers) map onto the same variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Not an error.
    Ok,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// Unknown error.
    Unknown,
    /// The client supplied an invalid argument.
    InvalidArgument,
    /// The deadline expired before the operation completed.
    DeadlineExceeded,
    /// Requested entity was not found.
    NotFound,
    /// Entity the client tried to create already exists.
    AlreadyExists,
    /// Caller lacks permission.
    PermissionDenied,
    /// A resource (quota, rate) has been exhausted.
    ResourceExhausted,
    /// System is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted, typically by a concurrency conflict.
    Aborted,
    /// Operation attempted past the valid range.
    OutOfRange,
    /// Operation is not implemented by the server.
    Unimplemented,
    /// Internal server error.
    Internal,
    /// Service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
    /// Caller is not authenticated.
    Unauthenticated,
    /// A code outside the known table.
    Other(i32),
}

impl StatusCode {
    /// Creates a status code from its numeric value.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            other => Self::Other(other),
        }
    }

    /// Returns the numeric value of this status code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Cancelled => 1,
            Self::Unknown => 2,
            Self::InvalidArgument => 3,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::AlreadyExists => 6,
            Self::PermissionDenied => 7,
            Self::ResourceExhausted => 8,
            Self::FailedPrecondition => 9,
            Self::Aborted => 10,
            Self::OutOfRange => 11,
            Self::Unimplemented => 12,
            Self::Internal => 13,
            Self::Unavailable => 14,
            Self::DataLoss => 15,
            Self::Unauthenticated => 16,
            Self::Other(code) => *code,
        }
    }

    /// Maps an HTTP status onto the closest transport status.
    pub fn from_http(status: u16) -> Self {
        match status {
            200..=299 => Self::Ok,
            400 | 422 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 | 504 => Self::DeadlineExceeded,
            409 => Self::AlreadyExists,
            412 => Self::FailedPrecondition,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            501 => Self::Unimplemented,
            502 | 503 => Self::Unavailable,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// A raw failure reported by the transport, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// The remote side answered with a non-OK status.
    Status {
        /// Transport status code.
        code: StatusCode,
        /// Status message.
        message: String,
        /// Response metadata (headers or trailers).
        metadata: HashMap<String, String>,
    },
    /// A local I/O failure.
    Io {
        /// Portable I/O error kind.
        kind: std::io::ErrorKind,
        /// Error message.
        message: String,
    },
    /// A raw OS error number (`errno`).
    Os {
        /// OS error code.
        code: i32,
        /// Error message.
        message: String,
    },
    /// An unexpected failure inside the transport implementation.
    Internal {
        /// Error message.
        message: String,
    },
}

impl RawFailure {
    /// Creates a status failure without metadata.
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    /// Creates an I/O failure.
    pub fn io(kind: std::io::ErrorKind, message: impl Into<String>) -> Self {
        Self::Io {
            kind,
            message: message.into(),
        }
    }

    /// Adds a metadata entry to a status failure. Other variants are unchanged.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Status { metadata, .. } = &mut self {
            metadata.insert(key.into().to_ascii_lowercase(), value.into());
        }
        self
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        match self {
            Self::Status { message, .. }
            | Self::Io { message, .. }
            | Self::Os { message, .. }
            | Self::Internal { message } => message,
        }
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { code, message, .. } => write!(f, "status {}: {}", code, message),
            Self::Io { kind, message } => write!(f, "i/o error ({:?}): {}", kind, message),
            Self::Os { code, message } => write!(f, "os error {}: {}", code, message),
            Self::Internal { message } => write!(f, "internal transport error: {}", message),
        }
    }
}

impl std::error::Error for RawFailure {}

impl From<std::io::Error> for RawFailure {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::Os {
                code,
                message: err.to_string(),
            },
            None => Self::Io {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Deadlines that cannot be represented saturate to this far-off horizon.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns the instant `timeout` from `from`.
///
/// Saturates instead of panicking, so `Duration::MAX` means "no practical limit".
pub fn deadline_after(from: Instant, timeout: Duration) -> Instant {
    from.checked_add(timeout)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// A single invocation handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Fully qualified method name.
    pub method: String,
    /// Opaque request payload.
    pub payload: Bytes,
    /// Absolute deadline for this invocation.
    pub deadline: Instant,
    /// Request metadata (headers).
    pub metadata: HashMap<String, String>,
}

impl TransportRequest {
    /// Creates a new request.
    pub fn new(method: impl Into<String>, payload: Bytes, deadline: Instant) -> Self {
        Self {
            method: method.into(),
            payload,
            deadline,
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A successful transport response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    /// Opaque response payload.
    pub payload: Bytes,
    /// Response metadata.
    pub metadata: HashMap<String, String>,
}

impl TransportResponse {
    /// Creates a response from a payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }
}

/// The opaque RPC primitive the client is built on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invokes a method with a payload and deadline.
    async fn invoke(&self, request: TransportRequest) -> Result<TransportResponse, RawFailure>;

    /// Releases underlying resources. Called once by the supervisor on close.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_status_code_round_trips_known_codes() {
        for code in 0..=16 {
            assert_eq!(StatusCode::from_code(code).code(), code);
        }
        assert_eq!(StatusCode::from_code(42), StatusCode::Other(42));
    }

    #[test_case(404, StatusCode::NotFound)]
    #[test_case(401, StatusCode::Unauthenticated)]
    #[test_case(403, StatusCode::PermissionDenied)]
    #[test_case(429, StatusCode::ResourceExhausted)]
    #[test_case(503, StatusCode::Unavailable)]
    #[test_case(504, StatusCode::DeadlineExceeded)]
    #[test_case(500, StatusCode::Internal)]
    #[test_case(418, StatusCode::Unknown)]
    fn test_status_from_http(status: u16, expected: StatusCode) {
        assert_eq!(StatusCode::from_http(status), expected);
    }

    #[test]
    fn test_io_error_conversion_keeps_os_code() {
        let failure = RawFailure::from(std::io::Error::from_raw_os_error(111));
        assert!(matches!(failure, RawFailure::Os { code: 111, .. }));

        let failure = RawFailure::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow",
        ));
        assert!(matches!(
            failure,
            RawFailure::Io {
                kind: std::io::ErrorKind::TimedOut,
                ..
            }
        ));
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();

        assert_eq!(deadline_after(now, Duration::from_secs(1)), now + Duration::from_secs(1));

        let far = deadline_after(now, Duration::MAX);
        assert!(far > now + Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn test_metadata_keys_are_lowercased() {
        let failure = RawFailure::status(StatusCode::ResourceExhausted, "slow down")
            .with_metadata("Retry-After", "3");
        if let RawFailure::Status { metadata, .. } = failure {
            assert_eq!(metadata.get("retry-after").map(String::as_str), Some("3"));
        } else {
            panic!("Expected status failure");
        }
    }
}
