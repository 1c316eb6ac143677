//! Raw transport failure to [`RpcError`] mapping.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::io;
use std::time::Duration;

use super::{ErrorKind, RpcError};
use crate::transport::{RawFailure, StatusCode};

/// Classifies a raw transport failure.
///
/// Pure and deterministic: the same failure always yields the same kind and
/// metadata.
pub fn classify(failure: &RawFailure) -> RpcError {
    match failure {
        RawFailure::Status {
            code,
            message,
            metadata,
        } => classify_status(*code, message, metadata),
        RawFailure::Io { kind, message } => RpcError::new(kind_for_io(*kind), message.clone())
            .with_detail("io_kind", format!("{:?}", kind)),
        RawFailure::Os { code, message } => {
            let io_kind = io::Error::from_raw_os_error(*code).kind();
            RpcError::new(kind_for_io(io_kind), message.clone()).with_detail("os_code", *code)
        }
        RawFailure::Internal { message } => {
            RpcError::new(ErrorKind::Unknown, format!("Unexpected transport failure: {}", message))
        }
    }
}

fn classify_status(code: StatusCode, message: &str, metadata: &HashMap<String, String>) -> RpcError {
    let kind = kind_for_status(code);
    let mut err = RpcError::new(kind, message.to_string()).with_status_code(code.code());

    if kind == ErrorKind::RateLimit {
        if let Some(retry_after) = parse_retry_after(metadata) {
            err = err.with_retry_after(retry_after);
        }
        if let Some(reset_at) = metadata
            .get("x-ratelimit-reset")
            .and_then(|v| parse_reset_epoch(v))
        {
            err = err.with_reset_at(reset_at);
        }
    }

    if let Some(request_id) = metadata.get("x-request-id") {
        err = err.with_detail("request_id", request_id.clone());
    }

    err
}

/// Maps a transport status onto its error kind.
fn kind_for_status(code: StatusCode) -> ErrorKind {
    match code {
        StatusCode::DeadlineExceeded => ErrorKind::Timeout,
        StatusCode::NotFound => ErrorKind::NotFound,
        StatusCode::ResourceExhausted => ErrorKind::RateLimit,
        StatusCode::Unavailable => ErrorKind::ServiceUnavailable,
        StatusCode::PermissionDenied => ErrorKind::Authorization,
        StatusCode::Unauthenticated => ErrorKind::Authentication,
        StatusCode::InvalidArgument | StatusCode::OutOfRange => ErrorKind::Validation,
        StatusCode::AlreadyExists => ErrorKind::AlreadyExists,
        StatusCode::FailedPrecondition => ErrorKind::PreconditionFailed,
        StatusCode::Aborted => ErrorKind::Aborted,
        StatusCode::Unimplemented => ErrorKind::NotImplemented,
        StatusCode::Internal | StatusCode::DataLoss => ErrorKind::InternalServer,
        StatusCode::Cancelled => ErrorKind::Cancelled,
        StatusCode::Unknown | StatusCode::Ok | StatusCode::Other(_) => ErrorKind::Unknown,
    }
}

fn kind_for_io(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ErrorKind::Connection,
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        io::ErrorKind::Interrupted => ErrorKind::Cancelled,
        _ => ErrorKind::Unknown,
    }
}

fn parse_retry_after(metadata: &HashMap<String, String>) -> Option<Duration> {
    if let Some(ms) = metadata
        .get("retry-after-ms")
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_millis(ms));
    }

    metadata
        .get("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn parse_reset_epoch(value: &str) -> Option<DateTime<Utc>> {
    let secs = value.trim().parse::<i64>().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}
