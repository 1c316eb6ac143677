//! HTTP transport implementation.
//!
//! Each invocation is a `POST {base}/{method}` carrying the opaque payload.
//! A `grpc-status` response header, when present, is authoritative; otherwise
//! the HTTP status is mapped onto a transport status code.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use super::{RawFailure, StatusCode, Transport, TransportRequest, TransportResponse};
use crate::config::ClientConfig;
use crate::errors::RpcResult;
use crate::observability::redact_sensitive;

const GRPC_STATUS_HEADER: &str = "grpc-status";
const GRPC_MESSAGE_HEADER: &str = "grpc-message";
const TIMEOUT_HEADER: &str = "x-request-timeout-ms";
const MAX_ERROR_BODY: usize = 512;

/// HTTP transport using reqwest.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    auth_token: Option<SecretString>,
}

impl HttpTransport {
    /// Creates a transport for `base_url`.
    pub fn new(base_url: &str, connect_timeout: Duration) -> RpcResult<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            auth_token: None,
        })
    }

    /// Creates a transport from client configuration.
    pub fn from_config(config: &ClientConfig) -> RpcResult<Self> {
        let mut transport = Self::new(config.base_url()?.as_str(), config.timeout)?;
        if let Some(token) = config.auth_token() {
            transport = transport.with_auth_token(SecretString::new(token.to_string()));
        }
        Ok(transport)
    }

    /// Sends `Authorization: Bearer <token>` with every call.
    pub fn with_auth_token(mut self, token: SecretString) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// Builds the endpoint URL for a method.
    fn endpoint(&self, method: &str) -> Result<Url, RawFailure> {
        self.base_url
            .join(method.trim_start_matches('/'))
            .map_err(|e| RawFailure::status(StatusCode::InvalidArgument, e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method, bytes = request.payload.len()))]
    async fn invoke(&self, request: TransportRequest) -> Result<TransportResponse, RawFailure> {
        let remaining = request.remaining();
        if remaining.is_zero() {
            return Err(RawFailure::status(
                StatusCode::DeadlineExceeded,
                "deadline passed before the request was sent",
            ));
        }

        let url = self.endpoint(&request.method)?;
        let mut req_builder = self
            .client
            .post(url)
            .timeout(remaining)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .header(TIMEOUT_HEADER, remaining.as_millis().to_string());

        for (name, value) in &request.metadata {
            req_builder = req_builder.header(name.as_str(), value.as_str());
        }

        if let Some(token) = &self.auth_token {
            req_builder = req_builder.bearer_auth(token.expose_secret());
        }

        let response = req_builder.body(request.payload).send().await?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.bytes().await?;

        let code = match headers.get(GRPC_STATUS_HEADER) {
            Some(raw) => raw
                .trim()
                .parse::<i32>()
                .map(StatusCode::from_code)
                .unwrap_or(StatusCode::Unknown),
            None if status.is_success() => StatusCode::Ok,
            None => StatusCode::from_http(status.as_u16()),
        };

        if code == StatusCode::Ok {
            return Ok(TransportResponse {
                payload: body,
                metadata: headers,
            });
        }

        let message = match headers.get(GRPC_MESSAGE_HEADER) {
            Some(message) if !message.is_empty() => message.clone(),
            _ => error_text(status, &body),
        };
        let message = redact_sensitive(&message);
        tracing::debug!(http_status = status.as_u16(), code = %code, "Call returned error status");

        Err(RawFailure::Status {
            code,
            message,
            metadata: headers,
        })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn error_text(status: reqwest::StatusCode, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return format!("HTTP {}", status);
    }
    let mut end = text.len().min(MAX_ERROR_BODY);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("HTTP {}: {}", status, &text[..end])
}

impl From<reqwest::Error> for RawFailure {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            RawFailure::io(std::io::ErrorKind::TimedOut, message)
        } else if err.is_connect() {
            RawFailure::io(std::io::ErrorKind::ConnectionRefused, message)
        } else if err.is_body() || err.is_request() {
            RawFailure::io(std::io::ErrorKind::ConnectionReset, message)
        } else if err.is_builder() {
            RawFailure::status(StatusCode::InvalidArgument, message)
        } else {
            RawFailure::Internal { message }
        }
    }
}
