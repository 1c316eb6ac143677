//! Logging configuration and utilities.
//!
//! The client logs through `tracing`. [`init_tracing`] installs a
//! `tracing-subscriber` formatter for applications that do not bring their
//! own subscriber.

use regex::Regex;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

use crate::errors::{RpcError, RpcResult};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level when `RUST_LOG` is not set.
    pub level: LogLevel,
    /// Emit JSON lines instead of human readable output.
    pub json: bool,
    /// Include span targets.
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    /// Creates a new log configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log level.
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enables JSON output.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` overrides the configured level. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(config: &LogConfig) -> RpcResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_targets);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| RpcError::validation(format!("Failed to install tracing subscriber: {}", e)))
}

fn redaction_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)bearer\s+[a-zA-Z0-9._~+/-]+=*", "Bearer ***"),
            (r"(?i)api[_-]?key[=:]\s*[^\s,}]+", "api_key=***"),
            (r"(?i)authorization[=:]\s*[^\s,}]+", "authorization=***"),
            (r"(?i)token[=:]\s*[^\s,}]+", "token=***"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Redacts credentials from text that may end up in logs or error messages.
pub fn redact_sensitive(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in redaction_patterns() {
        result = re.replace_all(&result, *replacement).into_owned();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_redacts_bearer_tokens() {
        let redacted = redact_sensitive("rejected header Authorization: Bearer abc.def-123");
        assert!(!redacted.contains("abc.def-123"));
        assert!(redacted.contains("***"));
    }

    #[test]
    fn test_redacts_api_keys() {
        let redacted = redact_sensitive("{api_key=sk_live_42, other=1}");
        assert!(!redacted.contains("sk_live_42"));
        assert!(redacted.contains("other=1"));
    }

    #[test]
    fn test_plain_text_unchanged() {
        let text = "upstream connect error";
        assert_eq!(redact_sensitive(text), text);
    }
}
