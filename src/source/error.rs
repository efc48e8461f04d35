//! Source error taxonomy
//!
//! Only `Configuration` is allowed to escape a provider's construction.
//! Everything else is converted into data (a failed `ScrapeResult` or a
//! stats entry) before it reaches the orchestrator.

use thiserror::Error;

/// Errors raised by source adapters and the request executor.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Missing or invalid credentials / settings. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection reset, DNS failure, timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success status.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// The payload did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("session not open: {0}")]
    SessionNotOpen(String),

    #[error("cancelled")]
    Cancelled,
}

impl SourceError {
    /// Whether the error is a transport-level or server-side failure that a
    /// retry may fix.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// A 4xx response other than 429.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Http { status, .. } if (400..500).contains(status) && *status != 429)
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::Http {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        if e.is_decode() {
            return Self::Parse(e.to_string());
        }
        if e.is_builder() {
            return Self::Configuration(e.to_string());
        }
        // timeouts, connect failures, resets, body read errors
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
