//! # Error Taxonomy
//!
//! Every failure the client can produce surfaces as one `ProtocolError`
//! carrying a human-readable message, the endpoint URL involved (when there
//! is one) and a coarse `ErrorKind`. Nothing is retried internally.
//!
//! The kind answers the question callers actually have: is the session still
//! usable after this error, or must it be reopened?

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Result type shared by every XRTC client operation.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Boxed underlying cause attached to a `ProtocolError`.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid credentials/configuration; raised before any I/O.
    Configuration,
    /// Malformed input or a request over the size ceiling; nothing was sent.
    Validation,
    /// Structured 400/401 (or other non-200) from the login endpoint.
    Authentication,
    /// Structured 400/401 (or other non-200) from set/get.
    Application,
    /// Oversized, empty or malformed response data.
    Protocol,
    /// Connection, TLS or timeout failure.
    Transport,
    /// The session was closed before or during the operation.
    Closed,
}

impl ErrorKind {
    /// Short lowercase label, used in diagnostics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Application => "application",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Transport => "transport",
            ErrorKind::Closed => "closed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-raised failure.
#[derive(Debug, Error)]
#[error("xrtc{}: {message}", location(.url))]
pub struct ProtocolError {
    kind: ErrorKind,
    message: String,
    url: Option<String>,
    #[source]
    source: Option<BoxError>,
}

fn location(url: &Option<String>) -> String {
    match url {
        Some(url) => format!(" {}", url),
        None => String::new(),
    }
}

impl ProtocolError {
    /// Creates an error of the given kind without an endpoint.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ProtocolError {
            kind,
            message: message.into(),
            url: None,
            source: None,
        }
    }

    /// Shorthand for a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Shorthand for a `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Shorthand for a `Closed` error.
    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, message)
    }

    /// Tags the error with the endpoint URL involved.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attaches the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Failure category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message without the URL prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Endpoint URL the failure relates to, if any.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Returns true when the owning session can no longer be used and must
    /// be reopened.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Authentication | ErrorKind::Transport | ErrorKind::Closed
        )
    }
}
