//! Error taxonomy shared across the st crates.
//!
//! Protocol failures keep the full request context (scheme, host, port,
//! path, query, status, reason) so callers can render a precise
//! diagnostic and branch on the status programmatically.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// A non-2xx response from the storage service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolError {
    /// What was being attempted, e.g. "Object GET failed".
    pub action: String,
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub status: u16,
    pub reason: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.action)?;
        if !self.scheme.is_empty() {
            write!(f, " {}://{}", self.scheme, self.host)?;
        } else if !self.host.is_empty() {
            write!(f, " {}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "{}", self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        write!(f, " {}", self.status)?;
        if !self.reason.is_empty() {
            write!(f, " {}", self.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structured non-2xx response from the storage service.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connection-level failure: refused, reset, protocol violation.
    /// Retried by the session wrapper up to the retry budget.
    #[error("transport error: {0}")]
    Transport(String),

    /// Local filesystem failure; reported per item, never fatal to
    /// sibling work items.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A listing response that does not match the typed record schema.
    #[error("invalid listing entry: {0}")]
    Listing(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The HTTP status for protocol errors, `None` otherwise.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Protocol(err) => Some(err.status),
            _ => None,
        }
    }

    /// True for a 404 from the service. The one protocol error bulk
    /// handlers recover from locally.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
