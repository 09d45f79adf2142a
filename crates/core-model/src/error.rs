//! Typed errors for the collaborator seams.
//!
//! Extraction and delivery failures are values callers can match on, so the
//! pipeline can tell "the page had no names" apart from "the request failed".

use thiserror::Error;

/// Failure to produce today's raw name list.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Connection, TLS, timeout or body-read failure.
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The source answered with a non-success status.
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    /// The page loaded but none of the selectors produced a name.
    #[error("no names matched on {source_ref} (tried {tried})")]
    NoMatches { source_ref: String, tried: String },

    #[error("client initialization failed: {0}")]
    ClientInit(String),

    /// Local source (list file) could not be read.
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Whether a later run could plausibly succeed without any change.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            Self::NoMatches { .. } | Self::ClientInit(_) | Self::Io { .. } => false,
        }
    }
}

/// A record that cannot enter the history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("empty name")]
    EmptyName,

    #[error("name contains control characters: {0:?}")]
    ControlCharacter(String),

    #[error("not a canonical YYYY-MM-DD date: {0:?}")]
    BadDate(String),
}

/// Failure to deliver a rendered message.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Bad or revoked credentials.
    #[error("notifier rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// The channel refused the message itself, e.g. unknown recipient.
    #[error("message rejected: {description}")]
    Rejected { description: String },

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("delivery failed: {0}")]
    Transport(String),

    #[error("client initialization failed: {0}")]
    ClientInit(String),
}

impl NotifyError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => matches!(status, 429 | 500..=599),
            _ => false,
        }
    }
}
