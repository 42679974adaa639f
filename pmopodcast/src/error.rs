//! Error types for the podcast core

/// Result type alias for podcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching, caching or playing
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed (connection refused, DNS, TLS...)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The feed server answered with a non-success status
    #[error("Feed server returned status {0}")]
    Status(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// The feed document is not well-formed XML
    #[error("XML parsing failed: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The feed document is XML but not a usable feed
    #[error("Feed parsing failed: {0}")]
    Parse(String),

    /// Cached snapshot could not be (de)serialized
    #[error("JSON (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The audio engine rejected or interrupted playback
    #[error("Playback failed: {0}")]
    Playback(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (from pmoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a feed parsing error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a playback error
    pub fn playback(msg: impl Into<String>) -> Self {
        Self::Playback(msg.into())
    }

    /// Could not reach the feed (unreachable, timeout, non-success status)
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status(_) | Self::Timeout)
    }

    /// Reached the feed but the body is not a usable feed document
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Xml(_) | Self::Parse(_))
    }

    /// Maps a reqwest error, keeping timeouts distinguishable
    pub(crate) fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Http(err)
        }
    }
}
