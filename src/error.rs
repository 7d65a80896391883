//! Error types for the spider

use thiserror::Error;

/// Main error type for spider operations
#[derive(Debug, Error)]
pub enum SpiderError {
    /// Connection refused/reset, DNS failure, broken body stream
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Malformed HTML or response content
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid URL or request construction
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Payload file '{path}' could not be read: {source}")]
    PayloadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A crawl is already running")]
    AlreadyRunning,

    #[error("Browser error: {0}")]
    Browser(String),
}

impl SpiderError {
    /// Classifies a reqwest failure into the spider's taxonomy
    pub fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            SpiderError::Timeout(timeout_ms)
        } else if err.is_builder() {
            SpiderError::Protocol(err.to_string())
        } else {
            SpiderError::Network(err.to_string())
        }
    }

    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SpiderError::Network(_) | SpiderError::Timeout(_))
    }

    /// Whether the failure came from the connection rather than the target's handling
    pub fn is_connection(&self) -> bool {
        matches!(self, SpiderError::Network(_))
    }
}

impl From<url::ParseError> for SpiderError {
    fn from(err: url::ParseError) -> Self {
        SpiderError::Protocol(format!("invalid URL: {err}"))
    }
}

/// Result type alias for spider operations
pub type Result<T> = std::result::Result<T, SpiderError>;
