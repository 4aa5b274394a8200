//! Error types for the whale watcher

use std::time::Duration;

use thiserror::Error;

use crate::chain::Chain;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the whale watcher
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Entity registry errors
    #[error("Entity registry error: {0}")]
    Registry(#[from] RegistryError),

    // Chain-data errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // Posting errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // Ledger errors
    #[error("Ledger persistence failed: {0}")]
    Persistence(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Failure fetching or decoding chain data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    BadStatus(u16),

    #[error("malformed payload: {0}")]
    Parse(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no provider configured for {0}")]
    Unsupported(Chain),
}

impl ProviderError {
    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::BadStatus(status) => *status == 429 || *status >= 500,
            ProviderError::Parse(_) | ProviderError::Unsupported(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Parse(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::BadStatus(status.as_u16())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// Response of the posting channel when a post is not accepted
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("post rejected: {reason}")]
    Rejected { reason: String },

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Final outcome of a dispatch that did not produce a post
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("rate limit persisted after {attempts} attempts, message dropped")]
    RateLimitExhausted { attempts: u32 },

    #[error("post rejected: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Failure building the entity registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("entity '{entity}' has an unsupported shape: {detail}")]
    Schema { entity: String, detail: String },

    #[error("address {address} claimed by both '{existing}' and '{incoming}'")]
    Conflict {
        address: String,
        existing: String,
        incoming: String,
    },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("pattern '{pattern}' refers to unknown entity '{entity}'")]
    UnknownPatternEntity { pattern: String, entity: String },
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
