//! Error types for the echonet library.

use thiserror::Error;

/// Errors that can occur in worker, dashboard and dispatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A precache manifest entry could not be fetched during install.
    #[error("Cache fill failed for {url}: {reason}")]
    CacheFill {
        /// Manifest URL that failed.
        url: String,
        /// Why the fetch failed.
        reason: String,
    },

    /// Neither the network nor the cache could produce a response.
    #[error("Resource unavailable: {url}")]
    ResourceUnavailable {
        /// Request key that could not be served.
        url: String,
    },

    /// The backend answered with a non-success status.
    #[error("Backend returned {status}: {body}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Response body as text.
        body: String,
    },

    /// A request did not complete within its deadline.
    #[error("Request timed out")]
    Timeout,

    /// No command was given to analyze.
    #[error("No command to analyze")]
    EmptyCommand,

    /// The task board holds no subtasks to submit.
    #[error("No subtasks to submit")]
    EmptyPipeline,

    /// Operation not valid in the current worker or board state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error during cache or config file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns true when the error comes from the transport rather than from
    /// a response the server actually sent.
    #[must_use]
    pub const fn is_network_failure(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout | Self::Io(_))
    }
}

/// A specialized `Result` type for echonet operations.
pub type Result<T> = std::result::Result<T, Error>;
