//! Error types for the bridge.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Upstream returned status {status}: {message}")]
    Upstream {
        status: u16,
        error_type: String,
        message: String,
    },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("No API key available for provider '{provider}'")]
    MissingCredential { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, error_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            error_type: error_type.into(),
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn missing_credential(provider: impl Into<String>) -> Self {
        Self::MissingCredential {
            provider: provider.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Errors that only affect a single upstream chunk. The stream skips them
    /// instead of terminating.
    #[must_use]
    pub fn is_chunk_local(&self) -> bool {
        matches!(self, Self::Json(_) | Self::Translation { .. })
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
