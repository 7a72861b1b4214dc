//! Error types for the proxy.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The backend (or pricing source) could not be reached or read.
    #[error("Upstream error: {message}")]
    Provider { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("Missing API key: {message}")]
    Credential { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential {
            message: msg.into(),
        }
    }

    /// HTTP status this error is reported to the client with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Credential { .. } => 401,
            Self::Json(_) => 400,
            _ => 502,
        }
    }

    /// Error `type` used in both the Anthropic and OpenAI error envelopes.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Credential { .. } => "authentication_error",
            Self::Json(_) => "invalid_request_error",
            _ => "api_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
