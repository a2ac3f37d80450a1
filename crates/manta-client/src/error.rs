//! Client error types

use manta_crypto::CryptoError;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Ordered key/value diagnostics attached to protocol errors
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorContext(BTreeMap<String, String>);

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous value for the key
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str(" [")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        f.write_str("]")
    }
}

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Remote path does not exist
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// Invalid argument or configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The remote state contradicts what the upload protocol expects
    #[error("Multipart error: {message}{context}")]
    ProtocolState { message: String, context: ErrorContext },

    /// Ciphertext failed authentication
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Encryption error
    #[error("Encryption error: {0}")]
    Encryption(CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the remote store
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Several independent failures collected during one operation
    #[error("{message} ({} errors)", .errors.len())]
    Aggregate {
        message: String,
        errors: Vec<ClientError>,
    },

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn protocol(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ProtocolState {
            message: message.into(),
            context,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Remote { status: 404, .. })
    }

    /// Check if this is an authentication failure on ciphertext
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    /// Diagnostic context, for protocol errors
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::ProtocolState { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<CryptoError> for ClientError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Integrity(message) => Self::Integrity(message),
            CryptoError::Io(e) => Self::Io(e),
            other => Self::Encryption(other),
        }
    }
}
