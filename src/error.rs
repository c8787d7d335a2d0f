//! Error types for authgrant
//!
//! A single error hierarchy built with thiserror. Storage and strategy
//! code returns these variants unchanged; the provider decides which OAuth
//! error code a caller sees via [`AuthGrantError::protocol_code`].

use thiserror::Error;

/// Main error type for authgrant operations
#[derive(Error, Debug)]
pub enum AuthGrantError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    #[error("Malformed session data: {0}")]
    MalformedSession(String),

    #[error("Malformed request data: {0}")]
    MalformedRequest(String),

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Operation canceled")]
    Canceled,

    #[error("{code}: {description}")]
    Protocol {
        code: &'static str,
        description: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StorageError::Connection(err.to_string())
            }
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for AuthGrantError {
    fn from(err: sqlx::Error) -> Self {
        AuthGrantError::Storage(StorageError::from(err))
    }
}

impl From<sqlx::migrate::MigrateError> for AuthGrantError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AuthGrantError::Storage(StorageError::Migration(err.to_string()))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthGrantError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthGrantError::TokenInvalid(err.to_string())
    }
}

/// Convenient result type for authgrant operations
pub type Result<T> = std::result::Result<T, AuthGrantError>;

impl AuthGrantError {
    /// Create a not-found error for an entity
    #[inline]
    pub fn not_found(entity: &str, id: &str) -> Self {
        AuthGrantError::NotFound(format!("{} '{}'", entity, id))
    }

    #[inline]
    pub fn token_invalid<S: Into<String>>(msg: S) -> Self {
        AuthGrantError::TokenInvalid(msg.into())
    }

    #[inline]
    pub fn malformed_session<S: Into<String>>(msg: S) -> Self {
        AuthGrantError::MalformedSession(msg.into())
    }

    #[inline]
    pub fn malformed_request<S: Into<String>>(msg: S) -> Self {
        AuthGrantError::MalformedRequest(msg.into())
    }

    /// Create a storage error
    #[inline]
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        AuthGrantError::Storage(StorageError::Database(msg.into()))
    }

    /// Create a config error
    #[inline]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        AuthGrantError::Config(msg.into())
    }

    #[inline]
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        AuthGrantError::Crypto(msg.into())
    }

    /// Create an OAuth protocol error with an RFC 6749 error code
    #[inline]
    pub fn protocol<S: Into<String>>(code: &'static str, description: S) -> Self {
        AuthGrantError::Protocol {
            code,
            description: description.into(),
        }
    }

    #[inline]
    pub fn invalid_request<S: Into<String>>(description: S) -> Self {
        Self::protocol("invalid_request", description)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthGrantError::NotFound(_))
    }

    /// OAuth error code a protocol response should carry for this error.
    ///
    /// `Canceled` has no protocol translation; the caller decides how to
    /// present a timeout.
    pub fn protocol_code(&self) -> Option<&'static str> {
        match self {
            AuthGrantError::NotFound(_) | AuthGrantError::TokenInvalid(_) => Some("invalid_grant"),
            AuthGrantError::UnknownClient(_) => Some("invalid_client"),
            AuthGrantError::Protocol { code, .. } => Some(code),
            AuthGrantError::Canceled => None,
            AuthGrantError::MalformedSession(_)
            | AuthGrantError::MalformedRequest(_)
            | AuthGrantError::Storage(_)
            | AuthGrantError::Config(_)
            | AuthGrantError::Crypto(_)
            | AuthGrantError::Io(_)
            | AuthGrantError::Json(_)
            | AuthGrantError::Yaml(_) => Some("server_error"),
        }
    }
}
