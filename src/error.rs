//! WhatsApi error types.
//!
//! # Error Classification
//!
//! Failures fall into two groups:
//!
//! - **Local failures** are returned as [`WaError`] from the call that hit
//!   them (bad configuration, codec/cipher trouble, transport I/O, invalid
//!   arguments to an outbound request).
//! - **Correlated failures** are delivered to the callback registered for a
//!   request id and never abort the session: [`ResponseError`] for an
//!   explicit server error node, [`AuthFailure`] for a rejected login.
//!
//! Unmatched responses and unclassified nodes are not errors at all; the
//! dispatcher drops them.

use std::fmt;

use thiserror::Error;

/// WhatsApi errors.
#[derive(Error, Debug)]
pub enum WaError {
    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Frame or node could not be encoded/decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Key derivation or frame authentication failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation requires an open transport connection.
    #[error("Not connected")]
    NotConnected,

    /// `login()` called on an authenticated session.
    #[error("Already logged in")]
    AlreadyLoggedIn,

    /// Outbound request was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Media file rejected before upload.
    #[error("Media error: {0}")]
    Media(String),

    /// Media upload failed.
    #[error("Upload error: {0}")]
    Upload(String),

    /// Thumbnail generation failed.
    #[error("Thumbnail error: {0}")]
    Thumbnail(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for WhatsApi operations
pub type Result<T> = std::result::Result<T, WaError>;

impl From<reqwest::Error> for WaError {
    fn from(err: reqwest::Error) -> Self {
        WaError::Upload(err.to_string())
    }
}

impl From<toml::de::Error> for WaError {
    fn from(err: toml::de::Error) -> Self {
        WaError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for WaError {
    fn from(err: base64::DecodeError) -> Self {
        WaError::Crypto(format!("Base64 decode error: {err}"))
    }
}

impl From<image::ImageError> for WaError {
    fn from(err: image::ImageError) -> Self {
        WaError::Thumbnail(err.to_string())
    }
}

/// Error code used for client-side media failures delivered to callbacks.
pub const LOCAL_ERROR_CODE: &str = "100";

/// Server error attached to a correlated response.
///
/// Delivered to the callback registered under the failing request id. The
/// session keeps running; retrying (and honouring `backoff`) is up to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    /// Error code (e.g. `404`)
    pub code: String,
    /// Error text (e.g. `item-not-found`)
    pub message: String,
    /// Seconds the server asks us to wait before retrying
    pub backoff: Option<u64>,
}

impl ResponseError {
    /// Create an error without a backoff hint
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            backoff: None,
        }
    }

    /// Error raised locally (media pipeline) rather than by the server
    pub fn local(message: impl Into<String>) -> Self {
        Self::new(LOCAL_ERROR_CODE, message)
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)?;
        if let Some(backoff) = self.backoff {
            write!(f, " (backoff {backoff}s)")?;
        }
        Ok(())
    }
}

impl std::error::Error for ResponseError {}

/// Explicit login rejection.
///
/// `raw` is the XML-like rendering of the failure node as received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// The server answered the auth sequence with a failure node
    #[error("Login rejected: {0}")]
    Rejected(String),
    /// `login()` was called on an already authenticated session
    #[error("Already logged in")]
    AlreadyLoggedIn,
    /// Frames for the login sequence could not be written
    #[error("Login aborted: {0}")]
    Aborted(String),
}
