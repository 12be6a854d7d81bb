//! Error taxonomy for token acquisition

use std::time::Duration;

use thiserror::Error;

/// Errors raised while acquiring or caching credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Required identifiers are missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Silent refresh was rejected; the user has to sign in again.
    #[error("Interaction required: {0}")]
    InteractionRequired(String),

    /// The identity provider rejected the authorization or token request.
    #[error("Authentication failed ({code}): {description}")]
    AuthenticationFailed { code: String, description: String },

    /// An authorization code was received but could not be redeemed.
    #[error("Token exchange failed ({code}): {description}")]
    TokenExchangeFailed { code: String, description: String },

    /// No terminal callback arrived on the loopback listener in time.
    #[error("Authentication timed out after {}s waiting for the browser sign-in", .0.as_secs())]
    AuthenticationTimedOut(Duration),

    /// The persisted cache could not be read or decrypted.
    #[error("Token cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The loopback listener could not be bound or failed while serving.
    #[error("Callback listener failed: {0}")]
    ListenerFailed(String),

    /// The authorization URL could not be constructed.
    #[error("Invalid authorization URL: {0}")]
    AuthorizationUrl(String),

    /// Writing or deleting the cache file failed.
    #[error("Failed to update token cache: {0}")]
    CacheWrite(#[from] std::io::Error),
}

impl AuthError {
    /// Upstream error code, when the identity provider supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::AuthenticationFailed { code, .. } | Self::TokenExchangeFailed { code, .. } => {
                Some(code.as_str())
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
