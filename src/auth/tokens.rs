//! Access tokens and signed-in accounts

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Tokens are refreshed once less than this many seconds remain.
pub const EXPIRY_MARGIN_SECS: u64 = 300;

/// Lifetime assumed when the identity provider omits `expires_in`.
pub const DEFAULT_LIFETIME_SECS: u64 = 3600;

/// Bearer token for one resource
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    /// Unix seconds at which the identity provider stops honouring the token.
    pub expires_at: u64,
}

impl AccessToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let lifetime = expires_in_secs.unwrap_or_else(|| {
            tracing::debug!(
                "Token response carried no expires_in, assuming {}s",
                DEFAULT_LIFETIME_SECS
            );
            DEFAULT_LIFETIME_SECS
        });

        Self {
            token,
            expires_at: unix_now() + lifetime,
        }
    }

    /// True once the token is inside the refresh margin (or already past expiry).
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now + EXPIRY_MARGIN_SECS >= self.expires_at
    }

    pub fn secret(&self) -> &str {
        &self.token
    }
}

// Keep token material out of logs.
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A signed-in identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable local identifier (`<oid>.<tid>` when the id_token carries both).
    pub home_account_id: String,
    /// Sign-in name, usually the user's email address.
    pub username: String,
    /// Display name
    pub name: Option<String>,
    pub tenant_id: Option<String>,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_is_not_expired() {
        let token = AccessToken::new("abc".into(), Some(3600));
        assert!(!token.is_expired());
        assert!(token.expires_at > unix_now());
    }

    #[test]
    fn test_token_inside_margin_is_expired() {
        // 4 minutes left is inside the 5 minute margin
        let token = AccessToken::new("abc".into(), Some(240));
        assert!(token.is_expired());
    }

    #[test]
    fn test_margin_boundary() {
        let token = AccessToken {
            token: "abc".into(),
            expires_at: 10_000,
        };
        assert!(!token.is_expired_at(10_000 - EXPIRY_MARGIN_SECS - 1));
        assert!(token.is_expired_at(10_000 - EXPIRY_MARGIN_SECS));
        assert!(token.is_expired_at(10_000));
    }

    #[test]
    fn test_missing_lifetime_uses_default() {
        let token = AccessToken::new("abc".into(), None);
        assert!(token.expires_at >= unix_now() + DEFAULT_LIFETIME_SECS - 1);
    }

    #[test]
    fn test_debug_hides_secret() {
        let token = AccessToken::new("super-secret".into(), Some(60));
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("super-secret"));
    }
}
