//! PowerPlatform credential gateway
//!
//! Obtains short-lived Azure AD access tokens for a Dataverse/PowerPlatform
//! resource, either as a service identity (client secret) or through an
//! interactive browser sign-in whose tokens are kept in a machine-bound
//! encrypted cache.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use powerplatform_auth::{AuthProvider, Config};
//!
//! let config = Config::load()?;
//! let auth = AuthProvider::from_config(&config)?;
//! let token = auth.get_access_token("https://contoso.crm.dynamics.com").await?;
//! println!("{} chars, expires at {}", token.secret().len(), token.expires_at);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod config;

pub use auth::{AccessToken, Account, AuthConfig, AuthError, AuthMode, AuthProvider};
pub use config::Config;
