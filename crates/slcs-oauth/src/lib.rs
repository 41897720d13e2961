//! OAuth 2.0 authorization server, resource guard and client engine with
//! certificate access tokens.
//!
//! The server implements the authorization code grant. Access tokens are
//! either random bearer strings or, in the short-lived credential service
//! (SLCS) variant, X.509 certificates issued by a credential backend for a
//! certificate request sent with the token request.
//!
//! # Features
//!
//! - **Authorization server**: `authorize`, `access_token`, `check_token`
//!   and `request_certificate`, with single-use grants and replay detection
//! - **Pluggable authentication**: client and resource callers identified by
//!   certificate DN, password or not at all
//! - **Consent**: per-user client authorization decisions
//! - **Resource guard**: axum middleware checking bearer tokens on protected
//!   paths
//! - **Client engine**: redirect, CSRF `state` check and code exchange,
//!   optionally with a certificate request
//!
//! # Example
//!
//! ```no_run
//! use slcs_oauth::config::ServerConfig;
//! use slcs_oauth::register::RegisterFile;
//! use slcs_oauth::server::OAuthService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (clients, resources) =
//!         RegisterFile::load("register.toml".as_ref())?.into_registers()?;
//!     let service = OAuthService::new(ServerConfig::default(), clients, resources, None)?;
//!
//!     service.run_http(8443).await
//! }
//! ```

pub mod authenticate;
pub mod authorize;
pub mod client;
pub mod config;
pub mod error;
pub mod register;
pub mod registry;
pub mod request;
pub mod scope;
pub mod server;
pub mod token;

pub use client::{ClientVariant, Oauth2Client, TokenCall};
pub use config::{ClientConfig, ServerConfig};
pub use error::{ClientError, ErrorCode, InternalError, OAuthError, RequestError};
pub use request::OAuthRequest;
pub use server::{AuthorizationServer, OAuthService};
