//! Client and resource authentication strategies.

use std::fmt;
use std::sync::Arc;

use crate::config::AuthenticationMethod;
use crate::error::{ErrorCode, OAuthError};
use crate::register::Credential;
use crate::request::OAuthRequest;

/// Which kind of caller is being authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerKind {
    Client,
    Resource,
}

impl CallerKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Resource => "resource",
        }
    }

    /// Error code reported when authentication of this kind of caller fails.
    #[must_use]
    pub const fn error_code(self) -> ErrorCode {
        match self {
            Self::Client => ErrorCode::InvalidClient,
            Self::Resource => ErrorCode::InvalidResource,
        }
    }

    fn error(self, description: impl Into<String>) -> OAuthError {
        OAuthError::new(self.error_code(), description)
    }
}

impl fmt::Display for CallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Establishes the identity of the client or resource making a request.
#[derive(Debug, Clone)]
pub enum Authenticator {
    /// Skip authentication.
    None(CallerKind),

    /// Match the TLS client certificate DN against registered
    /// `authentication_data`.
    Certificate {
        kind: CallerKind,
        credentials: Arc<Vec<Credential>>,
    },

    /// Match an id/secret pair from Basic auth or the POST body.
    Password {
        kind: CallerKind,
        credentials: Arc<Vec<Credential>>,
    },
}

impl Authenticator {
    #[must_use]
    pub fn new(method: AuthenticationMethod, kind: CallerKind, credentials: Vec<Credential>) -> Self {
        match method {
            AuthenticationMethod::None => Self::None(kind),
            AuthenticationMethod::Certificate => {
                Self::Certificate { kind, credentials: Arc::new(credentials) }
            }
            AuthenticationMethod::Password => {
                Self::Password { kind, credentials: Arc::new(credentials) }
            }
        }
    }

    #[must_use]
    pub const fn kind(&self) -> CallerKind {
        match self {
            Self::None(kind) | Self::Certificate { kind, .. } | Self::Password { kind, .. } => *kind,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::None(_))
    }

    /// Authenticate the caller of `request`.
    ///
    /// Returns the registered id, or `None` when authentication is disabled.
    pub fn authenticate(&self, request: &OAuthRequest) -> Result<Option<String>, OAuthError> {
        match self {
            Self::None(_) => Ok(None),
            Self::Certificate { kind, credentials } => {
                authenticate_certificate(*kind, credentials, request).map(Some)
            }
            Self::Password { kind, credentials } => {
                authenticate_password(*kind, credentials, request).map(Some)
            }
        }
    }
}

fn authenticate_certificate(
    kind: CallerKind,
    credentials: &[Credential],
    request: &OAuthRequest,
) -> Result<String, OAuthError> {
    let Some(dn) = request.client_cert_dn.as_deref().filter(|dn| !dn.is_empty()) else {
        tracing::debug!(%kind, "No certificate DN found");
        return Err(kind.error("No certificate DN found."));
    };

    credentials
        .iter()
        .find(|c| c.authentication_data.as_deref() == Some(dn))
        .map(|c| {
            tracing::debug!(%kind, id = %c.id, "Authenticated by certificate");
            c.id.clone()
        })
        .ok_or_else(|| {
            tracing::info!(%kind, dn, "Certificate DN not registered");
            kind.error(format!(
                "Certificate DN does not match that for any registered {kind}: {dn}"
            ))
        })
}

fn authenticate_password(
    kind: CallerKind,
    credentials: &[Credential],
    request: &OAuthRequest,
) -> Result<String, OAuthError> {
    let supplied = request.basic_credentials().or_else(|| {
        let id = request.form_param("client_id")?;
        let secret = request.form_param("client_secret")?;
        Some((id.to_string(), secret.to_string()))
    });

    let Some((id, secret)) = supplied.filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
    else {
        return Err(kind.error(format!("No {kind} password authentication supplied")));
    };

    credentials
        .iter()
        .find(|c| c.id == id && c.secret.as_deref() == Some(secret.as_str()))
        .map(|c| c.id.clone())
        .ok_or_else(|| {
            tracing::info!(%kind, %id, "Password authentication failed");
            kind.error(format!("{id} access denied: {kind}"))
        })
}
