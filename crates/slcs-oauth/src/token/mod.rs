//! Access token requests, responses and generators.

mod backend;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use backend::{CertificateIssuer, CredentialBackend, HttpCredentialBackend};

use crate::config::defaults;
use crate::error::OAuthError;
use crate::registry::{AccessToken, AuthorizationGrant, random_token};
use crate::request::OAuthRequest;

/// Grant type accepted by the token endpoint.
pub const AUTHORIZATION_CODE_GRANT_TYPE: &str = "authorization_code";

/// Parameters of a request to the token endpoint, read from the POST body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenRequest {
    pub grant_type: String,
    pub code: String,
    pub redirect_uri: Option<String>,
}

impl AccessTokenRequest {
    /// Read the token request from the POST body.
    ///
    /// The query string is never consulted.
    pub fn from_request(request: &OAuthRequest) -> Result<Self, OAuthError> {
        let required = |name: &str| {
            request
                .form_param(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| OAuthError::invalid_request(format!("Missing {name} parameter")))
        };

        let grant_type = required("grant_type")?;
        let code = required("code")?;
        if grant_type != AUTHORIZATION_CODE_GRANT_TYPE {
            return Err(OAuthError::invalid_request("Invalid grant_type"));
        }

        Ok(Self {
            grant_type,
            code,
            redirect_uri: request.form_param("redirect_uri").map(str::to_string),
        })
    }
}

/// Successful token endpoint response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn for_token(token: &AccessToken) -> Self {
        Self {
            access_token: token.token_id.clone(),
            token_type: token.token_type.clone(),
            expires_in: token.lifetime.as_secs(),
            refresh_token: None,
        }
    }
}

/// Turns a redeemed grant into an access token.
#[derive(Debug, Clone)]
pub enum AccessTokenGenerator {
    /// Random opaque token.
    Bearer { lifetime: Duration, token_type: String },

    /// Certificate from the credential backend, used as the token id.
    Certificate { lifetime: Duration, issuer: CertificateIssuer },
}

impl AccessTokenGenerator {
    #[must_use]
    pub fn bearer(lifetime: Duration) -> Self {
        Self::Bearer { lifetime, token_type: defaults::BEARER_TOKEN_TYPE.to_string() }
    }

    #[must_use]
    pub fn certificate(lifetime: Duration, issuer: CertificateIssuer) -> Self {
        Self::Certificate { lifetime, issuer }
    }

    #[must_use]
    pub fn token_type(&self) -> &str {
        match self {
            Self::Bearer { token_type, .. } => token_type,
            Self::Certificate { .. } => defaults::SLCS_TOKEN_TYPE,
        }
    }

    /// Generate a token for `grant`.
    ///
    /// `None` signals an internal failure, never a protocol error.
    pub async fn get_access_token(
        &self,
        token_request: &AccessTokenRequest,
        grant: &Arc<AuthorizationGrant>,
        request: &OAuthRequest,
    ) -> Option<AccessToken> {
        match self {
            Self::Bearer { lifetime, token_type } => {
                Some(AccessToken::new(random_token(), Arc::clone(grant), token_type, *lifetime))
            }
            Self::Certificate { lifetime, issuer } => {
                let certificate = issuer.issue(grant, request).await?;
                tracing::info!(
                    client_id = %grant.client_id,
                    code = %token_request.code,
                    "Issued certificate access token"
                );
                Some(AccessToken::new(
                    certificate,
                    Arc::clone(grant),
                    defaults::SLCS_TOKEN_TYPE,
                    *lifetime,
                ))
            }
        }
    }
}
