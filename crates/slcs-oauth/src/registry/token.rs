//! Access tokens and their registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::grant::AuthorizationGrant;
use super::{ExpiringRegistry, expires_after};
use crate::error::{ErrorCode, OAuthError};
use crate::scope;

/// An issued access token.
pub struct AccessToken {
    pub token_id: String,
    pub token_type: String,
    /// Grant the token was issued for.
    pub grant: Arc<AuthorizationGrant>,
    pub scope: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub lifetime: Duration,
    pub expires_at: DateTime<Utc>,
    valid: AtomicBool,
}

impl AccessToken {
    #[must_use]
    pub fn new(
        token_id: String,
        grant: Arc<AuthorizationGrant>,
        token_type: &str,
        lifetime: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            token_id,
            token_type: token_type.to_string(),
            scope: scope::scope_string_to_list(&grant.scope),
            grant,
            created_at,
            lifetime,
            expires_at: expires_after(created_at, lifetime),
            valid: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Seconds until expiry, zero once expired.
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        u64::try_from((self.expires_at - Utc::now()).num_seconds()).unwrap_or(0)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .field("client_id", &self.grant.client_id)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Registry of access tokens keyed by token id.
#[derive(Clone, Debug)]
pub struct AccessTokenRegistry {
    inner: ExpiringRegistry<AccessToken>,
}

impl AccessTokenRegistry {
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self { inner: ExpiringRegistry::new("AccessTokenRegistry", ttl, max_capacity) }
    }

    /// Register a token. Returns false if its id is already registered.
    pub async fn add_token(&self, token: Arc<AccessToken>) -> bool {
        let token_id = token.token_id.clone();
        if self.inner.insert_new(token_id, token).await {
            tracing::debug!(registry = self.inner.name(), "Added access token");
            true
        } else {
            tracing::error!("Repeated attempt to add access token");
            false
        }
    }

    /// Look up a token and check it covers `scope`.
    ///
    /// Unknown, invalidated and expired tokens fail with `invalid_token`
    /// before the scope is considered.
    pub async fn get_token(
        &self,
        token_id: &str,
        scope: Option<&str>,
    ) -> Result<Arc<AccessToken>, OAuthError> {
        let Ok(token) = self.inner.get(token_id).await else {
            tracing::debug!("Request for access token that is not registered");
            return Err(OAuthError::invalid_token("Access token is not registered"));
        };

        if !token.is_valid() {
            tracing::debug!("Request for invalidated access token");
            return Err(OAuthError::invalid_token("Access token has been invalidated"));
        }

        if token.is_expired() {
            tracing::debug!("Request for expired access token");
            return Err(OAuthError::invalid_token("Access token has expired"));
        }

        let requested = scope.map(scope::scope_string_to_list).unwrap_or_default();
        if !scope::is_scope_granted(&token.scope, &requested) {
            tracing::debug!(?requested, granted = ?token.scope, "Access token lacks scope");
            return Err(OAuthError::new(
                ErrorCode::InsufficientScope,
                "Access token was not granted the requested scope",
            ));
        }

        Ok(token)
    }
}
