//! Authorization grants and their registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::token::AccessToken;
use super::{ExpiringRegistry, NotFound, expires_after};

/// A single-use authorization code and what it was issued for.
pub struct AuthorizationGrant {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub scope: String,
    pub additional_data: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    redemption: Mutex<Redemption>,
}

#[derive(Default)]
struct Redemption {
    granted: bool,
    replayed: bool,
    token: Weak<AccessToken>,
}

impl AuthorizationGrant {
    #[must_use]
    pub fn new(
        code: String,
        client_id: String,
        redirect_uri: Option<String>,
        scope: String,
        additional_data: HashMap<String, String>,
        lifetime: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = expires_after(created_at, lifetime);
        Self {
            code,
            client_id,
            redirect_uri,
            scope,
            additional_data,
            created_at,
            expires_at,
            redemption: Mutex::new(Redemption::default()),
        }
    }

    fn redemption(&self) -> MutexGuard<'_, Redemption> {
        self.redemption.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a token has been issued (or is being issued) for this grant.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.redemption().granted
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Atomically move the grant from not granted to granted.
    ///
    /// Returns false if another redemption got there first, or if a replay
    /// was ever detected: a replayed grant stays unusable even after a
    /// failed redemption releases it.
    pub fn claim(&self) -> bool {
        let mut redemption = self.redemption();
        if redemption.granted || redemption.replayed {
            return false;
        }
        redemption.granted = true;
        true
    }

    /// Undo a [`claim`](Self::claim) after token generation failed.
    pub fn release(&self) {
        let mut redemption = self.redemption();
        if redemption.token.upgrade().is_none() {
            redemption.granted = false;
        }
    }

    /// Record a replayed redemption and invalidate the token already issued.
    ///
    /// A token attached later (by a redemption still in flight) is
    /// invalidated on attach.
    pub fn revoke_issued_token(&self) {
        let mut redemption = self.redemption();
        redemption.replayed = true;
        if let Some(token) = redemption.token.upgrade() {
            token.invalidate();
            tracing::warn!(code = %self.code, "Authorization grant replayed, token invalidated");
        }
    }

    /// Link the token issued for this grant.
    pub fn attach_token(&self, token: &Arc<AccessToken>) {
        let mut redemption = self.redemption();
        if redemption.replayed {
            token.invalidate();
        }
        redemption.token = Arc::downgrade(token);
    }

    /// The token issued for this grant, while it is still registered.
    #[must_use]
    pub fn token(&self) -> Option<Arc<AccessToken>> {
        self.redemption().token.upgrade()
    }

    /// Additional data value, e.g. the stored user identifier.
    #[must_use]
    pub fn data(&self, key: &str) -> Option<&str> {
        self.additional_data.get(key).map(String::as_str)
    }
}

impl std::fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("granted", &self.is_granted())
            .finish()
    }
}

/// Registry of authorization grants keyed by code.
#[derive(Clone, Debug)]
pub struct AuthorizationGrantRegistry {
    inner: ExpiringRegistry<AuthorizationGrant>,
}

impl AuthorizationGrantRegistry {
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self { inner: ExpiringRegistry::new("AuthorizationGrantRegistry", ttl, max_capacity) }
    }

    /// Register a new grant. Returns false if its code is already registered.
    pub async fn add_grant(&self, grant: Arc<AuthorizationGrant>) -> bool {
        let code = grant.code.clone();
        if self.inner.insert_new(code, grant).await {
            true
        } else {
            tracing::error!("Repeated attempt to add authorization grant");
            false
        }
    }

    pub async fn get_grant(&self, code: &str) -> Result<Arc<AuthorizationGrant>, NotFound> {
        self.inner.get(code).await
    }

    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.inner.contains(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(lifetime: Duration) -> AuthorizationGrant {
        AuthorizationGrant::new(
            "code1".into(),
            "client1".into(),
            Some("https://cb/".into()),
            "read write".into(),
            HashMap::new(),
            lifetime,
        )
    }

    fn token_for(grant: Arc<AuthorizationGrant>) -> Arc<AccessToken> {
        Arc::new(AccessToken::new("tok".into(), grant, "bearer", Duration::from_secs(60)))
    }

    #[test]
    fn test_claim_once() {
        let grant = grant(Duration::from_secs(60));
        assert!(!grant.is_granted());
        assert!(grant.claim());
        assert!(grant.is_granted());
        assert!(!grant.claim());
    }

    #[test]
    fn test_release_after_failed_generation() {
        let grant = grant(Duration::from_secs(60));
        assert!(grant.claim());
        grant.release();
        assert!(!grant.is_granted());
        assert!(grant.claim());
    }

    #[test]
    fn test_replayed_grant_cannot_be_claimed_after_release() {
        let grant = grant(Duration::from_secs(60));
        assert!(grant.claim());
        grant.revoke_issued_token();
        grant.release();

        assert!(!grant.is_granted());
        assert!(!grant.claim());
    }

    #[test]
    fn test_expiry() {
        assert!(grant(Duration::ZERO).is_expired());
        assert!(!grant(Duration::from_secs(60)).is_expired());
    }

    #[test]
    fn test_revoke_invalidates_attached_token() {
        let grant = Arc::new(grant(Duration::from_secs(60)));
        assert!(grant.claim());
        let token = token_for(Arc::clone(&grant));
        grant.attach_token(&token);
        assert!(token.is_valid());

        grant.revoke_issued_token();
        assert!(!token.is_valid());
    }

    #[test]
    fn test_token_attached_after_replay_is_invalid() {
        let grant = Arc::new(grant(Duration::from_secs(60)));
        assert!(grant.claim());
        grant.revoke_issued_token();

        let token = token_for(Arc::clone(&grant));
        grant.attach_token(&token);
        assert!(!token.is_valid());
    }

    #[tokio::test]
    async fn test_registry_rejects_duplicate_code() {
        let registry = AuthorizationGrantRegistry::new(Duration::from_secs(60), 10);
        assert!(registry.add_grant(Arc::new(grant(Duration::from_secs(60)))).await);
        assert!(!registry.add_grant(Arc::new(grant(Duration::from_secs(60)))).await);
        assert!(registry.contains("code1"));
        assert_eq!(registry.get_grant("code1").await.unwrap().client_id, "client1");
        assert!(registry.get_grant("nope").await.is_err());
    }
}
