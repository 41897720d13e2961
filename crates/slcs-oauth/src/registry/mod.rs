//! Expiring key-value registries for grants and tokens.
//!
//! Registries evict entries after a TTL. Eviction is advisory: callers check
//! the entity's own `expires_at` as well.

mod grant;
mod token;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;

pub use grant::{AuthorizationGrant, AuthorizationGrantRegistry};
pub use token::{AccessToken, AccessTokenRegistry};

/// Random unguessable identifier built from two UUIDs (256 bits).
#[must_use]
pub fn random_token() -> String {
    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}

/// `created_at + lifetime`, saturating at the largest representable time.
pub(crate) fn expires_after(created_at: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(lifetime)
        .ok()
        .and_then(|delta| created_at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Longest TTL handed to the cache; moka rejects anything near 1000 years.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Lookup of a key that is not (or no longer) registered.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{registry}: no entry for key")]
pub struct NotFound {
    /// Name of the registry searched
    pub registry: &'static str,
}

/// A concurrent key-value store whose entries expire after a fixed TTL.
pub struct ExpiringRegistry<V> {
    name: &'static str,
    entries: Cache<String, Arc<V>>,
}

impl<V: Send + Sync + 'static> ExpiringRegistry<V> {
    #[must_use]
    pub fn new(name: &'static str, ttl: Duration, max_capacity: u64) -> Self {
        let entries =
            Cache::builder().max_capacity(max_capacity).time_to_live(ttl.min(MAX_TTL)).build();
        Self { name, entries }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub async fn put(&self, key: impl Into<String>, value: Arc<V>) {
        self.entries.insert(key.into(), value).await;
    }

    /// Store `value` under `key` only if the key is free.
    ///
    /// Returns false, leaving the existing entry untouched, if the key is
    /// already registered.
    pub async fn insert_new(&self, key: impl Into<String>, value: Arc<V>) -> bool {
        let entry = self.entries.entry(key.into()).or_insert_with(async move { value }).await;
        entry.is_fresh()
    }

    /// Remove and return the entry under `key`.
    ///
    /// Of several concurrent callers only one receives the value.
    pub async fn take(&self, key: &str) -> Result<Arc<V>, NotFound> {
        self.entries.remove(key).await.ok_or(NotFound { registry: self.name })
    }

    pub async fn get(&self, key: &str) -> Result<Arc<V>, NotFound> {
        self.entries.get(key).await.ok_or(NotFound { registry: self.name })
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<V> Clone for ExpiringRegistry<V> {
    fn clone(&self) -> Self {
        Self { name: self.name, entries: self.entries.clone() }
    }
}

impl<V> std::fmt::Debug for ExpiringRegistry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringRegistry")
            .field("name", &self.name)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
