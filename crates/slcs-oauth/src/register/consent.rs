//! Consent decisions made by resource owners.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::scope;

/// A resource owner's decision on a client's request for a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthorization {
    pub user: String,
    pub client_id: String,
    pub scope: Vec<String>,
    pub is_authorized: bool,
}

impl ClientAuthorization {
    #[must_use]
    pub fn new(user: &str, client_id: &str, scope: &str, is_authorized: bool) -> Self {
        Self {
            user: user.to_string(),
            client_id: client_id.to_string(),
            scope: scope::scope_string_to_list(scope),
            is_authorized,
        }
    }

    /// True if this decision applies to `other`: same user and client, and
    /// every scope `other` asks for is in this decision's scope.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        self.user == other.user
            && self.client_id == other.client_id
            && scope::is_scope_granted(&self.scope, &other.scope)
    }
}

type UserAuthorizations = HashMap<String, Vec<ClientAuthorization>>;

/// Consent decisions indexed by user, then client id.
///
/// History is append-only and never pruned.
#[derive(Debug, Default)]
pub struct ClientAuthorizationRegister {
    register: RwLock<HashMap<String, UserAuthorizations>>,
}

impl ClientAuthorizationRegister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision.
    ///
    /// Earlier decisions covering the new one take its `is_authorized`
    /// value, then the new decision is appended.
    pub async fn add_client_authorization(&self, authorization: ClientAuthorization) {
        let mut register = self.register.write().await;
        let decisions = register
            .entry(authorization.user.clone())
            .or_default()
            .entry(authorization.client_id.clone())
            .or_default();

        for existing in decisions.iter_mut().filter(|a| a.covers(&authorization)) {
            existing.is_authorized = authorization.is_authorized;
        }

        tracing::debug!(
            user = %authorization.user,
            client_id = %authorization.client_id,
            is_authorized = authorization.is_authorized,
            "Recorded client authorization"
        );
        decisions.push(authorization);
    }

    /// Decision covering a request, or `None` if the user was never asked.
    pub async fn is_client_authorized_by_user(
        &self,
        user: &str,
        client_id: &str,
        scope: &str,
    ) -> Option<bool> {
        let request = ClientAuthorization::new(user, client_id, scope, true);
        let register = self.register.read().await;
        register
            .get(user)?
            .get(client_id)?
            .iter()
            .find(|a| a.covers(&request))
            .map(|a| a.is_authorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_is_subset() {
        let granted = ClientAuthorization::new("alice", "C1", "read write", true);
        assert!(granted.covers(&ClientAuthorization::new("alice", "C1", "read", true)));
        assert!(granted.covers(&ClientAuthorization::new("alice", "C1", "write read", true)));
        assert!(granted.covers(&ClientAuthorization::new("alice", "C1", "", true)));
        assert!(!granted.covers(&ClientAuthorization::new("alice", "C1", "admin", true)));
        assert!(!granted.covers(&ClientAuthorization::new("bob", "C1", "read", true)));
        assert!(!granted.covers(&ClientAuthorization::new("alice", "C2", "read", true)));
    }

    #[tokio::test]
    async fn test_unknown_user_has_no_decision() {
        let register = ClientAuthorizationRegister::new();
        assert_eq!(register.is_client_authorized_by_user("alice", "C1", "read").await, None);
    }

    #[tokio::test]
    async fn test_broader_decision_covers_narrower_request() {
        let register = ClientAuthorizationRegister::new();
        register
            .add_client_authorization(ClientAuthorization::new("alice", "C1", "read write", true))
            .await;

        assert_eq!(register.is_client_authorized_by_user("alice", "C1", "read").await, Some(true));
        assert_eq!(register.is_client_authorized_by_user("alice", "C1", "admin").await, None);
        assert_eq!(register.is_client_authorized_by_user("alice", "C2", "read").await, None);
    }

    #[tokio::test]
    async fn test_later_decision_overwrites_covering_records() {
        let register = ClientAuthorizationRegister::new();
        register
            .add_client_authorization(ClientAuthorization::new("alice", "C1", "read", true))
            .await;
        register
            .add_client_authorization(ClientAuthorization::new("alice", "C1", "read", false))
            .await;

        assert_eq!(register.is_client_authorized_by_user("alice", "C1", "read").await, Some(false));
    }

    #[tokio::test]
    async fn test_narrower_decision_leaves_broader_record() {
        let register = ClientAuthorizationRegister::new();
        register
            .add_client_authorization(ClientAuthorization::new("alice", "C1", "read", true))
            .await;
        register
            .add_client_authorization(ClientAuthorization::new("alice", "C1", "read write", false))
            .await;

        // "read" does not cover "read write", so the first record keeps its flag
        // and is still the first match for a "read" request.
        assert_eq!(register.is_client_authorized_by_user("alice", "C1", "read").await, Some(true));
        assert_eq!(
            register.is_client_authorized_by_user("alice", "C1", "write").await,
            Some(false)
        );
    }
}
