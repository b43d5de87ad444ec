use crate::clock::Clock;
use crate::error::OAuthError;
use crate::model::{Client, ConsentGrant};
use crate::scope::ScopeSet;
use crate::store::{ConsentRepository, TokenRepository};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentStatus {
    Granted,
    /// Carries the requested scopes not yet approved. Empty when the client
    /// forces consent on every request.
    NeedsConsent { missing: ScopeSet },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ConsentDecision {
    Allow,
    Deny,
}

/// A scope with the text shown on the consent screen
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ScopeDescription {
    pub scope: String,
    pub description: String,
}

pub fn describe_scope(scope: &str) -> ScopeDescription {
    let description = match scope {
        "openid" => "Sign you in with your account".to_string(),
        "profile" => "View your basic profile (name, username)".to_string(),
        "email" => "View your email address".to_string(),
        "offline_access" => "Stay signed in when you are not using the app".to_string(),
        other => match other.split_once(':') {
            Some((resource, "read")) => format!("Read your {resource}"),
            Some((resource, "write")) => format!("Modify your {resource}"),
            Some((resource, action)) => format!("{action} on your {resource}"),
            None => format!("Access '{other}'"),
        },
    };
    ScopeDescription {
        scope: scope.to_string(),
        description,
    }
}

/// Tracks the scopes each user has approved for each client
pub struct ConsentManager {
    consents: Arc<dyn ConsentRepository>,
    tokens: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
}

impl ConsentManager {
    pub fn new(
        consents: Arc<dyn ConsentRepository>,
        tokens: Arc<dyn TokenRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            consents,
            tokens,
            clock,
        }
    }

    pub fn check(
        &self,
        user_id: &str,
        client: &Client,
        scopes: &ScopeSet,
    ) -> Result<ConsentStatus, OAuthError> {
        if client.require_consent {
            return Ok(ConsentStatus::NeedsConsent {
                missing: ScopeSet::new(),
            });
        }
        let granted = self
            .consents
            .find_consent(user_id, &client.id)?
            .map(|g| g.scope)
            .unwrap_or_default();
        if scopes.is_subset_of(&granted) {
            Ok(ConsentStatus::Granted)
        } else {
            Ok(ConsentStatus::NeedsConsent {
                missing: scopes.difference(&granted),
            })
        }
    }

    /// Apply the user's decision. Approval merges `scopes` into the stored
    /// grant and returns it; denial yields `access_denied`.
    pub fn record(
        &self,
        user_id: &str,
        client_id: &str,
        scopes: &ScopeSet,
        decision: ConsentDecision,
    ) -> Result<ConsentGrant, OAuthError> {
        if decision == ConsentDecision::Deny {
            info!("User '{}' denied consent to client '{}'", user_id, client_id);
            return Err(OAuthError::AccessDenied(
                "The user denied the request".to_string(),
            ));
        }
        let grant = self
            .consents
            .merge_consent(user_id, client_id, scopes, self.clock.now())?;
        info!(
            "User '{}' granted '{}' to client '{}'",
            user_id, scopes, client_id
        );
        Ok(grant)
    }

    pub fn find(&self, user_id: &str, client_id: &str) -> Result<Option<ConsentGrant>, OAuthError> {
        Ok(self.consents.find_consent(user_id, client_id)?)
    }

    /// Withdraw consent and every refresh token issued under it.
    /// Returns false when there was no grant.
    pub fn revoke(&self, user_id: &str, client_id: &str) -> Result<bool, OAuthError> {
        let existed = self.consents.delete_consent(user_id, client_id)?;
        let refresh_tokens = self.tokens.refresh_tokens_for(user_id, client_id)?;
        for id in &refresh_tokens {
            self.tokens.revoke_refresh_token(id)?;
        }
        info!(
            "Revoked consent of user '{}' for client '{}' ({} refresh tokens)",
            user_id,
            client_id,
            refresh_tokens.len()
        );
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::tests::web_client;
    use crate::store::{MemoryStore, StorageResult};
    use parking_lot::Mutex;

    type Interleaved = Box<dyn FnOnce(&MemoryStore) + Send>;

    /// Delegates to a [`MemoryStore`], running a queued approval from another
    /// session right after the next call returns.
    struct InterleavedConsents {
        inner: Arc<MemoryStore>,
        pending: Mutex<Option<Interleaved>>,
    }

    impl InterleavedConsents {
        fn then<T>(&self, result: StorageResult<T>) -> StorageResult<T> {
            let pending = self.pending.lock().take();
            if let Some(change) = pending {
                change(&self.inner);
            }
            result
        }
    }

    impl ConsentRepository for InterleavedConsents {
        fn find_consent(
            &self,
            user_id: &str,
            client_id: &str,
        ) -> StorageResult<Option<ConsentGrant>> {
            self.then(self.inner.find_consent(user_id, client_id))
        }

        fn merge_consent(
            &self,
            user_id: &str,
            client_id: &str,
            scope: &ScopeSet,
            now: i64,
        ) -> StorageResult<ConsentGrant> {
            self.then(self.inner.merge_consent(user_id, client_id, scope, now))
        }

        fn delete_consent(&self, user_id: &str, client_id: &str) -> StorageResult<bool> {
            self.then(self.inner.delete_consent(user_id, client_id))
        }
    }

    fn manager() -> (Arc<MemoryStore>, ConsentManager) {
        let store = Arc::new(MemoryStore::new());
        let manager = ConsentManager::new(
            store.clone(),
            store.clone(),
            Arc::new(ManualClock::new(1_000)),
        );
        (store, manager)
    }

    #[test]
    fn test_needs_consent_until_recorded() {
        let (_, manager) = manager();
        let client = web_client();
        let scopes = ScopeSet::parse("openid profile");

        assert_eq!(
            manager.check("alice", &client, &scopes).unwrap(),
            ConsentStatus::NeedsConsent {
                missing: scopes.clone()
            }
        );
        manager
            .record("alice", &client.id, &scopes, ConsentDecision::Allow)
            .unwrap();
        assert_eq!(
            manager.check("alice", &client, &scopes).unwrap(),
            ConsentStatus::Granted
        );
        assert_eq!(
            manager
                .check("alice", &client, &ScopeSet::parse("openid"))
                .unwrap(),
            ConsentStatus::Granted
        );
    }

    #[test]
    fn test_record_merges_scopes() {
        let (_, manager) = manager();
        let client = web_client();
        manager
            .record("alice", &client.id, &ScopeSet::parse("openid profile"), ConsentDecision::Allow)
            .unwrap();
        assert_eq!(
            manager
                .check("alice", &client, &ScopeSet::parse("openid email"))
                .unwrap(),
            ConsentStatus::NeedsConsent {
                missing: ScopeSet::parse("email")
            }
        );
        let grant = manager
            .record("alice", &client.id, &ScopeSet::parse("email"), ConsentDecision::Allow)
            .unwrap();
        assert_eq!(grant.scope.to_string(), "openid profile email");
        assert_eq!(grant.granted_at, 1_000);
    }

    #[test]
    fn test_approval_from_another_session_is_not_lost() {
        let store = Arc::new(MemoryStore::new());
        store
            .merge_consent("alice", "web-app", &ScopeSet::parse("openid"), 0)
            .unwrap();
        let other_session: Interleaved = Box::new(|store: &MemoryStore| {
            store
                .merge_consent("alice", "web-app", &ScopeSet::parse("email"), 0)
                .unwrap();
        });
        let consents = Arc::new(InterleavedConsents {
            inner: store.clone(),
            pending: Mutex::new(Some(other_session)),
        });
        let manager = ConsentManager::new(
            consents.clone(),
            store.clone(),
            Arc::new(ManualClock::new(1_000)),
        );

        manager
            .record("alice", "web-app", &ScopeSet::parse("profile"), ConsentDecision::Allow)
            .unwrap();
        assert!(consents.pending.lock().is_none());
        let grant = manager.find("alice", "web-app").unwrap().unwrap();
        assert_eq!(grant.scope, ScopeSet::parse("openid profile email"));
    }

    #[test]
    fn test_concurrent_approvals_keep_every_scope() {
        let (_, manager) = manager();
        let scopes = ["openid", "profile", "email", "offline_access", "docs:read", "docs:write"];
        std::thread::scope(|s| {
            for scope in scopes {
                let manager = &manager;
                s.spawn(move || {
                    manager
                        .record("alice", "web-app", &ScopeSet::parse(scope), ConsentDecision::Allow)
                        .unwrap();
                });
            }
        });
        let grant = manager.find("alice", "web-app").unwrap().unwrap();
        let expected: ScopeSet = scopes.into_iter().collect();
        assert_eq!(grant.scope.len(), expected.len());
        assert!(expected.is_subset_of(&grant.scope));
    }

    #[test]
    fn test_deny_is_access_denied() {
        let (_, manager) = manager();
        let err = manager
            .record("alice", "web-app", &ScopeSet::parse("openid"), ConsentDecision::Deny)
            .unwrap_err();
        assert_eq!(err.error_code(), "access_denied");
        assert!(manager.find("alice", "web-app").unwrap().is_none());
    }

    #[test]
    fn test_forced_consent() {
        let (_, manager) = manager();
        let mut client = web_client();
        client.require_consent = true;
        let scopes = ScopeSet::parse("openid");
        manager
            .record("alice", &client.id, &scopes, ConsentDecision::Allow)
            .unwrap();
        assert!(matches!(
            manager.check("alice", &client, &scopes).unwrap(),
            ConsentStatus::NeedsConsent { .. }
        ));
    }

    #[test]
    fn test_revoke_removes_grant() {
        let (_, manager) = manager();
        let client = web_client();
        let scopes = ScopeSet::parse("openid");
        manager
            .record("alice", &client.id, &scopes, ConsentDecision::Allow)
            .unwrap();
        assert!(manager.revoke("alice", &client.id).unwrap());
        assert!(!manager.revoke("alice", &client.id).unwrap());
        assert!(matches!(
            manager.check("alice", &client, &scopes).unwrap(),
            ConsentStatus::NeedsConsent { .. }
        ));
    }

    #[test]
    fn test_scope_descriptions() {
        assert_eq!(describe_scope("email").description, "View your email address");
        assert_eq!(describe_scope("orders:read").description, "Read your orders");
        assert_eq!(describe_scope("custom").description, "Access 'custom'");
    }
}
