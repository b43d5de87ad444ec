use crate::clock::Clock;
use crate::crypto::{random_token, sha256_hex};
use crate::error::OAuthError;
use crate::model::AuthorizationCode;
use crate::pkce;
use crate::store::{CodeConsumption, CodeRepository};
use crate::validator::ValidatedAuthorization;
use log::{debug, warn};
use std::sync::Arc;

pub const DEFAULT_CODE_TTL: i64 = 600;

/// Short-lived, single-use authorization codes bound to a PKCE challenge.
///
/// Codes are handed out once and stored only as their SHA-256 digest.
pub struct AuthorizationCodeStore {
    codes: Arc<dyn CodeRepository>,
    clock: Arc<dyn Clock>,
    ttl: i64,
}

impl AuthorizationCodeStore {
    pub fn new(codes: Arc<dyn CodeRepository>, clock: Arc<dyn Clock>, ttl: i64) -> Self {
        Self { codes, clock, ttl }
    }

    /// Issue a code for an approved authorization and return its value
    pub fn issue(
        &self,
        user_id: &str,
        authorization: &ValidatedAuthorization,
    ) -> Result<String, OAuthError> {
        let code = random_token();
        let now = self.clock.now();
        self.codes.insert_code(AuthorizationCode {
            code: sha256_hex(&code),
            client_id: authorization.client.id.clone(),
            user_id: user_id.to_string(),
            redirect_uri: authorization.redirect_uri.clone(),
            scope: authorization.scope.clone(),
            code_challenge: authorization.code_challenge.clone(),
            code_challenge_method: pkce::METHOD_S256.to_string(),
            nonce: authorization.nonce.clone(),
            issued_at: now,
            expires_at: now + self.ttl,
            consumed: false,
        })?;
        debug!(
            "Issued authorization code for user '{}' via client '{}', expires in {}s",
            user_id, authorization.client.id, self.ttl
        );
        Ok(code)
    }

    /// Redeem a code. The code is burnt by the first attempt whatever its
    /// outcome, so a failed exchange cannot be retried with other parameters.
    pub fn consume(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<AuthorizationCode, OAuthError> {
        let record = match self.codes.consume_code(&sha256_hex(code))? {
            CodeConsumption::Consumed(record) => record,
            CodeConsumption::AlreadyConsumed => {
                warn!("Authorization code replayed by client '{}'", client_id);
                return Err(OAuthError::invalid_grant("authorization code already used"));
            }
            CodeConsumption::NotFound => {
                return Err(OAuthError::invalid_grant("authorization code is invalid"));
            }
        };

        if record.is_expired(self.clock.now()) {
            return Err(OAuthError::invalid_grant("authorization code expired"));
        }
        if record.client_id != client_id {
            warn!(
                "Client '{}' presented a code issued to '{}'",
                client_id, record.client_id
            );
            return Err(OAuthError::invalid_grant("authorization code is invalid"));
        }
        if record.redirect_uri != redirect_uri {
            return Err(OAuthError::invalid_grant("redirect_uri does not match"));
        }
        if !pkce::verify(code_verifier, &record.code_challenge) {
            warn!("PKCE verification failed for client '{}'", client_id);
            return Err(OAuthError::invalid_grant("code_verifier does not match"));
        }

        debug!(
            "Consumed authorization code for user '{}' via client '{}'",
            record.user_id, record.client_id
        );
        Ok(record)
    }

    pub fn purge_expired(&self) -> Result<usize, OAuthError> {
        Ok(self.codes.purge_expired_codes(self.clock.now())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::tests::web_client;
    use crate::scope::ScopeSet;
    use crate::store::MemoryStore;
    use crate::validator::tests::{CHALLENGE, VERIFIER};

    const REDIRECT: &str = "https://app.example/callback";

    fn authorization() -> ValidatedAuthorization {
        ValidatedAuthorization {
            client: web_client(),
            redirect_uri: REDIRECT.to_string(),
            scope: ScopeSet::parse("openid profile"),
            state: Some("xyz".to_string()),
            code_challenge: CHALLENGE.to_string(),
            nonce: Some("nonce-1".to_string()),
        }
    }

    fn code_store() -> (Arc<ManualClock>, AuthorizationCodeStore) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store =
            AuthorizationCodeStore::new(Arc::new(MemoryStore::new()), clock.clone(), DEFAULT_CODE_TTL);
        (clock, store)
    }

    #[test]
    fn test_consume_once() {
        let (_, store) = code_store();
        let code = store.issue("alice", &authorization()).unwrap();

        let record = store.consume(&code, "web-app", REDIRECT, VERIFIER).unwrap();
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.nonce.as_deref(), Some("nonce-1"));
        assert_eq!(record.scope.to_string(), "openid profile");

        let err = store.consume(&code, "web-app", REDIRECT, VERIFIER).unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }

    #[test]
    fn test_unknown_code() {
        let (_, store) = code_store();
        let err = store.consume("made-up", "web-app", REDIRECT, VERIFIER).unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }

    #[test]
    fn test_expired_code() {
        let (clock, store) = code_store();
        let code = store.issue("alice", &authorization()).unwrap();
        clock.advance(DEFAULT_CODE_TTL);
        let err = store.consume(&code, "web-app", REDIRECT, VERIFIER).unwrap_err();
        assert_eq!(err.error_code(), "invalid_grant");
    }

    #[test]
    fn test_mismatches_burn_the_code() {
        let (_, store) = code_store();
        let cases: [(&str, &str, &str); 3] = [
            ("other-client", REDIRECT, VERIFIER),
            ("web-app", "https://app.example/other", VERIFIER),
            ("web-app", REDIRECT, "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXX"),
        ];
        for (client_id, redirect_uri, verifier) in cases {
            let code = store.issue("alice", &authorization()).unwrap();
            let err = store
                .consume(&code, client_id, redirect_uri, verifier)
                .unwrap_err();
            assert_eq!(err.error_code(), "invalid_grant");
            // The correct parameters no longer help
            assert!(store.consume(&code, "web-app", REDIRECT, VERIFIER).is_err());
        }
    }

    #[test]
    fn test_concurrent_exchange_has_one_winner() {
        let (_, store) = code_store();
        let code = store.issue("alice", &authorization()).unwrap();

        let successes = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| store.consume(&code, "web-app", REDIRECT, VERIFIER).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_purge_expired() {
        let (clock, store) = code_store();
        store.issue("alice", &authorization()).unwrap();
        assert_eq!(store.purge_expired().unwrap(), 0);
        clock.advance(DEFAULT_CODE_TTL + 1);
        assert_eq!(store.purge_expired().unwrap(), 1);
    }
}
