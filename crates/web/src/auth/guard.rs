//! Login guard: credential verification, brute-force lockout, and
//! credential rotation.
//!
//! Every store round-trip is bounded by a timeout and runs off the request
//! path; on timeout or store failure the guard fails closed. A missing
//! account is answered exactly like a wrong secret, with no persistence and
//! no audit write, so the response does not confirm that a username exists.

use chrono::Utc;
use labledger_common::{
    AuditAction, AuditEntry, AuditSink, AuthConfig, Database, Error, Result, Role,
};
use serde::Serialize;
use tracing::{debug, warn};

/// Identity facts returned to the HTTP layer on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticatedAccount {
    pub account_id: i64,
    pub username: String,
    pub role: Role,
    pub must_change_credential: bool,
}

/// Decision produced by [`LoginGuard::authenticate`]. Every branch of the
/// algorithm maps to exactly one variant; none of them is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Authenticated(AuthenticatedAccount),
    /// Unknown username or wrong secret; the two are indistinguishable.
    /// `remaining_attempts` is present only after a wrong secret against an
    /// existing account.
    InvalidCredentials { remaining_attempts: Option<u32> },
    AccountDisabled,
    AccountLocked { retry_after_minutes: i64 },
}

/// Decision produced by [`LoginGuard::rotate`].
#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    Rotated,
    WrongOldCredential,
    WeakCredential(&'static str),
}

/// Validates credentials against stored state and enforces attempt-count
/// lockout. The store handle, audit sink, and configuration are passed in
/// explicitly; the guard holds no ambient state.
pub struct LoginGuard {
    db: Database,
    audit: AuditSink,
    config: AuthConfig,
}

impl LoginGuard {
    pub fn new(db: Database, audit: AuditSink, config: AuthConfig) -> Self {
        Self { db, audit, config }
    }

    /// Authenticate a username/secret pair.
    pub async fn authenticate(
        &self,
        username: &str,
        supplied_secret: &str,
        source: Option<String>,
    ) -> Result<AuthOutcome> {
        // Callers validate input first; empty values are still rejected here.
        if username.is_empty() || supplied_secret.is_empty() {
            return Ok(AuthOutcome::InvalidCredentials {
                remaining_attempts: None,
            });
        }

        let lookup = username.to_string();
        let account = self
            .with_store(move |db| db.find_account_by_username(&lookup))
            .await?;
        let Some(account) = account else {
            // No persistence and no audit entry on this branch.
            return Ok(AuthOutcome::InvalidCredentials {
                remaining_attempts: None,
            });
        };

        if !account.active {
            return Ok(AuthOutcome::AccountDisabled);
        }

        let now = Utc::now().timestamp();
        if let Some(until) = account.locked_until {
            if until > now {
                return Ok(AuthOutcome::AccountLocked {
                    retry_after_minutes: minutes_ceil(until - now),
                });
            }
        }

        if !verify_secret(supplied_secret.to_string(), account.credential_hash.clone()).await {
            let account_id = account.id;
            let count = self
                .with_store(move |db| db.increment_failed_attempts(account_id))
                .await?;

            if count >= self.config.max_login_attempts {
                let locked_until = Utc::now().timestamp() + self.config.lock_duration_secs();
                self.with_store(move |db| db.set_lockout(account_id, locked_until))
                    .await?;
                debug!(username = %account.username, attempts = count, "account locked");
                return Ok(AuthOutcome::AccountLocked {
                    retry_after_minutes: self.config.lock_duration_minutes(),
                });
            }

            return Ok(AuthOutcome::InvalidCredentials {
                remaining_attempts: Some(self.config.max_login_attempts - count),
            });
        }

        let account_id = account.id;
        let now = Utc::now().timestamp();
        self.with_store(move |db| db.record_successful_login(account_id, now))
            .await?;

        self.audit.append(
            AuditEntry::new(account_id, AuditAction::Login, "account", Some(account_id))
                .with_source(source),
        );

        Ok(AuthOutcome::Authenticated(AuthenticatedAccount {
            account_id,
            username: account.username,
            role: account.role,
            must_change_credential: account.must_change_credential,
        }))
    }

    /// Rotate an account's credential. Requires a valid session for the
    /// account (enforced before this runs). Other live sessions for the
    /// account stay valid after rotation.
    pub async fn rotate(
        &self,
        account_id: i64,
        old_secret: &str,
        new_secret: &str,
        source: Option<String>,
    ) -> Result<RotationOutcome> {
        let account = self
            .with_store(move |db| db.find_account_by_id(account_id))
            .await?;
        let Some(account) = account else {
            // Session references an account the store no longer returns.
            warn!(account_id, "rotation requested for unknown account");
            return Ok(RotationOutcome::WrongOldCredential);
        };

        if !verify_secret(old_secret.to_string(), account.credential_hash.clone()).await {
            return Ok(RotationOutcome::WrongOldCredential);
        }

        if let Err(reason) = validate_secret_policy(new_secret) {
            return Ok(RotationOutcome::WeakCredential(reason));
        }

        let hash = hash_secret(new_secret.to_string(), self.config.hash_cost).await?;
        self.with_store(move |db| db.update_credential_hash(account_id, &hash))
            .await?;

        self.audit.append(
            AuditEntry::new(account_id, AuditAction::Update, "account", Some(account_id))
                .with_source(source),
        );

        Ok(RotationOutcome::Rotated)
    }

    /// Run a store operation off the request path with a bounded timeout.
    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || op(&db));
        match tokio::time::timeout(self.config.store_timeout(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Internal(format!("store task failed: {}", join))),
            Err(_) => Err(Error::Timeout {
                millis: self.config.store_timeout_ms,
            }),
        }
    }
}

/// Minimum length 8, at least one alphabetic and one numeric character.
pub fn validate_secret_policy(secret: &str) -> std::result::Result<(), &'static str> {
    if secret.chars().count() < 8 {
        return Err("password must be at least 8 characters");
    }
    if !secret.chars().any(|c| c.is_alphabetic()) || !secret.chars().any(|c| c.is_numeric()) {
        return Err("password must contain both letters and digits");
    }
    Ok(())
}

/// Hash a secret with bcrypt on the blocking pool.
pub async fn hash_secret(secret: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        bcrypt::hash(secret, cost).map_err(|e| Error::Hash(e.to_string()))
    })
    .await
    .map_err(|e| Error::Internal(format!("hash task failed: {}", e)))?
}

/// Verify a secret against a stored hash on the blocking pool. Any failure
/// (malformed hash included) counts as a mismatch.
async fn verify_secret(secret: String, hash: String) -> bool {
    match tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hash)).await {
        Ok(Ok(matched)) => matched,
        Ok(Err(e)) => {
            warn!(error = %e, "credential hash could not be verified");
            false
        }
        Err(e) => {
            warn!(error = %e, "verify task failed");
            false
        }
    }
}

fn minutes_ceil(seconds: i64) -> i64 {
    (seconds + 59) / 60
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lowest cost bcrypt accepts; keeps the hashing in tests fast.
    const TEST_COST: u32 = 4;

    fn test_config() -> AuthConfig {
        AuthConfig {
            hash_cost: TEST_COST,
            ..AuthConfig::default()
        }
    }

    struct Fixture {
        db: Database,
        audit: AuditSink,
        guard: LoginGuard,
    }

    fn fixture() -> Fixture {
        let db = Database::open_memory().unwrap();
        let audit = AuditSink::spawn(db.clone());
        let guard = LoginGuard::new(db.clone(), audit.clone(), test_config());
        Fixture { db, audit, guard }
    }

    fn add_account(db: &Database, username: &str, secret: &str, role: Role) -> i64 {
        let hash = bcrypt::hash(secret, TEST_COST).unwrap();
        db.create_account(username, &hash, role, false).unwrap()
    }

    #[tokio::test]
    async fn unknown_username_leaves_no_trace() {
        let f = fixture();
        let outcome = f.guard.authenticate("ghost", "whatever1", None).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::InvalidCredentials {
                remaining_attempts: None
            }
        );

        f.audit.flush().await;
        assert!(f.db.find_account_by_username("ghost").unwrap().is_none());
        assert_eq!(f.db.count_audit_entries("login").unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_defensively() {
        let f = fixture();
        for (user, secret) in [("", "secret1x"), ("alice", ""), ("", "")] {
            let outcome = f.guard.authenticate(user, secret, None).await.unwrap();
            assert_eq!(
                outcome,
                AuthOutcome::InvalidCredentials {
                    remaining_attempts: None
                }
            );
        }
    }

    #[tokio::test]
    async fn successful_login_returns_identity_and_audits() {
        let f = fixture();
        let id = add_account(&f.db, "alice", "correct1horse", Role::Student);

        let outcome = f
            .guard
            .authenticate("alice", "correct1horse", Some("127.0.0.1".to_string()))
            .await
            .unwrap();
        match outcome {
            AuthOutcome::Authenticated(acct) => {
                assert_eq!(acct.account_id, id);
                assert_eq!(acct.username, "alice");
                assert_eq!(acct.role, Role::Student);
                assert!(!acct.must_change_credential);
            }
            other => panic!("expected authentication, got {:?}", other),
        }

        f.audit.flush().await;
        assert_eq!(f.db.count_audit_entries("login").unwrap(), 1);
        let account = f.db.find_account_by_id(id).unwrap().unwrap();
        assert!(account.last_authenticated_at.is_some());
    }

    #[tokio::test]
    async fn wrong_secret_counts_down_remaining_attempts() {
        let f = fixture();
        add_account(&f.db, "alice", "correct1horse", Role::Student);

        let outcome = f.guard.authenticate("alice", "wrong", None).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::InvalidCredentials {
                remaining_attempts: Some(4)
            }
        );
        let outcome = f.guard.authenticate("alice", "wrong", None).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::InvalidCredentials {
                remaining_attempts: Some(3)
            }
        );
    }

    #[tokio::test]
    async fn lockout_fires_exactly_at_the_threshold() {
        let f = fixture();
        let id = add_account(&f.db, "alice", "correct1horse", Role::Student);

        // Four failures: still invalid-credentials, one attempt left.
        for expected_remaining in [4u32, 3, 2, 1] {
            let outcome = f.guard.authenticate("alice", "wrong", None).await.unwrap();
            assert_eq!(
                outcome,
                AuthOutcome::InvalidCredentials {
                    remaining_attempts: Some(expected_remaining)
                }
            );
        }

        // Fifth failure crosses the threshold: locked, full duration reported.
        let outcome = f.guard.authenticate("alice", "wrong", None).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::AccountLocked {
                retry_after_minutes: 10
            }
        );

        let account = f.db.find_account_by_id(id).unwrap().unwrap();
        assert_eq!(account.failed_attempts, 5);
        let until = account.locked_until.expect("lock timestamp set");
        assert!(until > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn locked_account_rejects_even_the_correct_secret() {
        let f = fixture();
        let id = add_account(&f.db, "alice", "correct1horse", Role::Student);
        f.db.set_lockout(id, Utc::now().timestamp() + 600).unwrap();

        let outcome = f
            .guard
            .authenticate("alice", "correct1horse", None)
            .await
            .unwrap();
        match outcome {
            AuthOutcome::AccountLocked { retry_after_minutes } => {
                // Remaining time rounds up to whole minutes.
                assert!(retry_after_minutes >= 1 && retry_after_minutes <= 10);
            }
            other => panic!("expected lock, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn elapsed_lock_admits_the_correct_secret_and_resets() {
        let f = fixture();
        let id = add_account(&f.db, "alice", "correct1horse", Role::Student);
        for _ in 0..3 {
            f.db.increment_failed_attempts(id).unwrap();
        }
        // Lock expired one second ago.
        f.db.set_lockout(id, Utc::now().timestamp() - 1).unwrap();

        let outcome = f
            .guard
            .authenticate("alice", "correct1horse", None)
            .await
            .unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated(_)));

        let account = f.db.find_account_by_id(id).unwrap().unwrap();
        assert_eq!(account.failed_attempts, 0);
        assert!(account.locked_until.is_none());
    }

    #[tokio::test]
    async fn disabled_account_is_reported_before_secret_check() {
        let f = fixture();
        let id = add_account(&f.db, "alice", "correct1horse", Role::Student);
        f.db.toggle_account_active(id).unwrap();

        let outcome = f
            .guard
            .authenticate("alice", "correct1horse", None)
            .await
            .unwrap();
        assert_eq!(outcome, AuthOutcome::AccountDisabled);
    }

    #[tokio::test]
    async fn rotation_rejects_wrong_old_secret_without_mutation() {
        let f = fixture();
        let id = add_account(&f.db, "alice", "correct1horse", Role::Student);
        let before = f.db.find_account_by_id(id).unwrap().unwrap().credential_hash;

        let outcome = f
            .guard
            .rotate(id, "not-the-old-one", "newsecret1", None)
            .await
            .unwrap();
        assert_eq!(outcome, RotationOutcome::WrongOldCredential);

        let after = f.db.find_account_by_id(id).unwrap().unwrap().credential_hash;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn rotation_rejects_weak_secret_without_mutation() {
        let f = fixture();
        let id = add_account(&f.db, "alice", "correct1horse", Role::Student);
        let before = f.db.find_account_by_id(id).unwrap().unwrap().credential_hash;

        // Too short.
        let outcome = f
            .guard
            .rotate(id, "correct1horse", "short1", None)
            .await
            .unwrap();
        assert!(matches!(outcome, RotationOutcome::WeakCredential(_)));

        // Long enough but no digit.
        let outcome = f
            .guard
            .rotate(id, "correct1horse", "lettersonly", None)
            .await
            .unwrap();
        assert!(matches!(outcome, RotationOutcome::WeakCredential(_)));

        let after = f.db.find_account_by_id(id).unwrap().unwrap().credential_hash;
        assert_eq!(before, after);
        f.audit.flush().await;
        assert_eq!(f.db.count_audit_entries("update").unwrap(), 0);
    }

    #[tokio::test]
    async fn rotation_stores_new_hash_clears_flag_and_audits_once() {
        let f = fixture();
        let hash = bcrypt::hash("correct1horse", TEST_COST).unwrap();
        let id = f
            .db
            .create_account("alice", &hash, Role::Student, true)
            .unwrap();

        let outcome = f
            .guard
            .rotate(id, "correct1horse", "longenough1", None)
            .await
            .unwrap();
        assert_eq!(outcome, RotationOutcome::Rotated);

        let account = f.db.find_account_by_id(id).unwrap().unwrap();
        assert!(!account.must_change_credential);
        assert!(bcrypt::verify("longenough1", &account.credential_hash).unwrap());

        f.audit.flush().await;
        assert_eq!(f.db.count_audit_entries("update").unwrap(), 1);

        // The rotated secret now authenticates; the old one no longer does.
        let outcome = f
            .guard
            .authenticate("alice", "longenough1", None)
            .await
            .unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated(_)));
        let outcome = f
            .guard
            .authenticate("alice", "correct1horse", None)
            .await
            .unwrap();
        assert!(matches!(outcome, AuthOutcome::InvalidCredentials { .. }));
    }

    #[test]
    fn secret_policy_boundaries() {
        assert!(validate_secret_policy("abcdefg1").is_ok());
        assert!(validate_secret_policy("abcdef1").is_err()); // 7 chars
        assert!(validate_secret_policy("12345678").is_err()); // digits only
        assert!(validate_secret_policy("abcdefgh").is_err()); // letters only
    }

    #[test]
    fn minute_rounding_is_ceiling() {
        assert_eq!(minutes_ceil(1), 1);
        assert_eq!(minutes_ceil(60), 1);
        assert_eq!(minutes_ceil(61), 2);
        assert_eq!(minutes_ceil(600), 10);
    }
}
