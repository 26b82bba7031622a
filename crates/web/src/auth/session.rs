//! Server-side session management.
//!
//! Sessions are ephemeral proofs of authenticated identity with sliding
//! idle expiration. The manager is the only component that mutates session
//! records. Identity fields are fixed at creation: a role change on the
//! underlying account takes effect at the next login, not retroactively.

use chrono::{DateTime, Duration, Utc};
use labledger_common::Role;
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;

/// An issued session. Cloned out on validation; callers never hold a
/// reference into the session table.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub account_id: i64,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of a session lookup.
#[derive(Debug, Clone)]
pub enum SessionLookup {
    Valid(Session),
    Expired,
    NotFound,
}

/// Issues, validates, and destroys sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Mint a session for an authenticated account and return its opaque
    /// token: 32 bytes from the OS RNG, hex encoded.
    pub fn create(&self, account_id: i64, username: String, role: Role) -> String {
        let mut buf = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        let token = hex::encode(buf);

        let now = Utc::now();
        let session = Session {
            session_id: token.clone(),
            account_id,
            username,
            role,
            created_at: now,
            last_activity_at: now,
            expires_at: now + self.idle_timeout,
        };
        self.sessions.write().insert(token.clone(), session);
        token
    }

    /// Validate a token, sliding `expires_at` forward on success. A session
    /// seen at exactly `expires_at` is still valid; one instant past, it is
    /// expired and eagerly removed.
    pub fn validate(&self, token: &str) -> SessionLookup {
        self.validate_at(token, Utc::now())
    }

    fn validate_at(&self, token: &str, now: DateTime<Utc>) -> SessionLookup {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(token) else {
            return SessionLookup::NotFound;
        };
        if now > session.expires_at {
            sessions.remove(token);
            return SessionLookup::Expired;
        }
        session.last_activity_at = now;
        session.expires_at = now + self.idle_timeout;
        SessionLookup::Valid(session.clone())
    }

    /// Destroy a session. Idempotent: destroying an unknown or already
    /// destroyed token is not an error.
    pub fn destroy(&self, token: &str) {
        self.sessions.write().remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Duration::minutes(30))
    }

    #[test]
    fn create_validate_round_trip() {
        let mgr = manager();
        let token = mgr.create(7, "alice".to_string(), Role::Student);

        match mgr.validate(&token) {
            SessionLookup::Valid(s) => {
                assert_eq!(s.account_id, 7);
                assert_eq!(s.username, "alice");
                assert_eq!(s.role, Role::Student);
            }
            other => panic!("expected valid session, got {:?}", other),
        }
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let mgr = manager();
        let a = mgr.create(1, "a".to_string(), Role::Student);
        let b = mgr.create(1, "a".to_string(), Role::Student);
        // 32 bytes hex encoded
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_token_is_not_found() {
        let mgr = manager();
        assert!(matches!(mgr.validate("bogus"), SessionLookup::NotFound));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mgr = manager();
        let token = mgr.create(1, "alice".to_string(), Role::Admin);
        mgr.destroy(&token);
        mgr.destroy(&token);
        assert!(matches!(mgr.validate(&token), SessionLookup::NotFound));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let mgr = manager();
        let token = mgr.create(1, "alice".to_string(), Role::Student);
        let expires_at = match mgr.validate(&token) {
            SessionLookup::Valid(s) => s.expires_at,
            other => panic!("expected valid session, got {:?}", other),
        };

        // Exactly at expires_at: still valid.
        assert!(matches!(
            mgr.validate_at(&token, expires_at),
            SessionLookup::Valid(_)
        ));
    }

    #[test]
    fn expired_session_is_removed() {
        let mgr = manager();
        let token = mgr.create(1, "alice".to_string(), Role::Student);
        let past_expiry = Utc::now() + Duration::minutes(31);

        assert!(matches!(
            mgr.validate_at(&token, past_expiry),
            SessionLookup::Expired
        ));
        // Eagerly removed: the next lookup no longer sees it at all.
        assert!(matches!(mgr.validate(&token), SessionLookup::NotFound));
    }

    #[test]
    fn validation_slides_expiration_forward() {
        let mgr = manager();
        let token = mgr.create(1, "alice".to_string(), Role::Student);

        let later = Utc::now() + Duration::minutes(20);
        let refreshed = match mgr.validate_at(&token, later) {
            SessionLookup::Valid(s) => s,
            other => panic!("expected valid session, got {:?}", other),
        };
        assert_eq!(refreshed.expires_at, later + Duration::minutes(30));
        assert_eq!(refreshed.last_activity_at, later);
    }
}
