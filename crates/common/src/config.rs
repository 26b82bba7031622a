//! Authentication and session configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the account-security subsystem.
///
/// Defaults match the deployment knobs the service has always recognized:
/// 5 attempts, 10 minute lock, 30 minute idle timeout, bcrypt cost 10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Failed attempts before an account is locked
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,

    /// Lockout duration in milliseconds
    #[serde(default = "default_lock_duration_ms")]
    pub lock_duration_ms: u64,

    /// Session idle timeout in milliseconds (sliding expiration)
    #[serde(default = "default_session_idle_timeout_ms")]
    pub session_idle_timeout_ms: u64,

    /// bcrypt cost factor
    #[serde(default = "default_hash_cost")]
    pub hash_cost: u32,

    /// Upper bound on any single credential-store round-trip
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Set the Secure flag on the session cookie
    #[serde(default)]
    pub cookie_secure: bool,
}

fn default_max_login_attempts() -> u32 {
    5
}
fn default_lock_duration_ms() -> u64 {
    10 * 60 * 1000
}
fn default_session_idle_timeout_ms() -> u64 {
    30 * 60 * 1000
}
fn default_hash_cost() -> u32 {
    10
}
fn default_store_timeout_ms() -> u64 {
    5000
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: default_max_login_attempts(),
            lock_duration_ms: default_lock_duration_ms(),
            session_idle_timeout_ms: default_session_idle_timeout_ms(),
            hash_cost: default_hash_cost(),
            store_timeout_ms: default_store_timeout_ms(),
            cookie_secure: false,
        }
    }
}

impl AuthConfig {
    /// Build a config from `LABLEDGER_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("LABLEDGER_MAX_LOGIN_ATTEMPTS") {
            cfg.max_login_attempts = v;
        }
        if let Some(v) = env_parse("LABLEDGER_LOCK_DURATION_MS") {
            cfg.lock_duration_ms = v;
        }
        if let Some(v) = env_parse("LABLEDGER_SESSION_IDLE_TIMEOUT_MS") {
            cfg.session_idle_timeout_ms = v;
        }
        if let Some(v) = env_parse("LABLEDGER_HASH_COST") {
            cfg.hash_cost = v;
        }
        if let Some(v) = env_parse("LABLEDGER_STORE_TIMEOUT_MS") {
            cfg.store_timeout_ms = v;
        }
        if let Some(v) = env_parse::<String>("LABLEDGER_COOKIE_SECURE") {
            cfg.cookie_secure = v == "1" || v.eq_ignore_ascii_case("true");
        }
        cfg
    }

    pub fn lock_duration_secs(&self) -> i64 {
        (self.lock_duration_ms / 1000) as i64
    }

    /// Full lock duration, rounded up to whole minutes for display.
    pub fn lock_duration_minutes(&self) -> i64 {
        ((self.lock_duration_ms + 59_999) / 60_000) as i64
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.session_idle_timeout_ms as i64)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_knobs() {
        let cfg = AuthConfig::default();
        assert_eq!(cfg.max_login_attempts, 5);
        assert_eq!(cfg.lock_duration_ms, 600_000);
        assert_eq!(cfg.session_idle_timeout_ms, 1_800_000);
        assert_eq!(cfg.hash_cost, 10);
        assert!(!cfg.cookie_secure);
    }

    #[test]
    fn lock_duration_minutes_rounds_up() {
        let mut cfg = AuthConfig::default();
        assert_eq!(cfg.lock_duration_minutes(), 10);
        cfg.lock_duration_ms = 61_000;
        assert_eq!(cfg.lock_duration_minutes(), 2);
    }
}
