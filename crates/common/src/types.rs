//! Core types shared across the LabLedger crates.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Account role. The decision table in the access policy treats `Admin`
/// as an unconditional permit; everything else is ownership/visibility based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Result<Role> {
        match s {
            "admin" => Ok(Role::Admin),
            "student" => Ok(Role::Student),
            other => Err(Error::Internal(format!("unknown role: {}", other))),
        }
    }
}

/// A stored identity record. Mutated only by the login guard (lockout
/// fields, success timestamp) and by credential rotation (hash, flag);
/// never physically deleted -- deactivation flips `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub role: Role,
    pub active: bool,
    pub must_change_credential: bool,
    pub failed_attempts: u32,
    /// Unix seconds. Strictly in the future at set-time; cleared on success.
    pub locked_until: Option<i64>,
    pub last_authenticated_at: Option<i64>,
    pub created_at: i64,
}

/// Security-relevant action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Login,
    Logout,
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

/// Append-only audit record. Written best-effort; a failed write must never
/// fail the operation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub account_id: i64,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub source_address: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
    pub detail: Option<serde_json::Value>,
}

impl AuditEntry {
    pub fn new(
        account_id: i64,
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: Option<i64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id,
            action,
            entity_type: entity_type.into(),
            entity_id,
            source_address: None,
            timestamp: chrono::Utc::now().timestamp(),
            detail: None,
        }
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source_address = source;
        self
    }
}

/// A chemical formula row as stored. Soft-deleted rows are invisible to
/// every read path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub owner_account_id: i64,
    pub public: bool,
    pub total_volume_ml: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields required to create a formula.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFormula {
    pub name: String,
    pub description: Option<String>,
    pub owner_account_id: i64,
    pub public: bool,
    pub total_volume_ml: f64,
}
