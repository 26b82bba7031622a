//! SQLite database for LabLedger state persistence.
//!
//! The `Database` handle is the credential store of record: the lockout
//! counter lives here and its increment is a single atomic
//! `UPDATE ... RETURNING` under the connection lock, so concurrent failed
//! attempts against one account serialize at the store.

use crate::types::{Account, AuditEntry, FormulaRow, NewFormula, Role};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Accounts table
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                credential_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                must_change_credential INTEGER NOT NULL DEFAULT 0,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                locked_until INTEGER,
                last_authenticated_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_username ON accounts(username);

            -- Formulas table (soft delete)
            CREATE TABLE IF NOT EXISTS formulas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                owner_account_id INTEGER NOT NULL REFERENCES accounts(id),
                public INTEGER NOT NULL DEFAULT 0,
                total_volume_ml REAL NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_formulas_owner ON formulas(owner_account_id);

            -- Append-only audit trail
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id INTEGER,
                source_address TEXT,
                timestamp INTEGER NOT NULL,
                detail_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_account ON audit_log(account_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    /// Create an account. Fails with `AlreadyExists` on a duplicate username.
    pub fn create_account(
        &self,
        username: &str,
        credential_hash: &str,
        role: Role,
        must_change_credential: bool,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        let result = conn.execute(
            "INSERT INTO accounts (username, credential_hash, role, active, must_change_credential, failed_attempts, created_at)
             VALUES (?1, ?2, ?3, 1, ?4, 0, ?5)",
            params![username, credential_hash, role.as_str(), must_change_credential, now],
        );

        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                debug!("Created account {} with id {}", username, id);
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::AlreadyExists {
                    kind: "account".to_string(),
                    id: username.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE username = ?1", ACCOUNT_COLS),
                params![username],
                account_from_row,
            )
            .optional()?;
        row.map(RawAccount::parse).transpose()
    }

    pub fn find_account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLS),
                params![id],
                account_from_row,
            )
            .optional()?;
        row.map(RawAccount::parse).transpose()
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts ORDER BY created_at DESC",
            ACCOUNT_COLS
        ))?;
        let rows = stmt.query_map([], account_from_row)?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?.parse()?);
        }
        Ok(accounts)
    }

    pub fn count_accounts(&self) -> Result<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))?)
    }

    /// Atomically increment the failed-attempt counter and return the new
    /// value. Single statement, so two racing failures cannot both observe
    /// the same count.
    pub fn increment_failed_attempts(&self, account_id: i64) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row(
            "UPDATE accounts SET failed_attempts = failed_attempts + 1
             WHERE id = ?1
             RETURNING failed_attempts",
            params![account_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Set the lockout timestamp. `locked_until` is unix seconds and must be
    /// in the future at set-time; the login guard owns that invariant.
    pub fn set_lockout(&self, account_id: i64, locked_until: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE accounts SET locked_until = ?1 WHERE id = ?2",
            params![locked_until, account_id],
        )?;
        Ok(())
    }

    /// Reset the lockout state and stamp the success timestamp.
    pub fn record_successful_login(&self, account_id: i64, timestamp: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE accounts
             SET failed_attempts = 0, locked_until = NULL, last_authenticated_at = ?1
             WHERE id = ?2",
            params![timestamp, account_id],
        )?;
        Ok(())
    }

    /// Store a new credential hash and clear the forced-rotation flag.
    pub fn update_credential_hash(&self, account_id: i64, hash: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE accounts SET credential_hash = ?1, must_change_credential = 0 WHERE id = ?2",
            params![hash, account_id],
        )?;
        Ok(())
    }

    /// Flip the active flag. Returns the new state, or NotFound.
    pub fn toggle_account_active(&self, account_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let active: Option<bool> = conn
            .query_row(
                "UPDATE accounts SET active = NOT active WHERE id = ?1 RETURNING active",
                params![account_id],
                |r| r.get(0),
            )
            .optional()?;
        active.ok_or_else(|| Error::NotFound {
            kind: "account".to_string(),
            id: account_id.to_string(),
        })
    }

    // ========================================================================
    // Formulas
    // ========================================================================

    pub fn insert_formula(&self, formula: &NewFormula) -> Result<i64> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO formulas (name, description, owner_account_id, public, total_volume_ml, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                formula.name,
                formula.description,
                formula.owner_account_id,
                formula.public,
                formula.total_volume_ml,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch a formula by id. Soft-deleted rows are invisible, so a single
    /// read resolves existence and visibility together.
    pub fn get_formula(&self, id: i64) -> Result<Option<FormulaRow>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM formulas WHERE id = ?1 AND deleted = 0",
                    FORMULA_COLS
                ),
                params![id],
                formula_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List formulas visible to a viewer: admins see everything, everyone
    /// else sees their own plus public ones.
    pub fn list_formulas_for(&self, viewer_account_id: i64, admin: bool) -> Result<Vec<FormulaRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM formulas
             WHERE deleted = 0 AND (?1 OR owner_account_id = ?2 OR public = 1)
             ORDER BY created_at DESC",
            FORMULA_COLS
        ))?;
        let rows = stmt.query_map(params![admin, viewer_account_id], formula_from_row)?;

        let mut formulas = Vec::new();
        for row in rows {
            formulas.push(row?);
        }
        Ok(formulas)
    }

    pub fn update_formula(
        &self,
        id: i64,
        name: &str,
        description: Option<&str>,
        public: bool,
        total_volume_ml: f64,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute(
            "UPDATE formulas
             SET name = ?1, description = ?2, public = ?3, total_volume_ml = ?4, updated_at = ?5
             WHERE id = ?6 AND deleted = 0",
            params![name, description, public, total_volume_ml, now, id],
        )?;
        Ok(rows > 0)
    }

    pub fn soft_delete_formula(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute(
            "UPDATE formulas SET deleted = 1, updated_at = ?1 WHERE id = ?2 AND deleted = 0",
            params![now, id],
        )?;
        Ok(rows > 0)
    }

    // ========================================================================
    // Audit log
    // ========================================================================

    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.conn.lock();
        let detail_json = entry
            .detail
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO audit_log (id, account_id, action, entity_type, entity_id, source_address, timestamp, detail_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.account_id,
                entry.action.as_str(),
                entry.entity_type,
                entry.entity_id,
                entry.source_address,
                entry.timestamp,
                detail_json,
            ],
        )?;
        Ok(())
    }

    pub fn count_audit_entries(&self, action: &str) -> Result<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE action = ?1",
            params![action],
            |r| r.get(0),
        )?)
    }
}

const ACCOUNT_COLS: &str = "id, username, credential_hash, role, active, must_change_credential, failed_attempts, locked_until, last_authenticated_at, created_at";

/// Raw account row before the role string is validated
struct RawAccount {
    id: i64,
    username: String,
    credential_hash: String,
    role: String,
    active: bool,
    must_change_credential: bool,
    failed_attempts: u32,
    locked_until: Option<i64>,
    last_authenticated_at: Option<i64>,
    created_at: i64,
}

impl RawAccount {
    fn parse(self) -> Result<Account> {
        Ok(Account {
            id: self.id,
            username: self.username,
            credential_hash: self.credential_hash,
            role: Role::parse(&self.role)?,
            active: self.active,
            must_change_credential: self.must_change_credential,
            failed_attempts: self.failed_attempts,
            locked_until: self.locked_until,
            last_authenticated_at: self.last_authenticated_at,
            created_at: self.created_at,
        })
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<RawAccount> {
    Ok(RawAccount {
        id: row.get(0)?,
        username: row.get(1)?,
        credential_hash: row.get(2)?,
        role: row.get(3)?,
        active: row.get(4)?,
        must_change_credential: row.get(5)?,
        failed_attempts: row.get(6)?,
        locked_until: row.get(7)?,
        last_authenticated_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const FORMULA_COLS: &str =
    "id, name, description, owner_account_id, public, total_volume_ml, created_at, updated_at";

fn formula_from_row(row: &Row<'_>) -> rusqlite::Result<FormulaRow> {
    Ok(FormulaRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_account_id: row.get(3)?,
        public: row.get(4)?,
        total_volume_ml: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuditAction;

    fn db() -> Database {
        Database::open_memory().unwrap()
    }

    #[test]
    fn create_and_find_account() {
        let db = db();
        let id = db
            .create_account("alice", "$2b$04$hash", Role::Student, false)
            .unwrap();

        let account = db.find_account_by_username("alice").unwrap().unwrap();
        assert_eq!(account.id, id);
        assert_eq!(account.role, Role::Student);
        assert!(account.active);
        assert_eq!(account.failed_attempts, 0);
        assert!(account.locked_until.is_none());
        assert!(account.last_authenticated_at.is_none());

        assert!(db.find_account_by_username("bob").unwrap().is_none());
        assert!(db.find_account_by_id(id).unwrap().is_some());
    }

    #[test]
    fn usernames_are_case_sensitive() {
        let db = db();
        db.create_account("Alice", "h", Role::Student, false).unwrap();
        assert!(db.find_account_by_username("alice").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_rejected() {
        let db = db();
        db.create_account("alice", "h1", Role::Student, false).unwrap();
        let err = db
            .create_account("alice", "h2", Role::Admin, false)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn failed_attempt_counter_is_atomic_and_monotonic() {
        let db = db();
        let id = db.create_account("alice", "h", Role::Student, false).unwrap();

        assert_eq!(db.increment_failed_attempts(id).unwrap(), 1);
        assert_eq!(db.increment_failed_attempts(id).unwrap(), 2);
        assert_eq!(db.increment_failed_attempts(id).unwrap(), 3);

        let account = db.find_account_by_id(id).unwrap().unwrap();
        assert_eq!(account.failed_attempts, 3);
    }

    #[test]
    fn successful_login_resets_lockout_state() {
        let db = db();
        let id = db.create_account("alice", "h", Role::Student, false).unwrap();
        db.increment_failed_attempts(id).unwrap();
        db.increment_failed_attempts(id).unwrap();
        let until = chrono::Utc::now().timestamp() + 600;
        db.set_lockout(id, until).unwrap();

        let now = chrono::Utc::now().timestamp();
        db.record_successful_login(id, now).unwrap();

        let account = db.find_account_by_id(id).unwrap().unwrap();
        assert_eq!(account.failed_attempts, 0);
        assert!(account.locked_until.is_none());
        assert_eq!(account.last_authenticated_at, Some(now));
    }

    #[test]
    fn credential_update_clears_rotation_flag() {
        let db = db();
        let id = db.create_account("alice", "old", Role::Student, true).unwrap();
        db.update_credential_hash(id, "new").unwrap();

        let account = db.find_account_by_id(id).unwrap().unwrap();
        assert_eq!(account.credential_hash, "new");
        assert!(!account.must_change_credential);
    }

    #[test]
    fn toggle_active_flips_and_reports() {
        let db = db();
        let id = db.create_account("alice", "h", Role::Student, false).unwrap();
        assert!(!db.toggle_account_active(id).unwrap());
        assert!(db.toggle_account_active(id).unwrap());
        assert!(matches!(
            db.toggle_account_active(9999).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn formula_visibility_listing() {
        let db = db();
        let owner = db.create_account("owner", "h", Role::Student, false).unwrap();
        let other = db.create_account("other", "h", Role::Student, false).unwrap();

        let private_id = db
            .insert_formula(&NewFormula {
                name: "saline".into(),
                description: None,
                owner_account_id: owner,
                public: false,
                total_volume_ml: 500.0,
            })
            .unwrap();
        db.insert_formula(&NewFormula {
            name: "buffer".into(),
            description: Some("PBS".into()),
            owner_account_id: owner,
            public: true,
            total_volume_ml: 1000.0,
        })
        .unwrap();

        // Owner sees both, a stranger only the public one, an admin viewer all.
        assert_eq!(db.list_formulas_for(owner, false).unwrap().len(), 2);
        let visible = db.list_formulas_for(other, false).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "buffer");
        assert_eq!(db.list_formulas_for(other, true).unwrap().len(), 2);

        // Soft delete hides the row everywhere.
        assert!(db.soft_delete_formula(private_id).unwrap());
        assert!(db.get_formula(private_id).unwrap().is_none());
        assert_eq!(db.list_formulas_for(owner, false).unwrap().len(), 1);
        // Idempotence: second delete reports nothing to do.
        assert!(!db.soft_delete_formula(private_id).unwrap());
    }

    #[test]
    fn audit_entries_round_trip() {
        let db = db();
        let id = db.create_account("alice", "h", Role::Student, false).unwrap();

        let entry = AuditEntry::new(id, AuditAction::Login, "account", Some(id))
            .with_source(Some("127.0.0.1".to_string()));
        db.insert_audit_entry(&entry).unwrap();

        assert_eq!(db.count_audit_entries("login").unwrap(), 1);
        assert_eq!(db.count_audit_entries("logout").unwrap(), 0);
    }
}
