//! Best-effort audit trail.
//!
//! Appends go through a bounded queue drained by a background task, so a
//! slow or failing audit write can never delay or fail the operation that
//! produced it. Overflow drops the entry with a warning.

use crate::types::AuditEntry;
use crate::Database;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

const QUEUE_DEPTH: usize = 256;

enum AuditMsg {
    Entry(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit writer task. Cheap to clone.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditMsg>,
}

impl AuditSink {
    /// Spawn the writer task draining into the given database.
    pub fn spawn(db: Database) -> Self {
        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    AuditMsg::Entry(entry) => {
                        if let Err(e) = db.insert_audit_entry(&entry) {
                            warn!(action = entry.action.as_str(), error = %e, "audit write failed");
                        }
                    }
                    AuditMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Fire-and-forget append. Never blocks, never errors back to the caller.
    pub fn append(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.try_send(AuditMsg::Entry(entry)) {
            warn!(error = %e, "audit queue full or closed, entry dropped");
        }
    }

    /// Wait until every entry queued before this call has been written.
    /// Used on shutdown and in tests.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(AuditMsg::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuditAction, AuditEntry, Role};

    #[tokio::test]
    async fn append_is_best_effort_and_ordered_before_flush() {
        let db = Database::open_memory().unwrap();
        let account = db.create_account("alice", "h", Role::Student, false).unwrap();
        let sink = AuditSink::spawn(db.clone());

        sink.append(AuditEntry::new(account, AuditAction::Login, "account", Some(account)));
        sink.append(AuditEntry::new(account, AuditAction::Update, "account", Some(account)));
        sink.flush().await;

        assert_eq!(db.count_audit_entries("login").unwrap(), 1);
        assert_eq!(db.count_audit_entries("update").unwrap(), 1);
    }
}
