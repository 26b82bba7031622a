//! LabLedger Common Library
//!
//! Shared types, storage, and audit infrastructure for the LabLedger service.

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use audit::AuditSink;
pub use config::AuthConfig;
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

/// LabLedger version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
