//! LabLedger Web API
//!
//! Session-authenticated HTTP API over the account-security subsystem:
//! login with brute-force lockout, server-side sessions with sliding
//! expiration, credential rotation, and a single row-level access policy
//! shared by every resource route.

pub mod auth;
pub mod routes;
pub mod server;

pub use auth::{AccessPolicy, LoginGuard, SessionManager};
pub use server::AppState;
