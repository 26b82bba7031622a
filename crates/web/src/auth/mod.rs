//! Account-security subsystem.
//!
//! - [`guard::LoginGuard`]: credential checks and attempt-count lockout
//! - [`session::SessionManager`]: server-side sessions, sliding expiration
//! - [`policy::AccessPolicy`]: the single ownership/visibility decision
//!   table every resource route delegates to
//! - [`middleware`]: cookie-to-session resolution for the router

pub mod guard;
pub mod middleware;
pub mod policy;
pub mod session;

pub use guard::{AuthOutcome, AuthenticatedAccount, LoginGuard, RotationOutcome};
pub use middleware::CurrentSession;
pub use policy::{
    AccessDecision, AccessPolicy, DenialReason, DetailAccess, ResourceAction, ResourceView,
    Visibility,
};
pub use session::{Session, SessionLookup, SessionManager};
