//! Row-level access policy.
//!
//! One decision table for every protected resource type. Callers build a
//! minimal ownership/visibility view of the resource; the policy never
//! special-cases resource types.

use super::session::Session;
use labledger_common::Role;
use serde::Serialize;

/// Action being attempted against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    Read,
    Write,
    Delete,
}

/// Resource visibility, independent of ownership. Public grants read to
/// any authenticated session as a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// The ownership/visibility view of a resource the policy decides on.
#[derive(Debug, Clone, Copy)]
pub struct ResourceView {
    pub owner_account_id: i64,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Resource is visible but only the owner (or an admin) may change it.
    OwnerOnly,
    /// Resource is private and the session is neither owner nor admin.
    NotVisible,
}

/// Output of a policy check. Never persisted.
#[derive(Debug, Clone, Copy)]
pub struct AccessDecision {
    pub permit: bool,
    pub reason: Option<DenialReason>,
}

impl AccessDecision {
    fn permit() -> Self {
        Self {
            permit: true,
            reason: None,
        }
    }

    fn deny(reason: DenialReason) -> Self {
        Self {
            permit: false,
            reason: Some(reason),
        }
    }
}

/// Outcome of a detail fetch resolved together with its access decision.
/// `NotFound` covers both a missing resource and one the session may not
/// read, so a denial never discloses existence.
#[derive(Debug)]
pub enum DetailAccess<T> {
    Granted(T),
    NotFound,
    Forbidden,
}

/// Stateless policy engine. Total and deterministic: exactly one table row
/// applies to any input, first match wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    /// | Condition                  | read   | write | delete |
    /// |----------------------------|--------|-------|--------|
    /// | role == admin              | permit | permit| permit |
    /// | session owns the resource  | permit | permit| permit |
    /// | visibility == public       | permit | deny  | deny   |
    /// | otherwise                  | deny   | deny  | deny   |
    pub fn check(
        &self,
        session: &Session,
        action: ResourceAction,
        resource: &ResourceView,
    ) -> AccessDecision {
        if session.role == Role::Admin {
            return AccessDecision::permit();
        }
        if session.account_id == resource.owner_account_id {
            return AccessDecision::permit();
        }
        if resource.visibility == Visibility::Public {
            return match action {
                ResourceAction::Read => AccessDecision::permit(),
                ResourceAction::Write | ResourceAction::Delete => {
                    AccessDecision::deny(DenialReason::OwnerOnly)
                }
            };
        }
        AccessDecision::deny(DenialReason::NotVisible)
    }

    /// Resolve a detail fetch and its authorization from the same read.
    /// Missing resource or read denied: `NotFound` (existence hidden).
    /// Readable but the requested action denied: `Forbidden`.
    pub fn resolve_detail<T>(
        &self,
        session: &Session,
        action: ResourceAction,
        fetched: Option<(T, ResourceView)>,
    ) -> DetailAccess<T> {
        let Some((item, view)) = fetched else {
            return DetailAccess::NotFound;
        };
        if !self.check(session, ResourceAction::Read, &view).permit {
            return DetailAccess::NotFound;
        }
        if self.check(session, action, &view).permit {
            DetailAccess::Granted(item)
        } else {
            DetailAccess::Forbidden
        }
    }
}
