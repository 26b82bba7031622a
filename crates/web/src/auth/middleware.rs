//! Session-resolution middleware for Axum.
//!
//! The session is resolved once per request into an immutable value and
//! passed to handlers through a request extension; downstream code never
//! reaches back into the session table.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;

use super::session::{Session, SessionLookup};
use crate::server::{AppState, SESSION_COOKIE};
use labledger_common::Role;

/// Extension holding the validated session for the current request.
#[derive(Clone)]
pub struct CurrentSession(pub Session);

/// Resolve the session cookie, sliding its expiration on success.
/// Expired and unknown tokens both come back as `None`; the distinction is
/// logged, not surfaced.
pub fn resolve_session(state: &AppState, jar: &CookieJar) -> Option<Session> {
    let token = jar.get(SESSION_COOKIE)?.value().to_string();
    match state.sessions.validate(&token) {
        SessionLookup::Valid(session) => Some(session),
        SessionLookup::Expired | SessionLookup::NotFound => None,
    }
}

/// Middleware that requires a valid session.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve_session(&state, &jar) {
        Some(session) => {
            request.extensions_mut().insert(CurrentSession(session));
            next.run(request).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "authentication required"})),
        )
            .into_response(),
    }
}

/// Middleware that requires a valid session with the admin role.
pub async fn require_admin(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(session) = resolve_session(&state, &jar) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "authentication required"})),
        )
            .into_response();
    };
    if session.role != Role::Admin {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "admin privileges required"})),
        )
            .into_response();
    }
    request.extensions_mut().insert(CurrentSession(session));
    next.run(request).await
}
