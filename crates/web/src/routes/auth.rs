//! Authentication endpoints: login, logout, status, password change,
//! current profile.
//!
//! Status mapping at this boundary: 401 invalid credentials, 403 disabled,
//! 423 locked, 200 success with the session cookie set.

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

use crate::auth::middleware::{resolve_session, CurrentSession};
use crate::auth::{AuthOutcome, RotationOutcome, SessionLookup};
use crate::server::{internal_error, removal_cookie, session_cookie, AppState, SESSION_COOKIE};
use labledger_common::{AuditAction, AuditEntry};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Response {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "username and password are required"})),
        )
            .into_response();
    }

    let source = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    match state.guard.authenticate(username, &req.password, source).await {
        Ok(AuthOutcome::Authenticated(account)) => {
            let token =
                state
                    .sessions
                    .create(account.account_id, account.username.clone(), account.role);
            let jar = jar.add(session_cookie(&state.config, token));
            (
                StatusCode::OK,
                jar,
                Json(json!({
                    "account_id": account.account_id,
                    "username": account.username,
                    "role": account.role,
                    "must_change_credential": account.must_change_credential,
                })),
            )
                .into_response()
        }
        Ok(AuthOutcome::InvalidCredentials { remaining_attempts }) => {
            let mut body = json!({"error": "invalid username or password"});
            if let Some(remaining) = remaining_attempts {
                body["remaining_attempts"] = json!(remaining);
            }
            (StatusCode::UNAUTHORIZED, Json(body)).into_response()
        }
        Ok(AuthOutcome::AccountDisabled) => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "account is disabled"})),
        )
            .into_response(),
        Ok(AuthOutcome::AccountLocked { retry_after_minutes }) => (
            StatusCode::LOCKED,
            Json(json!({
                "error": format!("account locked, try again in {} minute(s)", retry_after_minutes),
                "retry_after_minutes": retry_after_minutes,
            })),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

/// Logout is idempotent: 200 regardless of prior session state.
pub async fn logout(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    jar: CookieJar,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let token = cookie.value().to_string();
        if let SessionLookup::Valid(session) = state.sessions.validate(&token) {
            state.sessions.destroy(&token);
            let source = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
            state.audit.append(
                AuditEntry::new(
                    session.account_id,
                    AuditAction::Logout,
                    "account",
                    Some(session.account_id),
                )
                .with_source(source),
            );
        }
    }
    let jar = jar.remove(removal_cookie());
    (StatusCode::OK, jar, Json(json!({"message": "logged out"}))).into_response()
}

/// Report authentication state without requiring prior authentication.
pub async fn status(State(state): State<AppState>, jar: CookieJar) -> Response {
    match resolve_session(&state, &jar) {
        Some(session) => Json(json!({
            "authenticated": true,
            "account_id": session.account_id,
            "username": session.username,
            "role": session.role,
        }))
        .into_response(),
        None => Json(json!({"authenticated": false})).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<ChangePasswordRequest>,
) -> Response {
    let source = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    match state
        .guard
        .rotate(session.account_id, &req.old_password, &req.new_password, source)
        .await
    {
        Ok(RotationOutcome::Rotated) => {
            (StatusCode::OK, Json(json!({"message": "password changed"}))).into_response()
        }
        Ok(RotationOutcome::WrongOldCredential) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "old password is incorrect"})),
        )
            .into_response(),
        Ok(RotationOutcome::WeakCredential(reason)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

/// Current account's profile.
pub async fn profile(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> Response {
    match state.db.find_account_by_id(session.account_id) {
        Ok(Some(account)) => Json(json!({
            "id": account.id,
            "username": account.username,
            "role": account.role,
            "must_change_credential": account.must_change_credential,
            "last_authenticated_at": account.last_authenticated_at,
            "created_at": account.created_at,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "account not found"})),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}
