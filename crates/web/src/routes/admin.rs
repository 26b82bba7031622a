//! Administrative account provisioning. All routes behind the admin gate.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

use crate::auth::guard::{hash_secret, validate_secret_policy};
use crate::auth::middleware::CurrentSession;
use crate::server::{internal_error, AppState};
use labledger_common::{AuditAction, AuditEntry, Error, Role};

pub async fn list_users(State(state): State<AppState>) -> Response {
    match state.db.list_accounts() {
        Ok(accounts) => {
            let users: Vec<_> = accounts
                .iter()
                .map(|a| {
                    json!({
                        "id": a.id,
                        "username": a.username,
                        "role": a.role,
                        "active": a.active,
                        "must_change_credential": a.must_change_credential,
                        "last_authenticated_at": a.last_authenticated_at,
                        "created_at": a.created_at,
                    })
                })
                .collect();
            Json(json!({"users": users})).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
    /// Force rotation at first login; on by default for provisioned accounts.
    #[serde(default = "default_must_change")]
    pub must_change_credential: bool,
}

fn default_must_change() -> bool {
    true
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<CreateAccountRequest>,
) -> Response {
    let username = req.username.trim();
    if username.chars().count() < 3 || username.chars().count() > 50 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "username must be 3-50 characters"})),
        )
            .into_response();
    }
    if let Err(reason) = validate_secret_policy(&req.password) {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response();
    }

    let hash = match hash_secret(req.password, state.config.hash_cost).await {
        Ok(hash) => hash,
        Err(e) => return internal_error(&e),
    };

    match state
        .db
        .create_account(username, &hash, req.role, req.must_change_credential)
    {
        Ok(id) => {
            let source = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
            state.audit.append(
                AuditEntry::new(session.account_id, AuditAction::Create, "account", Some(id))
                    .with_source(source),
            );
            (StatusCode::CREATED, Json(json!({"account_id": id}))).into_response()
        }
        Err(Error::AlreadyExists { .. }) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "username already exists"})),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

/// Deactivation is a flag flip; the account row is never deleted.
pub async fn toggle_active(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    Path(id): Path<i64>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    match state.db.toggle_account_active(id) {
        Ok(active) => {
            let source = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
            state.audit.append(
                AuditEntry::new(session.account_id, AuditAction::Update, "account", Some(id))
                    .with_source(source),
            );
            Json(json!({"account_id": id, "active": active})).into_response()
        }
        Err(Error::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "account not found"})),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}
