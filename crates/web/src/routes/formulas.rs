//! Formula resource routes.
//!
//! Every access decision is delegated to [`AccessPolicy`]; the route only
//! builds the ownership/visibility view of the row. Detail fetches resolve
//! existence and authorization from the same read, so a private formula is
//! indistinguishable from a missing one to anybody who may not read it.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

use crate::auth::middleware::CurrentSession;
use crate::auth::{DetailAccess, ResourceAction, ResourceView, Visibility};
use crate::server::{internal_error, AppState};
use labledger_common::{AuditAction, AuditEntry, FormulaRow, NewFormula, Role};

#[derive(Debug, Deserialize)]
pub struct FormulaPayload {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub public: bool,
    pub total_volume_ml: f64,
}

impl FormulaPayload {
    fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("formula name is required");
        }
        if !self.total_volume_ml.is_finite() || self.total_volume_ml <= 0.0 {
            return Err("total volume must be greater than zero");
        }
        Ok(())
    }
}

fn view(formula: &FormulaRow) -> ResourceView {
    ResourceView {
        owner_account_id: formula.owner_account_id,
        visibility: if formula.public {
            Visibility::Public
        } else {
            Visibility::Private
        },
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "formula not found"})),
    )
        .into_response()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "no permission to modify this formula"})),
    )
        .into_response()
}

pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(payload): Json<FormulaPayload>,
) -> Response {
    if let Err(reason) = payload.validate() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response();
    }

    let new = NewFormula {
        name: payload.name.trim().to_string(),
        description: payload.description,
        owner_account_id: session.account_id,
        public: payload.public,
        total_volume_ml: payload.total_volume_ml,
    };
    match state.db.insert_formula(&new) {
        Ok(id) => {
            let source = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
            state.audit.append(
                AuditEntry::new(session.account_id, AuditAction::Create, "formula", Some(id))
                    .with_source(source),
            );
            (StatusCode::CREATED, Json(json!({"formula_id": id}))).into_response()
        }
        Err(e) => internal_error(&e),
    }
}

pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> Response {
    let admin = session.role == Role::Admin;
    match state.db.list_formulas_for(session.account_id, admin) {
        Ok(formulas) => Json(json!({"formulas": formulas})).into_response(),
        Err(e) => internal_error(&e),
    }
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    Path(id): Path<i64>,
) -> Response {
    let fetched = match state.db.get_formula(id) {
        Ok(row) => row.map(|f| {
            let v = view(&f);
            (f, v)
        }),
        Err(e) => return internal_error(&e),
    };
    match state.policy.resolve_detail(&session, ResourceAction::Read, fetched) {
        DetailAccess::Granted(formula) => Json(formula).into_response(),
        DetailAccess::NotFound => not_found(),
        DetailAccess::Forbidden => forbidden(),
    }
}

pub async fn update(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    Path(id): Path<i64>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(payload): Json<FormulaPayload>,
) -> Response {
    if let Err(reason) = payload.validate() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response();
    }

    let fetched = match state.db.get_formula(id) {
        Ok(row) => row.map(|f| {
            let v = view(&f);
            (f, v)
        }),
        Err(e) => return internal_error(&e),
    };
    match state.policy.resolve_detail(&session, ResourceAction::Write, fetched) {
        DetailAccess::Granted(_) => {}
        DetailAccess::NotFound => return not_found(),
        DetailAccess::Forbidden => return forbidden(),
    }

    match state.db.update_formula(
        id,
        payload.name.trim(),
        payload.description.as_deref(),
        payload.public,
        payload.total_volume_ml,
    ) {
        Ok(true) => {
            let source = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
            state.audit.append(
                AuditEntry::new(session.account_id, AuditAction::Update, "formula", Some(id))
                    .with_source(source),
            );
            (StatusCode::OK, Json(json!({"message": "formula updated"}))).into_response()
        }
        Ok(false) => not_found(),
        Err(e) => internal_error(&e),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
    Path(id): Path<i64>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let fetched = match state.db.get_formula(id) {
        Ok(row) => row.map(|f| {
            let v = view(&f);
            (f, v)
        }),
        Err(e) => return internal_error(&e),
    };
    match state.policy.resolve_detail(&session, ResourceAction::Delete, fetched) {
        DetailAccess::Granted(_) => {}
        DetailAccess::NotFound => return not_found(),
        DetailAccess::Forbidden => return forbidden(),
    }

    match state.db.soft_delete_formula(id) {
        Ok(true) => {
            let source = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
            state.audit.append(
                AuditEntry::new(session.account_id, AuditAction::Delete, "formula", Some(id))
                    .with_source(source),
            );
            (StatusCode::OK, Json(json!({"message": "formula deleted"}))).into_response()
        }
        Ok(false) => not_found(),
        Err(e) => internal_error(&e),
    }
}
