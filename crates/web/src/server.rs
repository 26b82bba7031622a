//! Web server implementation

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::{middleware::require_admin, middleware::require_auth, AccessPolicy, LoginGuard, SessionManager};
use crate::routes;
use labledger_common::{AuditSink, AuthConfig, Database};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "labledger_sid";

/// Shared state threaded into every handler. No ambient singletons: the
/// store handle, guard, session manager, and policy are all constructed
/// here and passed explicitly.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: AuthConfig,
    pub guard: Arc<LoginGuard>,
    pub sessions: SessionManager,
    pub policy: AccessPolicy,
    pub audit: AuditSink,
}

impl AppState {
    pub fn new(db: Database, config: AuthConfig) -> Self {
        let audit = AuditSink::spawn(db.clone());
        let sessions = SessionManager::new(config.idle_timeout());
        let guard = Arc::new(LoginGuard::new(db.clone(), audit.clone(), config.clone()));
        Self {
            db,
            config,
            guard,
            sessions,
            policy: AccessPolicy,
            audit,
        }
    }
}

/// Assemble the API router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/change-password", post(routes::auth::change_password))
        .route("/api/users/profile", get(routes::auth::profile))
        .route(
            "/api/formulas",
            post(routes::formulas::create).get(routes::formulas::list),
        )
        .route(
            "/api/formulas/:id",
            get(routes::formulas::detail)
                .put(routes::formulas::update)
                .delete(routes::formulas::remove),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let admin = Router::new()
        .route(
            "/api/admin/users",
            get(routes::admin::list_users).post(routes::admin::create_user),
        )
        .route(
            "/api/admin/users/:id/toggle-active",
            patch(routes::admin::toggle_active),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/logout", post(routes::auth::logout))
        .route("/api/auth/status", get(routes::auth::status))
        .merge(protected)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on the given address.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("LabLedger web API listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Map an internal failure to a generic response. Detail stays in the
/// server log only; the caller never sees store or timeout specifics.
pub(crate) fn internal_error(err: &labledger_common::Error) -> Response {
    if err.is_store_unavailable() {
        error!(error = %err, "store unavailable, failing closed");
    } else {
        error!(error = %err, "request failed");
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

/// Build the session cookie: HttpOnly, SameSite=Lax, Secure per config.
/// Idle expiry is enforced server-side, so no Max-Age is set.
pub(crate) fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(config.cookie_secure);
    cookie.set_path("/");
    cookie
}

/// Cookie used to clear the session on logout.
pub(crate) fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookie
}
