//! # fixit_api
//!
//! HTTP surface of the Fixit session core: cookie-based login, refresh and
//! logout, session management and staff account administration.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post};
use fixit_core::auth::queries::{PgTokenStore, PgUserDirectory};
use fixit_core::auth::session::SessionManager;
use fixit_core::auth::store::{TokenStore, UserDirectory};
use fixit_core::models::auth::Role;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{admin, auth, health};
use crate::middleware::auth::{require_any_role, require_auth, require_min_role};

/// Roles allowed to read the audit log.
const AUDIT_READERS: &[Role] = &[Role::Staff, Role::Admin];

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
        config: ApiConfig,
    ) -> Self {
        Self {
            sessions: SessionManager::new(tokens, users, config.auth.clone()),
            config,
        }
    }

    /// State backed by PostgreSQL.
    pub fn with_postgres(pool: PgPool, config: ApiConfig) -> Self {
        Self::new(
            Arc::new(PgTokenStore::new(pool.clone())),
            Arc::new(PgUserDirectory::new(pool)),
            config,
        )
    }
}

/// Run embedded database migrations.
///
/// Delegates to `fixit_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    fixit_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public = Router::new()
        .route("/health", get(health::health_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler));

    let staff = Router::new()
        .route(
            "/admin/users/{userId}/status",
            patch(admin::update_status_handler),
        )
        .route_layer(from_fn_with_state(Role::Staff, require_min_role));

    let auditors = Router::new()
        .route("/admin/audit", get(admin::list_audit_handler))
        .route_layer(from_fn_with_state(AUDIT_READERS, require_any_role));

    // Protected routes (require auth); role gates run after authentication.
    let protected = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/logout-all", post(auth::logout_all_handler))
        .route("/auth/sessions", get(auth::list_sessions_handler))
        .route(
            "/auth/sessions/{familyId}",
            delete(auth::revoke_session_handler),
        )
        .merge(staff)
        .merge(auditors)
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
