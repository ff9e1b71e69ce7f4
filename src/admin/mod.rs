//! Admin API.
//!
//! Read-only views over the balancer plus two mutations: switching the
//! active strategy and deregistering a backend. Every route requires
//! `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, put},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::load_balancer::balancer::LoadBalancer;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub balancer: Arc<LoadBalancer>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(balancer: Arc<LoadBalancer>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            balancer,
            api_key: api_key.into(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/backends/{id}", delete(delete_backend))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/performance", get(get_performance))
        .route("/admin/strategy", put(put_strategy))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `shutdown` resolves.
pub async fn serve<S>(listener: TcpListener, state: AdminState, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
