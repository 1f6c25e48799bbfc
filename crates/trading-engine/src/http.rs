use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::scheduler::Scheduler;

/// Minimal internal HTTP surface: liveness, a status snapshot, and a
/// fire-and-forget watchlist rebuild trigger. Plain `axum::Json` responses —
/// this surface is operator-internal, not a documented public API, so the
/// corpus's `utoipa`-annotated router style for the public-facing API
/// doesn't apply here.
pub fn router(scheduler: Arc<Scheduler>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/api/build-watchlist", post(build_watchlist))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(scheduler)
}

async fn health(State(scheduler): State<Arc<Scheduler>>) -> StatusCode {
    if scheduler.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status(State(scheduler): State<Arc<Scheduler>>) -> Json<crate::scheduler::StatusResponse> {
    Json(scheduler.status())
}

async fn build_watchlist(State(scheduler): State<Arc<Scheduler>>) -> StatusCode {
    scheduler.request_watchlist_build();
    StatusCode::ACCEPTED
}
