//! Axum router wiring for the ops endpoints.

use axum::{routing::get, Router};

use crate::{context::SessionContext, ops};

pub fn build_router(ctx: SessionContext) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .route("/session", get(ops::session))
        .with_state(ctx)
}
