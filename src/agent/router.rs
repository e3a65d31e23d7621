use super::handlers::{
    handle_certificates, handle_pin_answer, handle_pin_cancel, handle_pin_pending, handle_sign, handle_sign_pdf,
    handle_status,
};
use super::middleware::logging_middleware;
use super::AgentContext;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// All agent routes over `ctx`.
pub fn build_router(ctx: Arc<AgentContext>) -> Router {
    let body_limit = ctx.config.max_body_bytes;
    Router::new()
        .route("/status", get(handle_status))
        .route("/certificates", get(handle_certificates))
        .route("/sign", post(handle_sign))
        .route("/sign/pdf", post(handle_sign_pdf))
        .route("/pin/pending", get(handle_pin_pending))
        .route("/pin/:id", post(handle_pin_answer).delete(handle_pin_cancel))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(logging_middleware))
        .with_state(ctx)
}
