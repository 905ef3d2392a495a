use axum::{
    middleware::from_fn,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::mpesa_handlers;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn mpesa_routes() -> Router<AppState> {
    // The callback must stay outside the auth layer: the gateway does not
    // authenticate, it just POSTs.
    Router::new()
        .route("/health", get(mpesa_health))
        .route("/callback", post(mpesa_handlers::mpesa_callback))
        .merge(
            Router::new()
                .route("/pay/:lesson_id", post(mpesa_handlers::initiate_lesson_payment))
                .route(
                    "/status/:checkout_request_id",
                    get(mpesa_handlers::check_payment_status),
                )
                .layer(from_fn(auth_middleware)),
        )
}

async fn mpesa_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "mpesa",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "callback", "payment-status-check"]
    }))
}
