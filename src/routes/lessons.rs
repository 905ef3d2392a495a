use axum::{
    middleware::from_fn,
    routing::{delete, get, post},
    Router,
};

use crate::handlers::lesson_handlers;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(lesson_handlers::get_lessons))
        .route("/request/:teacher_id", post(lesson_handlers::request_lesson))
        .route("/:lesson_id", get(lesson_handlers::get_lesson))
        .route("/:lesson_id", delete(lesson_handlers::delete_lesson))
        .route("/:lesson_id/approve", post(lesson_handlers::approve_lesson))
        .route("/:lesson_id/decline", post(lesson_handlers::decline_lesson))
        .route("/:lesson_id/reschedule", post(lesson_handlers::propose_reschedule))
        .route(
            "/:lesson_id/accept-reschedule",
            post(lesson_handlers::accept_reschedule),
        )
        .route("/:lesson_id/complete", post(lesson_handlers::complete_lesson))
        .route("/:lesson_id/mark-paid", post(lesson_handlers::mark_lesson_paid))
        .route("/:lesson_id/cancel", post(lesson_handlers::cancel_lesson))
        .layer(from_fn(auth_middleware))
}
