use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::auth;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/teachers", get(auth::list_teachers))
        .route("/profile/:user_id", get(auth::get_user_profile))
}
