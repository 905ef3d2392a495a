use axum::extract::State;
use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

mod config;
mod database;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use database::connection::get_db_client;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let db = get_db_client().await;
    let app_state = initialize_app_state(db).await;

    let app = build_router(app_state);
    start_server(app).await;
}

async fn initialize_app_state(db: mongodb::Database) -> AppState {
    let mut app_state = AppState::new(db);

    tracing::info!("🔧 Attempting to initialize M-Pesa service...");

    match config::AppConfig::from_env() {
        Ok(config) => {
            tracing::info!("✅ M-Pesa config loaded");
            tracing::info!("📱 Short code: {}", config.mpesa_short_code);
            tracing::info!("🌐 Environment: {}", config.mpesa_environment);

            match services::mpesa_service::MpesaService::new(config) {
                Ok(mpesa_service) => {
                    let mpesa_service = Arc::new(mpesa_service);

                    // Fetch a token once to verify credentials up front.
                    match mpesa_service.get_access_token().await {
                        Ok(_) => {
                            tracing::info!("✅ M-Pesa access token obtained, service ready");
                            app_state = app_state.with_mpesa(mpesa_service);
                        }
                        Err(e) => {
                            tracing::error!("❌ Failed to get M-Pesa access token: {}", e);
                            tracing::warn!("M-Pesa payments will be disabled");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("❌ Failed to build M-Pesa client: {}", e);
                    tracing::warn!("M-Pesa payments will be disabled");
                }
            }
        }
        Err(e) => {
            tracing::error!("❌ Failed to load M-Pesa config: {}", e);
            tracing::warn!("M-Pesa payments will be disabled");
        }
    }

    app_state
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api/auth", routes::auth::routes())
        .nest("/api/users", routes::auth::user_routes())
        .nest("/api/lessons", routes::lessons::routes())
        .nest("/api/mpesa", routes::mpesa::mpesa_routes())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router) {
    let port = std::env::var("PORT").unwrap_or_else(|_| "10000".to_string());
    let addr = SocketAddr::from(([0, 0, 0, 0], port.parse().unwrap_or(10000)));

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "🎵 Tutti Lesson Booking API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    use mongodb::bson::doc;

    let db_status = match state.db.run_command(doc! {"ping": 1}).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa": state.mpesa_service.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
