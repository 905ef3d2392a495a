// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("Invalid phone number: {0}. Use format 07XX.../01XX... or 2547XXXXXXXX")]
    InvalidPhoneFormat(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Authentication error")]
    AuthError,

    #[error("Illegal lesson transition: {0}")]
    IllegalTransition(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Malformed callback payload: {0}")]
    MalformedCallback(String),

    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    #[error("Document not found")]
    DocumentNotFound,

    #[error("Duplicate key error")]
    DuplicateKey,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            AppError::InvalidPhoneFormat(_) => (StatusCode::BAD_REQUEST, "Invalid phone number".to_string()),
            AppError::Unauthorized => (StatusCode::FORBIDDEN, "Unauthorized access".to_string()),
            AppError::AuthError => (StatusCode::UNAUTHORIZED, "Authentication failed".to_string()),
            AppError::IllegalTransition(_) => (StatusCode::CONFLICT, "Illegal lesson transition".to_string()),
            AppError::GatewayUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "Payment gateway unavailable".to_string()),
            AppError::GatewayRejected(_) => (StatusCode::BAD_GATEWAY, "Payment gateway rejected the request".to_string()),
            AppError::UnknownTransaction(_) => (StatusCode::NOT_FOUND, "Unknown transaction".to_string()),
            AppError::MalformedCallback(_) => (StatusCode::BAD_REQUEST, "Malformed callback".to_string()),
            AppError::InvalidObjectId(_) => (StatusCode::BAD_REQUEST, "Invalid ID format".to_string()),
            AppError::DocumentNotFound => (StatusCode::NOT_FOUND, "Document not found".to_string()),
            AppError::DuplicateKey => (StatusCode::CONFLICT, "Duplicate entry".to_string()),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            AppError::ConfigurationError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::MalformedCallback(format!("JSON parsing error: {}", err))
    }
}

impl From<mongodb::bson::oid::Error> for AppError {
    fn from(err: mongodb::bson::oid::Error) -> Self {
        AppError::InvalidObjectId(err.to_string())
    }
}

// Helper conversion functions
impl AppError {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn illegal_transition(msg: impl Into<String>) -> Self {
        AppError::IllegalTransition(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
