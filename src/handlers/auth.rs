use axum::{
    extract::{Path, State},
    response::Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use futures_util::TryStreamExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Collection;

use crate::errors::{AppError, Result};
use crate::models::user::{AuthResponse, Claims, CreateUser, LoginUser, User, UserResponse};
use crate::services::phone::normalize_phone;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<CreateUser>,
) -> Result<Json<AuthResponse>> {
    let collection: Collection<User> = state.db.collection("users");

    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::invalid_data("Username and password are required"));
    }

    let existing_user = collection
        .find_one(doc! { "username": &payload.username })
        .await?;

    if existing_user.is_some() {
        return Err(AppError::DuplicateKey);
    }

    // Phone is optional, but if given it must canonicalize.
    let phone = payload.phone.as_deref().map(normalize_phone).transpose()?;

    let password_hash = hash(&payload.password, DEFAULT_COST)
        .map_err(|_| AppError::invalid_data("Failed to hash password"))?;

    let user = User {
        _id: Some(ObjectId::new()),
        username: payload.username.clone(),
        phone,
        password_hash,
        role: payload.role,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    collection.insert_one(&user).await?;

    let token = issue_token(&user)?;

    Ok(Json(AuthResponse {
        user: UserResponse::from(&user),
        token,
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginUser>,
) -> Result<Json<AuthResponse>> {
    let collection: Collection<User> = state.db.collection("users");

    let user = collection
        .find_one(doc! { "username": &payload.username })
        .await?
        .ok_or(AppError::AuthError)?;

    let valid = verify(&payload.password, &user.password_hash).map_err(|_| AppError::AuthError)?;

    if !valid {
        return Err(AppError::AuthError);
    }

    let token = issue_token(&user)?;

    Ok(Json(AuthResponse {
        user: UserResponse::from(&user),
        token,
    }))
}

/// Public teacher directory.
pub async fn list_teachers(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>> {
    let collection: Collection<User> = state.db.collection("users");

    let filter = doc! { "role": { "$in": ["Teacher", "Both"] } };
    let cursor = collection.find(filter).await?;
    let teachers: Vec<User> = cursor.try_collect().await?;

    Ok(Json(teachers.iter().map(UserResponse::from).collect()))
}

pub async fn get_user_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>> {
    let collection: Collection<User> = state.db.collection("users");

    let object_id = ObjectId::parse_str(&user_id)?;

    let user = collection
        .find_one(doc! { "_id": object_id })
        .await?
        .ok_or(AppError::DocumentNotFound)?;

    Ok(Json(UserResponse::from(&user)))
}

fn issue_token(user: &User) -> Result<String> {
    let id = user._id.ok_or(AppError::DocumentNotFound)?;

    let claims = Claims {
        sub: id.to_hex(),
        username: user.username.clone(),
        role: user.role,
        exp: (Utc::now().timestamp() + 86400) as usize, // 24 hours
    };

    let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string());

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|_| AppError::AuthError)
}
