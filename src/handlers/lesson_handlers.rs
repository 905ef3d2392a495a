use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson};
use mongodb::Collection;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;

use crate::errors::{AppError, Result};
use crate::models::lesson::{
    Lesson, LessonAction, LessonResponse, LessonStatus, RequestLesson, RescheduleLesson,
    TransitionEffect,
};
use crate::models::user::{Claims, User};
use crate::state::AppState;

fn actor_id(claims: &Claims) -> Result<ObjectId> {
    ObjectId::parse_str(&claims.sub).map_err(|_| AppError::AuthError)
}

async fn load_lesson(state: &AppState, lesson_id: &str) -> Result<Lesson> {
    let collection: Collection<Lesson> = state.db.collection("lessons");
    let object_id = ObjectId::parse_str(lesson_id)?;

    collection
        .find_one(doc! { "_id": object_id })
        .await?
        .ok_or(AppError::DocumentNotFound)
}

/// Runs the status machine, then applies the effect with a guard on the
/// status the machine saw. A concurrent writer (duplicate request, or the
/// payment callback racing a manual mark-paid) makes the guard miss, and
/// the losing write is dropped instead of re-applied.
async fn apply_transition(
    state: &AppState,
    lesson: &Lesson,
    action: LessonAction,
    actor: &ObjectId,
    extra_set: Option<mongodb::bson::Document>,
) -> Result<TransitionEffect> {
    let effect = lesson.transition(action, actor)?;
    let collection: Collection<Lesson> = state.db.collection("lessons");
    let id = lesson._id.ok_or(AppError::DocumentNotFound)?;

    let guard = doc! { "_id": id, "status": lesson.status.as_str() };

    match effect {
        TransitionEffect::SetStatus(next) => {
            let mut set = doc! {
                "status": next.as_str(),
                "updated_at": mongodb::bson::DateTime::now(),
            };
            if let Some(extra) = extra_set {
                set.extend(extra);
            }

            let result = collection.update_one(guard, doc! { "$set": set }).await?;
            if result.modified_count == 0 {
                return Err(AppError::illegal_transition(
                    "lesson changed concurrently, transition not applied",
                ));
            }
        }
        TransitionEffect::Remove => {
            let result = collection.delete_one(guard).await?;
            if result.deleted_count == 0 {
                return Err(AppError::illegal_transition(
                    "lesson changed concurrently, transition not applied",
                ));
            }
        }
    }

    info!(
        lesson_id = %id.to_hex(),
        action = action.as_str(),
        "lesson transition applied"
    );
    Ok(effect)
}

fn transition_response(lesson: &Lesson, effect: TransitionEffect) -> Json<serde_json::Value> {
    let id = lesson._id.map(|id| id.to_hex()).unwrap_or_default();
    match effect {
        TransitionEffect::SetStatus(next) => Json(json!({
            "success": true,
            "lesson_id": id,
            "status": next.as_str(),
        })),
        TransitionEffect::Remove => Json(json!({
            "success": true,
            "lesson_id": id,
            "deleted": true,
        })),
    }
}

/// A student asks a teacher for a lesson. The lesson starts in REQUESTED.
pub async fn request_lesson(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(teacher_id): Path<String>,
    Json(payload): Json<RequestLesson>,
) -> Result<Json<LessonResponse>> {
    let student_id = actor_id(&claims)?;

    if !claims.role.can_learn() {
        return Err(AppError::Unauthorized);
    }

    if payload.topic.trim().is_empty() {
        return Err(AppError::invalid_data("Topic is required"));
    }

    let users: Collection<User> = state.db.collection("users");
    let teacher_oid = ObjectId::parse_str(&teacher_id)?;
    let teacher = users
        .find_one(doc! { "_id": teacher_oid })
        .await?
        .ok_or(AppError::DocumentNotFound)?;

    if !teacher.role.can_teach() {
        return Err(AppError::invalid_data("Selected user is not a teacher"));
    }

    let default_price: Decimal = Lesson::DEFAULT_PRICE_KES
        .parse()
        .map_err(|_| AppError::invalid_data("Invalid default price"))?;

    let lesson = Lesson {
        _id: Some(ObjectId::new()),
        teacher_id: teacher_oid,
        student_id,
        start_time: payload.start_time,
        duration_minutes: payload
            .duration_minutes
            .unwrap_or(Lesson::DEFAULT_DURATION_MINUTES),
        topic: payload.topic,
        teacher_notes: String::new(),
        price: default_price,
        status: LessonStatus::Requested,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let lessons: Collection<Lesson> = state.db.collection("lessons");
    lessons.insert_one(&lesson).await?;

    info!(
        student = %claims.username,
        teacher = %teacher.username,
        "lesson requested"
    );
    Ok(Json(LessonResponse::from(&lesson)))
}

/// Dashboard read model: lessons taught and lessons taken, dispatched by an
/// exhaustive match on the caller's role.
pub async fn get_lessons(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let collection: Collection<Lesson> = state.db.collection("lessons");

    let taught = doc! { "teacher_id": actor };
    let taken = doc! { "student_id": actor };

    let (teaching, learning) = match claims.role {
        crate::models::user::Role::Teacher => (fetch(&collection, taught).await?, Vec::new()),
        crate::models::user::Role::Student => (Vec::new(), fetch(&collection, taken).await?),
        crate::models::user::Role::Both => (
            fetch(&collection, taught).await?,
            fetch(&collection, taken).await?,
        ),
        crate::models::user::Role::Neither => (Vec::new(), Vec::new()),
    };

    Ok(Json(json!({
        "teaching": teaching,
        "learning": learning,
    })))
}

async fn fetch(
    collection: &Collection<Lesson>,
    filter: mongodb::bson::Document,
) -> Result<Vec<LessonResponse>> {
    let cursor = collection.find(filter).await?;
    let mut lessons: Vec<Lesson> = cursor.try_collect().await?;
    lessons.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    Ok(lessons.iter().map(LessonResponse::from).collect())
}

pub async fn get_lesson(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
) -> Result<Json<LessonResponse>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;

    if lesson.teacher_id != actor && lesson.student_id != actor {
        return Err(AppError::Unauthorized);
    }

    Ok(Json(LessonResponse::from(&lesson)))
}

pub async fn approve_lesson(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;
    let effect = apply_transition(&state, &lesson, LessonAction::Approve, &actor, None).await?;
    Ok(transition_response(&lesson, effect))
}

pub async fn decline_lesson(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;
    let effect = apply_transition(&state, &lesson, LessonAction::Decline, &actor, None).await?;
    Ok(transition_response(&lesson, effect))
}

/// Teacher proposes a new time (and optionally a new topic).
pub async fn propose_reschedule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
    Json(payload): Json<RescheduleLesson>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;

    let mut extra = doc! {
        "start_time": Bson::DateTime(payload.start_time.into()),
    };
    if let Some(topic) = &payload.topic {
        extra.insert("topic", topic);
    }

    let effect = apply_transition(
        &state,
        &lesson,
        LessonAction::ProposeReschedule,
        &actor,
        Some(extra),
    )
    .await?;
    Ok(transition_response(&lesson, effect))
}

pub async fn accept_reschedule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;
    let effect =
        apply_transition(&state, &lesson, LessonAction::AcceptReschedule, &actor, None).await?;
    Ok(transition_response(&lesson, effect))
}

/// Teacher marks the lesson as having happened; it now awaits payment.
pub async fn complete_lesson(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;
    let effect =
        apply_transition(&state, &lesson, LessonAction::MarkComplete, &actor, None).await?;
    Ok(transition_response(&lesson, effect))
}

/// Manual override for cash/offline settlement. Races cleanly with the
/// M-Pesa callback through the status guard.
pub async fn mark_lesson_paid(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;
    let effect = apply_transition(&state, &lesson, LessonAction::MarkPaid, &actor, None).await?;
    Ok(transition_response(&lesson, effect))
}

pub async fn cancel_lesson(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;
    let effect = apply_transition(&state, &lesson, LessonAction::Cancel, &actor, None).await?;
    Ok(transition_response(&lesson, effect))
}

pub async fn delete_lesson(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let actor = actor_id(&claims)?;
    let lesson = load_lesson(&state, &lesson_id).await?;
    let effect = apply_transition(&state, &lesson, LessonAction::Delete, &actor, None).await?;
    Ok(transition_response(&lesson, effect))
}
