// handlers/mpesa_handlers.rs
use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
    Extension,
};
use chrono::Utc;
use mongodb::bson::{doc, oid::ObjectId, Bson};
use mongodb::Collection;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::lesson::{Lesson, LessonStatus};
use crate::models::transaction::{
    CallbackOutcome, MpesaTransaction, StkCallback, TransactionResponse, TransactionStatus,
};
use crate::models::user::{Claims, User};
use crate::services::phone::normalize_phone;
use crate::state::AppState;

const SUPERSEDED_DESC: &str = "Superseded by a newer payment attempt";

#[derive(Debug, Deserialize)]
pub struct PayLessonRequest {
    /// Overrides the student's profile phone when given.
    pub phone_number: Option<String>,
}

/// Starts an STK push for a lesson awaiting payment. The paying student may
/// retry; each retry supersedes the previous pending attempt.
pub async fn initiate_lesson_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(lesson_id): Path<String>,
    Json(payload): Json<PayLessonRequest>,
) -> Result<Json<serde_json::Value>> {
    let mpesa_service = state
        .mpesa_service
        .as_ref()
        .ok_or_else(|| AppError::GatewayUnavailable("M-Pesa service is not configured".into()))?;

    let actor = ObjectId::parse_str(&claims.sub).map_err(|_| AppError::AuthError)?;

    let lessons: Collection<Lesson> = state.db.collection("lessons");
    let lesson_oid = ObjectId::parse_str(&lesson_id)?;
    let lesson = lessons
        .find_one(doc! { "_id": lesson_oid })
        .await?
        .ok_or(AppError::DocumentNotFound)?;

    if lesson.student_id != actor {
        return Err(AppError::Unauthorized);
    }

    if lesson.status != LessonStatus::PendingPayment {
        return Err(AppError::illegal_transition(format!(
            "cannot pay for a {} lesson",
            lesson.status.as_str()
        )));
    }

    // Explicit number wins over the profile one.
    let raw_phone = match &payload.phone_number {
        Some(phone) => phone.clone(),
        None => {
            let users: Collection<User> = state.db.collection("users");
            let student = users
                .find_one(doc! { "_id": lesson.student_id })
                .await?
                .ok_or(AppError::DocumentNotFound)?;
            student.phone.ok_or_else(|| {
                AppError::invalid_data("No phone number on file; provide one with the request")
            })?
        }
    };
    let phone = normalize_phone(&raw_phone)?;

    // The gateway takes whole shillings.
    let amount = lesson
        .price
        .round()
        .to_u64()
        .filter(|kes| *kes >= 1)
        .ok_or_else(|| AppError::invalid_data("Lesson price does not convert to whole KES"))?;

    let account_reference = format!("LESSON-{}", lesson_oid.to_hex());
    let description = format!("Lesson: {}", lesson.topic);

    let stk_response = mpesa_service
        .initiate_stk_push(&phone, amount, &account_reference, &description)
        .await?;

    let transactions: Collection<MpesaTransaction> = state.db.collection("mpesa_transactions");

    // Supersede policy: a fresh attempt retires any still-pending one so at
    // most one transaction per lesson can ever be claimed by a callback.
    let superseded = transactions
        .update_many(
            doc! { "lesson_id": lesson_oid, "status": TransactionStatus::Pending.as_str() },
            doc! { "$set": {
                "status": TransactionStatus::Failed.as_str(),
                "is_successful": false,
                "result_description": SUPERSEDED_DESC,
                "updated_at": mongodb::bson::DateTime::now(),
            }},
        )
        .await?;
    if superseded.modified_count > 0 {
        info!(
            lesson_id = %lesson_oid.to_hex(),
            count = superseded.modified_count,
            "superseded pending payment attempts"
        );
    }

    // The pending row must exist before the gateway can call back.
    let transaction = MpesaTransaction {
        _id: Some(ObjectId::new()),
        lesson_id: lesson_oid,
        checkout_request_id: stk_response.checkout_request_id.clone(),
        merchant_request_id: stk_response.merchant_request_id.clone(),
        phone_number: phone.clone(),
        amount,
        status: TransactionStatus::Pending,
        is_successful: false,
        mpesa_receipt_number: None,
        result_description: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    transactions.insert_one(&transaction).await?;

    info!(
        lesson_id = %lesson_oid.to_hex(),
        checkout_request_id = %transaction.checkout_request_id,
        "payment initiated"
    );

    Ok(Json(json!({
        "success": true,
        "checkout_request_id": transaction.checkout_request_id,
        "merchant_request_id": transaction.merchant_request_id,
        "amount": amount,
        "phone_number": phone,
        "customer_message": stk_response.customer_message,
    })))
}

/// Fixed acknowledgment for the gateway. Anything else makes Daraja retry
/// the delivery forever.
fn ack() -> Json<serde_json::Value> {
    Json(json!({
        "ResultCode": 0,
        "ResultDesc": "Accepted"
    }))
}

/// Inbound STK result. Unauthenticated and delivered at least once, so the
/// payload is never trusted and the reply is always the success envelope;
/// every internal problem, including a body that is not even UTF-8, ends at
/// a log line. Raw `Bytes` on purpose: any extractor that can reject would
/// hand the gateway a failure status and trigger endless redelivery.
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> Json<serde_json::Value> {
    let body = String::from_utf8_lossy(&body);
    match reconcile_callback(&state, &body).await {
        Ok(Reconciliation::PaymentApplied { receipt }) => {
            info!(receipt = receipt.as_deref().unwrap_or(""), "payment reconciled, lesson marked PAID");
        }
        Ok(Reconciliation::FailureRecorded { description }) => {
            info!(description = %description, "payment attempt failed, recorded");
        }
        Ok(Reconciliation::AlreadySettled) => {
            info!("duplicate callback for settled transaction, ignored");
        }
        Err(AppError::MalformedCallback(msg)) => {
            warn!("malformed M-Pesa callback: {}", msg);
        }
        Err(AppError::UnknownTransaction(id)) => {
            warn!(checkout_request_id = %id, "callback for unknown transaction, ignored");
        }
        Err(e) => {
            error!("callback reconciliation error: {}", e);
        }
    }

    ack()
}

enum Reconciliation {
    PaymentApplied { receipt: Option<String> },
    FailureRecorded { description: String },
    AlreadySettled,
}

async fn reconcile_callback(state: &AppState, body: &str) -> Result<Reconciliation> {
    let callback = StkCallback::parse(body)?;
    let outcome = callback.outcome();

    let transactions: Collection<MpesaTransaction> = state.db.collection("mpesa_transactions");

    // Atomic claim: only a still-pending row can be moved to a terminal
    // state, so redelivered callbacks and override races lose here and
    // never touch the lesson again.
    let claim = doc! {
        "checkout_request_id": &callback.checkout_request_id,
        "status": TransactionStatus::Pending.as_str(),
    };

    let update = match &outcome {
        CallbackOutcome::Success { receipt } => doc! { "$set": {
            "status": TransactionStatus::Success.as_str(),
            "is_successful": true,
            "mpesa_receipt_number": receipt.as_deref().map(Bson::from).unwrap_or(Bson::Null),
            "result_description": &callback.result_desc,
            "updated_at": mongodb::bson::DateTime::now(),
        }},
        CallbackOutcome::Failure { description } => doc! { "$set": {
            "status": TransactionStatus::Failed.as_str(),
            "is_successful": false,
            "result_description": description,
            "updated_at": mongodb::bson::DateTime::now(),
        }},
    };

    let claimed = transactions.find_one_and_update(claim, update).await?;

    let transaction = match claimed {
        Some(tx) => tx,
        None => {
            // Either a duplicate delivery of a settled callback or a stale
            // checkout id we never issued.
            let known = transactions
                .find_one(doc! { "checkout_request_id": &callback.checkout_request_id })
                .await?;
            return match known {
                Some(_) => Ok(Reconciliation::AlreadySettled),
                None => Err(AppError::UnknownTransaction(
                    callback.checkout_request_id.clone(),
                )),
            };
        }
    };

    match outcome {
        CallbackOutcome::Success { receipt } => {
            let lessons: Collection<Lesson> = state.db.collection("lessons");
            let result = lessons
                .update_one(
                    doc! {
                        "_id": transaction.lesson_id,
                        "status": LessonStatus::PendingPayment.as_str(),
                    },
                    doc! { "$set": {
                        "status": LessonStatus::Paid.as_str(),
                        "updated_at": mongodb::bson::DateTime::now(),
                    }},
                )
                .await?;
            if result.modified_count == 0 {
                // Manual mark-paid got there first; the money is recorded on
                // the transaction either way.
                warn!(
                    lesson_id = %transaction.lesson_id.to_hex(),
                    "lesson was not awaiting payment when callback settled"
                );
            }
            Ok(Reconciliation::PaymentApplied { receipt })
        }
        CallbackOutcome::Failure { description } => {
            Ok(Reconciliation::FailureRecorded { description })
        }
    }
}

/// Transaction read model for the paying student or the teacher.
pub async fn check_payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<TransactionResponse>> {
    let actor = ObjectId::parse_str(&claims.sub).map_err(|_| AppError::AuthError)?;

    let transactions: Collection<MpesaTransaction> = state.db.collection("mpesa_transactions");
    let transaction = transactions
        .find_one(doc! { "checkout_request_id": &checkout_request_id })
        .await?
        .ok_or_else(|| AppError::UnknownTransaction(checkout_request_id.clone()))?;

    let lessons: Collection<Lesson> = state.db.collection("lessons");
    let lesson = lessons
        .find_one(doc! { "_id": transaction.lesson_id })
        .await?;

    authorize_transaction_view(lesson.as_ref(), &actor)?;

    Ok(Json(TransactionResponse::from(&transaction)))
}

/// Fail closed: a transaction whose lesson is gone is visible to nobody.
fn authorize_transaction_view(lesson: Option<&Lesson>, actor: &ObjectId) -> Result<()> {
    match lesson {
        Some(lesson) if lesson.teacher_id == *actor || lesson.student_id == *actor => Ok(()),
        Some(_) => Err(AppError::Unauthorized),
        None => Err(AppError::DocumentNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    #[test]
    fn ack_envelope_is_the_fixed_success_shape() {
        let Json(value) = ack();
        assert_eq!(value["ResultCode"], 0);
        assert_eq!(value["ResultDesc"], "Accepted");
    }

    // Client construction is lazy, so no Mongo server is needed as long as
    // the request never reaches a collection operation.
    async fn callback_router() -> Router {
        let client = mongodb::Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap();
        let state = AppState::new(client.database("tutti_test"));
        Router::new()
            .route("/callback", post(mpesa_callback))
            .with_state(state)
    }

    async fn assert_acked(response: axum::response::Response) {
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["ResultCode"], 0);
        assert_eq!(value["ResultDesc"], "Accepted");
    }

    #[tokio::test]
    async fn callback_acks_non_utf8_body() {
        let app = callback_router().await;
        let request = Request::builder()
            .method("POST")
            .uri("/callback")
            .body(Body::from(vec![0xff, 0xfe, 0x00, 0x01]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_acked(response).await;
    }

    #[tokio::test]
    async fn callback_acks_malformed_json() {
        let app = callback_router().await;
        let request = Request::builder()
            .method("POST")
            .uri("/callback")
            .body(Body::from("definitely not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_acked(response).await;
    }

    fn view_lesson(teacher: ObjectId, student: ObjectId) -> Lesson {
        let now = Utc::now();
        Lesson {
            _id: Some(ObjectId::new()),
            teacher_id: teacher,
            student_id: student,
            start_time: now,
            duration_minutes: 60,
            topic: "Sight Reading".to_string(),
            teacher_notes: String::new(),
            price: dec!(1500.00),
            status: LessonStatus::PendingPayment,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn transaction_view_requires_a_participant() {
        let teacher = ObjectId::new();
        let student = ObjectId::new();
        let lesson = view_lesson(teacher, student);

        assert!(authorize_transaction_view(Some(&lesson), &teacher).is_ok());
        assert!(authorize_transaction_view(Some(&lesson), &student).is_ok());

        let stranger = ObjectId::new();
        assert!(matches!(
            authorize_transaction_view(Some(&lesson), &stranger),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn transaction_view_fails_closed_without_a_lesson() {
        let anyone = ObjectId::new();
        assert!(matches!(
            authorize_transaction_view(None, &anyone),
            Err(AppError::DocumentNotFound)
        ));
    }
}
