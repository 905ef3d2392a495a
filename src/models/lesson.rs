use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LessonStatus {
    Requested,
    Scheduled,
    ReschedulePending,
    PendingPayment,
    Paid,
    Completed,
    Cancelled,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Requested => "REQUESTED",
            LessonStatus::Scheduled => "SCHEDULED",
            LessonStatus::ReschedulePending => "RESCHEDULE_PENDING",
            LessonStatus::PendingPayment => "PENDING_PAYMENT",
            LessonStatus::Paid => "PAID",
            LessonStatus::Completed => "COMPLETED",
            LessonStatus::Cancelled => "CANCELLED",
        }
    }
}

/// What a principal is asking the lesson to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonAction {
    Approve,
    Decline,
    ProposeReschedule,
    AcceptReschedule,
    MarkComplete,
    MarkPaid,
    Cancel,
    Delete,
}

impl LessonAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonAction::Approve => "approve",
            LessonAction::Decline => "decline",
            LessonAction::ProposeReschedule => "propose-reschedule",
            LessonAction::AcceptReschedule => "accept-reschedule",
            LessonAction::MarkComplete => "mark-complete",
            LessonAction::MarkPaid => "mark-paid",
            LessonAction::Cancel => "cancel",
            LessonAction::Delete => "delete",
        }
    }
}

/// Outcome of a legal transition: a new status, or removal of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    SetStatus(LessonStatus),
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub teacher_id: ObjectId,
    pub student_id: ObjectId,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,

    pub topic: String,
    #[serde(default)]
    pub teacher_notes: String,

    /// Lesson fee in KES, fixed-point.
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub status: LessonStatus,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Lesson {
    pub const DEFAULT_PRICE_KES: &'static str = "1500.00";
    pub const DEFAULT_DURATION_MINUTES: u32 = 60;

    /// Single gate for every lesson mutation. Verifies that `actor` owns the
    /// side of the lesson the action belongs to, then that the action is
    /// legal from the current status. Wrong actor wins over wrong status:
    /// a stranger learns nothing about the lesson's state.
    pub fn transition(&self, action: LessonAction, actor: &ObjectId) -> Result<TransitionEffect> {
        self.authorize(action, actor)?;

        use LessonAction as A;
        use LessonStatus as S;

        let effect = match (self.status, action) {
            (S::Requested, A::Approve) => TransitionEffect::SetStatus(S::Scheduled),
            (S::Requested, A::Decline) => TransitionEffect::Remove,
            (S::Scheduled, A::ProposeReschedule) => TransitionEffect::SetStatus(S::ReschedulePending),
            (S::ReschedulePending, A::AcceptReschedule) => TransitionEffect::SetStatus(S::Scheduled),
            (S::Paid | S::Cancelled, A::MarkComplete) => {
                return Err(self.illegal(action));
            }
            (_, A::MarkComplete) => TransitionEffect::SetStatus(S::PendingPayment),
            (S::PendingPayment, A::MarkPaid) => TransitionEffect::SetStatus(S::Paid),
            (S::Requested | S::Scheduled | S::ReschedulePending, A::Cancel) => {
                TransitionEffect::SetStatus(S::Cancelled)
            }
            (S::Paid, A::Delete) => return Err(self.illegal(action)),
            (_, A::Delete) => TransitionEffect::Remove,
            _ => return Err(self.illegal(action)),
        };

        Ok(effect)
    }

    fn authorize(&self, action: LessonAction, actor: &ObjectId) -> Result<()> {
        use LessonAction as A;

        let allowed = match action {
            A::Approve
            | A::Decline
            | A::ProposeReschedule
            | A::MarkComplete
            | A::MarkPaid
            | A::Delete => *actor == self.teacher_id,
            A::AcceptReschedule => *actor == self.student_id,
            A::Cancel => *actor == self.teacher_id || *actor == self.student_id,
        };

        if allowed {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    fn illegal(&self, action: LessonAction) -> AppError {
        AppError::illegal_transition(format!(
            "cannot {} a {} lesson",
            action.as_str(),
            self.status.as_str()
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct RequestLesson {
    pub topic: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleLesson {
    pub start_time: DateTime<Utc>,
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LessonResponse {
    pub id: String,
    pub teacher_id: String,
    pub student_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub topic: String,
    pub teacher_notes: String,
    pub price: String,
    pub status: LessonStatus,
}

impl From<&Lesson> for LessonResponse {
    fn from(lesson: &Lesson) -> Self {
        LessonResponse {
            id: lesson._id.map(|id| id.to_hex()).unwrap_or_default(),
            teacher_id: lesson.teacher_id.to_hex(),
            student_id: lesson.student_id.to_hex(),
            start_time: lesson.start_time,
            duration_minutes: lesson.duration_minutes,
            topic: lesson.topic.clone(),
            teacher_notes: lesson.teacher_notes.clone(),
            price: lesson.price.to_string(),
            status: lesson.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_lesson(status: LessonStatus) -> (Lesson, ObjectId, ObjectId) {
        let teacher = ObjectId::new();
        let student = ObjectId::new();
        let now = Utc::now();
        let lesson = Lesson {
            _id: Some(ObjectId::new()),
            teacher_id: teacher,
            student_id: student,
            start_time: now,
            duration_minutes: Lesson::DEFAULT_DURATION_MINUTES,
            topic: "Major Scales".to_string(),
            teacher_notes: String::new(),
            price: dec!(1500.00),
            status,
            created_at: now,
            updated_at: now,
        };
        (lesson, teacher, student)
    }

    #[test]
    fn teacher_approves_requested_lesson() {
        let (lesson, teacher, _) = make_lesson(LessonStatus::Requested);
        let effect = lesson.transition(LessonAction::Approve, &teacher).unwrap();
        assert_eq!(effect, TransitionEffect::SetStatus(LessonStatus::Scheduled));
    }

    #[test]
    fn stranger_cannot_approve() {
        let (lesson, _, _) = make_lesson(LessonStatus::Requested);
        let stranger = ObjectId::new();
        let err = lesson.transition(LessonAction::Approve, &stranger).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn student_cannot_approve_own_request() {
        let (lesson, _, student) = make_lesson(LessonStatus::Requested);
        let err = lesson.transition(LessonAction::Approve, &student).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn approve_only_from_requested() {
        let (lesson, teacher, _) = make_lesson(LessonStatus::Scheduled);
        let err = lesson.transition(LessonAction::Approve, &teacher).unwrap_err();
        assert!(matches!(err, AppError::IllegalTransition(_)));
    }

    #[test]
    fn teacher_declines_requested_lesson() {
        let (lesson, teacher, _) = make_lesson(LessonStatus::Requested);
        let effect = lesson.transition(LessonAction::Decline, &teacher).unwrap();
        assert_eq!(effect, TransitionEffect::Remove);
    }

    #[test]
    fn student_cannot_decline() {
        let (lesson, _, student) = make_lesson(LessonStatus::Requested);
        let err = lesson.transition(LessonAction::Decline, &student).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn reschedule_round_trip() {
        let (mut lesson, teacher, student) = make_lesson(LessonStatus::Scheduled);

        let effect = lesson
            .transition(LessonAction::ProposeReschedule, &teacher)
            .unwrap();
        assert_eq!(
            effect,
            TransitionEffect::SetStatus(LessonStatus::ReschedulePending)
        );

        lesson.status = LessonStatus::ReschedulePending;
        let effect = lesson
            .transition(LessonAction::AcceptReschedule, &student)
            .unwrap();
        assert_eq!(effect, TransitionEffect::SetStatus(LessonStatus::Scheduled));
    }

    #[test]
    fn teacher_cannot_accept_own_reschedule() {
        let (lesson, teacher, _) = make_lesson(LessonStatus::ReschedulePending);
        let err = lesson
            .transition(LessonAction::AcceptReschedule, &teacher)
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn mark_complete_moves_to_pending_payment() {
        for status in [
            LessonStatus::Requested,
            LessonStatus::Scheduled,
            LessonStatus::ReschedulePending,
            LessonStatus::Completed,
        ] {
            let (lesson, teacher, _) = make_lesson(status);
            let effect = lesson.transition(LessonAction::MarkComplete, &teacher).unwrap();
            assert_eq!(
                effect,
                TransitionEffect::SetStatus(LessonStatus::PendingPayment)
            );
        }
    }

    #[test]
    fn cannot_mark_complete_a_settled_lesson() {
        for status in [LessonStatus::Paid, LessonStatus::Cancelled] {
            let (lesson, teacher, _) = make_lesson(status);
            let err = lesson
                .transition(LessonAction::MarkComplete, &teacher)
                .unwrap_err();
            assert!(matches!(err, AppError::IllegalTransition(_)));
        }
    }

    #[test]
    fn manual_mark_paid_from_pending_payment_only() {
        let (lesson, teacher, _) = make_lesson(LessonStatus::PendingPayment);
        let effect = lesson.transition(LessonAction::MarkPaid, &teacher).unwrap();
        assert_eq!(effect, TransitionEffect::SetStatus(LessonStatus::Paid));

        let (lesson, teacher, _) = make_lesson(LessonStatus::Scheduled);
        let err = lesson.transition(LessonAction::MarkPaid, &teacher).unwrap_err();
        assert!(matches!(err, AppError::IllegalTransition(_)));
    }

    #[test]
    fn either_party_cancels_before_completion() {
        let (lesson, teacher, student) = make_lesson(LessonStatus::Scheduled);
        assert_eq!(
            lesson.transition(LessonAction::Cancel, &teacher).unwrap(),
            TransitionEffect::SetStatus(LessonStatus::Cancelled)
        );
        assert_eq!(
            lesson.transition(LessonAction::Cancel, &student).unwrap(),
            TransitionEffect::SetStatus(LessonStatus::Cancelled)
        );
    }

    #[test]
    fn cannot_cancel_after_payment_starts() {
        let (lesson, _, student) = make_lesson(LessonStatus::PendingPayment);
        let err = lesson.transition(LessonAction::Cancel, &student).unwrap_err();
        assert!(matches!(err, AppError::IllegalTransition(_)));
    }

    #[test]
    fn teacher_deletes_any_unpaid_lesson() {
        let (lesson, teacher, _) = make_lesson(LessonStatus::Scheduled);
        assert_eq!(
            lesson.transition(LessonAction::Delete, &teacher).unwrap(),
            TransitionEffect::Remove
        );

        let (lesson, teacher, _) = make_lesson(LessonStatus::Paid);
        let err = lesson.transition(LessonAction::Delete, &teacher).unwrap_err();
        assert!(matches!(err, AppError::IllegalTransition(_)));
    }

    #[test]
    fn status_wire_format_matches_store() {
        assert_eq!(
            serde_json::to_string(&LessonStatus::ReschedulePending).unwrap(),
            "\"RESCHEDULE_PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&LessonStatus::PendingPayment).unwrap(),
            "\"PENDING_PAYMENT\""
        );
        let parsed: LessonStatus = serde_json::from_str("\"PAID\"").unwrap();
        assert_eq!(parsed, LessonStatus::Paid);
    }
}
