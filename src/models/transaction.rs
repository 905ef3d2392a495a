use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Lifecycle of one payment attempt. `Pending` rows are the only ones the
/// callback reconciler may claim; `Success`/`Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpesaTransaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub lesson_id: ObjectId,
    /// Opaque gateway token correlating the async callback with this row.
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone_number: String,
    /// Whole KES, as sent to the gateway.
    pub amount: u64,
    pub status: TransactionStatus,
    pub is_successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpesa_receipt_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_description: Option<String>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub checkout_request_id: String,
    pub lesson_id: String,
    pub phone_number: String,
    pub amount: u64,
    pub status: TransactionStatus,
    pub is_successful: bool,
    pub mpesa_receipt_number: Option<String>,
    pub result_description: Option<String>,
}

impl From<&MpesaTransaction> for TransactionResponse {
    fn from(tx: &MpesaTransaction) -> Self {
        TransactionResponse {
            checkout_request_id: tx.checkout_request_id.clone(),
            lesson_id: tx.lesson_id.to_hex(),
            phone_number: tx.phone_number.clone(),
            amount: tx.amount,
            status: tx.status,
            is_successful: tx.is_successful,
            mpesa_receipt_number: tx.mpesa_receipt_number.clone(),
            result_description: tx.result_description.clone(),
        }
    }
}

// ---- Inbound callback wire format (Daraja STK push result) ----

#[derive(Debug, Deserialize)]
pub struct MpesaCallback {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i32,

    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,

    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

/// What a parsed callback asks the reconciler to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success { receipt: Option<String> },
    Failure { description: String },
}

impl StkCallback {
    /// Parses the raw POST body. Errors map to `MalformedCallback` so the
    /// handler can log and still acknowledge.
    pub fn parse(body: &str) -> Result<StkCallback> {
        let callback: MpesaCallback = serde_json::from_str(body)?;
        Ok(callback.body.stk_callback)
    }

    pub fn outcome(&self) -> CallbackOutcome {
        if self.result_code == 0 {
            CallbackOutcome::Success {
                receipt: self.metadata_value("MpesaReceiptNumber"),
            }
        } else {
            CallbackOutcome::Failure {
                description: self.result_desc.clone(),
            }
        }
    }

    fn metadata_value(&self, name: &str) -> Option<String> {
        let items = &self.callback_metadata.as_ref()?.items;
        items.iter().find(|item| item.name == name).map(|item| {
            match &item.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS_BODY: &str = r#"{
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 1500.00},
                        {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                        {"Name": "TransactionDate", "Value": 20191219102115},
                        {"Name": "PhoneNumber", "Value": 254708374149}
                    ]
                }
            }
        }
    }"#;

    const FAILURE_BODY: &str = r#"{
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user."
            }
        }
    }"#;

    #[test]
    fn parses_successful_callback() {
        let callback = StkCallback::parse(SUCCESS_BODY).unwrap();
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.result_code, 0);
        assert_eq!(
            callback.outcome(),
            CallbackOutcome::Success {
                receipt: Some("NLJ7RT61SV".to_string())
            }
        );
    }

    #[test]
    fn parses_failure_callback_without_metadata() {
        let callback = StkCallback::parse(FAILURE_BODY).unwrap();
        assert_eq!(
            callback.outcome(),
            CallbackOutcome::Failure {
                description: "Request cancelled by user.".to_string()
            }
        );
    }

    #[test]
    fn success_without_receipt_item_is_still_success() {
        let body = r#"{
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 0,
                    "ResultDesc": "ok",
                    "CallbackMetadata": {"Item": [{"Name": "Amount", "Value": 10}]}
                }
            }
        }"#;
        let callback = StkCallback::parse(body).unwrap();
        assert_eq!(callback.outcome(), CallbackOutcome::Success { receipt: None });
    }

    #[test]
    fn numeric_receipt_value_is_stringified() {
        let body = r#"{
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 0,
                    "ResultDesc": "ok",
                    "CallbackMetadata": {"Item": [{"Name": "MpesaReceiptNumber", "Value": 12345}]}
                }
            }
        }"#;
        let callback = StkCallback::parse(body).unwrap();
        assert_eq!(
            callback.outcome(),
            CallbackOutcome::Success {
                receipt: Some("12345".to_string())
            }
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(StkCallback::parse("not json").is_err());
        assert!(StkCallback::parse("{}").is_err());
        assert!(StkCallback::parse(r#"{"Body": {}}"#).is_err());
    }

    /// Full payment lifecycle with a redelivered success callback: the
    /// claim filter (only a PENDING row may settle) makes the second
    /// delivery a no-op, so the lesson is paid exactly once.
    #[test]
    fn duplicate_success_callback_settles_exactly_once() {
        use crate::models::lesson::{Lesson, LessonAction, LessonStatus, TransitionEffect};
        use chrono::Utc;
        use rust_decimal_macros::dec;

        let teacher = ObjectId::new();
        let student = ObjectId::new();
        let now = Utc::now();
        let mut lesson = Lesson {
            _id: Some(ObjectId::new()),
            teacher_id: teacher,
            student_id: student,
            start_time: now,
            duration_minutes: 60,
            topic: "Jazz Piano Basics".to_string(),
            teacher_notes: String::new(),
            price: dec!(1500.00),
            status: LessonStatus::Requested,
            created_at: now,
            updated_at: now,
        };

        for action in [LessonAction::Approve, LessonAction::MarkComplete] {
            match lesson.transition(action, &teacher).unwrap() {
                TransitionEffect::SetStatus(next) => lesson.status = next,
                TransitionEffect::Remove => unreachable!(),
            }
        }
        assert_eq!(lesson.status, LessonStatus::PendingPayment);

        let mut tx = MpesaTransaction {
            _id: Some(ObjectId::new()),
            lesson_id: lesson._id.unwrap(),
            checkout_request_id: "ws_1".to_string(),
            merchant_request_id: "29115-1".to_string(),
            phone_number: "254712345678".to_string(),
            amount: 1500,
            status: TransactionStatus::Pending,
            is_successful: false,
            mpesa_receipt_number: None,
            result_description: None,
            created_at: now,
            updated_at: now,
        };

        let body = r#"{
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_1",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [{"Name": "MpesaReceiptNumber", "Value": "ABC123"}]
                    }
                }
            }
        }"#;

        let mut lesson_writes = 0;
        for _ in 0..2 {
            let callback = StkCallback::parse(body).unwrap();
            assert_eq!(callback.checkout_request_id, tx.checkout_request_id);

            // Only a still-pending row may be claimed.
            if tx.status != TransactionStatus::Pending {
                continue;
            }
            match callback.outcome() {
                CallbackOutcome::Success { receipt } => {
                    tx.status = TransactionStatus::Success;
                    tx.is_successful = true;
                    tx.mpesa_receipt_number = receipt;
                    if lesson.status == LessonStatus::PendingPayment {
                        lesson.status = LessonStatus::Paid;
                        lesson_writes += 1;
                    }
                }
                CallbackOutcome::Failure { .. } => unreachable!(),
            }
        }

        assert_eq!(lesson_writes, 1);
        assert!(tx.is_successful);
        assert_eq!(tx.mpesa_receipt_number.as_deref(), Some("ABC123"));
        assert_eq!(lesson.status, LessonStatus::Paid);
    }
}
