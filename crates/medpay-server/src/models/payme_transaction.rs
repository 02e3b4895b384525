//! Payme protocol extension of a Payment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payme transaction lifecycle states, as the protocol numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum PaymeState {
    Created = 1,
    Performed = 2,
    CancelledBeforePerform = -1,
    CancelledAfterPerform = -2,
}

impl PaymeState {
    /// Protocol-numbered state code used in JSON-RPC responses.
    pub fn code(&self) -> i16 {
        *self as i16
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PaymeState::CancelledBeforePerform | PaymeState::CancelledAfterPerform
        )
    }
}

/// One-to-one record of the Payme side of a payment, created by
/// `CreateTransaction`. All times in the `*_time` fields are provider-facing
/// Unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymeTransaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    /// Payme's transaction id; unique, and the replay key for idempotency.
    pub payme_id: String,
    pub state: PaymeState,
    pub create_time: i64,
    pub perform_time: Option<i64>,
    pub cancel_time: Option<i64>,
    pub cancel_reason: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
