//! Click protocol extension of a Payment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One-to-one record of the Click side of a payment, created at `prepare`.
/// `merchant_prepare_id` is a database identity column, so the id echoed
/// back to Click is generated in the same insert that records the prepare.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClickTransaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    /// Click's transaction id; unique, and the replay key for idempotency.
    pub click_trans_id: i64,
    /// Our id Click replays back at `complete`.
    pub merchant_prepare_id: i64,
    /// `sign_time` recorded from the prepare callback.
    pub sign_time: String,
    /// Provider error code stored when `complete` reports failure.
    pub error_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
