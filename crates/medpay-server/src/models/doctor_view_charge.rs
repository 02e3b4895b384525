//! Doctor-profile view charges: audit trail and quota-counting source.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per (user, doctor, calendar day) access event. `amount = 0`
/// records a free view; the count of a user's same-day zero-amount rows is
/// the daily quota consumption.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DoctorViewCharge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub doctor_id: Uuid,
    pub view_date: NaiveDate,
    pub amount: BigDecimal,
    /// Ledger entry for paid views; null for free views.
    pub wallet_transaction_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DoctorViewCharge {
    pub fn is_free(&self) -> bool {
        self.amount == BigDecimal::from(0)
    }
}

/// Client metadata attached to a view charge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDoctorViewCharge {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
