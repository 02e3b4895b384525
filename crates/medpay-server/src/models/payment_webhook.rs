//! Append-only audit log of inbound gateway callbacks.
//!
//! Not authoritative state: the functional idempotency guarantee lives in
//! the payment/transaction state machines. This log answers "was this exact
//! callback already fully processed" and is the forensic trail for dispute
//! resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::payment_gateway::GatewayKind;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentWebhook {
    pub id: Uuid,
    pub gateway: GatewayKind,
    /// Resolved payment, filled in once known.
    pub payment_id: Option<Uuid>,
    /// Request headers as received.
    pub headers: serde_json::Value,
    /// Request body, verbatim.
    pub raw_body: String,
    /// Outcome of signature/authorization verification; null until checked.
    pub signature_valid: Option<bool>,
    /// Protocol response we returned.
    pub result: Option<serde_json::Value>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
