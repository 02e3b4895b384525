//! Payment model: one top-up attempt and its lifecycle state machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use super::payment_gateway::GatewayKind;

/// Payment lifecycle states. The machine is strictly forward:
/// `pending -> processing -> completed | failed`, with `cancelled`/`expired`
/// reachable from `pending`, and refund states reachable only from
/// `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    /// Terminal states accept no forward transition except the documented
    /// refund path out of `completed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Expired
                | PaymentStatus::Refunded
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Completed, Refunded)
                | (Completed, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }
}

/// One top-up attempt. `total_amount = amount + commission`; the commission
/// is the provider's cut and is never credited to the wallet.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub gateway: GatewayKind,
    /// Amount to credit to the wallet on completion.
    pub amount: BigDecimal,
    /// Provider commission added on top.
    pub commission: BigDecimal,
    /// What the user actually pays at the gateway.
    pub total_amount: BigDecimal,
    pub status: PaymentStatus,
    /// Provider-side transaction reference once known.
    pub external_ref: Option<String>,
    /// Number of inbound callbacks that resolved this payment.
    pub attempts: i32,
    /// Pending payments past this instant are lazily expired.
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    /// A pending payment whose expiry has passed. Callers transition it to
    /// `expired` before rejecting the caller.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && now > self.expires_at
    }

    /// Total amount in the gateway's minor units (x100), for Payme amount
    /// validation.
    pub fn total_amount_minor(&self) -> BigDecimal {
        &self.total_amount * BigDecimal::from(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn payment(status: PaymentStatus) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            gateway: GatewayKind::Click,
            amount: BigDecimal::from_str("50000.00").unwrap(),
            commission: BigDecimal::from_str("500.00").unwrap(),
            total_amount: BigDecimal::from_str("50500.00").unwrap(),
            status,
            external_ref: None,
            attempts: 0,
            expires_at: now + Duration::minutes(15),
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Processing));
        assert!(PaymentStatus::Processing.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Processing.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Expired));
        assert!(PaymentStatus::Processing.can_transition_to(PaymentStatus::Cancelled));
        assert!(PaymentStatus::Completed.can_transition_to(PaymentStatus::Refunded));
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Processing));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Completed));
        assert!(!PaymentStatus::Expired.can_transition_to(PaymentStatus::Processing));
        assert!(!PaymentStatus::Cancelled.can_transition_to(PaymentStatus::Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Processing.is_terminal());
        assert!(!PaymentStatus::PartiallyRefunded.is_terminal());
    }

    #[test]
    fn test_total_amount_minor() {
        let p = payment(PaymentStatus::Pending);
        // 50,500.00 in minor units is 5,050,000
        assert_eq!(p.total_amount_minor(), BigDecimal::from(5_050_000));
    }

    #[test]
    fn test_is_stale() {
        let mut p = payment(PaymentStatus::Pending);
        let now = Utc::now();
        assert!(!p.is_stale(now));
        assert!(p.is_stale(now + Duration::minutes(16)));
        p.status = PaymentStatus::Completed;
        assert!(!p.is_stale(now + Duration::minutes(16)));
    }
}
