//! Billing rules: price per service type with quantity discounts.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Billable service types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "service_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Viewing a doctor's full profile (metered with free quotas).
    DoctorView,
    /// Booking a video consultation.
    VideoConsultation,
    /// Opening a chat consultation.
    ChatConsultation,
}

/// Pricing rule for one service type. One active rule per service type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingRule {
    /// Unique identifier for this rule.
    pub id: Uuid,
    /// Service this rule prices.
    pub service_type: ServiceType,
    /// Price per unit before discount.
    pub base_price: BigDecimal,
    /// Inactive rules are ignored; no rule means "service unavailable",
    /// never free access.
    pub is_active: bool,
    /// Discount percentage (0-100).
    pub discount_pct: BigDecimal,
    /// Minimum quantity for the discount to apply.
    pub min_qty_for_discount: i32,
    /// When this rule was created.
    pub created_at: DateTime<Utc>,
    /// When this rule was last updated.
    pub updated_at: DateTime<Utc>,
}

impl BillingRule {
    /// Effective unit price for a given quantity:
    /// `base_price * (1 - discount_pct/100)` when `qty >= min_qty_for_discount`,
    /// else `base_price`.
    pub fn effective_unit_price(&self, qty: i32) -> BigDecimal {
        if qty >= self.min_qty_for_discount && self.discount_pct > BigDecimal::from(0) {
            let discount = &self.base_price * &self.discount_pct / BigDecimal::from(100);
            &self.base_price - discount
        } else {
            self.base_price.clone()
        }
    }

    /// Total price for a quantity at the effective unit price.
    pub fn total_price(&self, qty: i32) -> BigDecimal {
        self.effective_unit_price(qty) * BigDecimal::from(qty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn rule(base: &str, discount: &str, min_qty: i32) -> BillingRule {
        let now = Utc::now();
        BillingRule {
            id: Uuid::new_v4(),
            service_type: ServiceType::DoctorView,
            base_price: BigDecimal::from_str(base).unwrap(),
            is_active: true,
            discount_pct: BigDecimal::from_str(discount).unwrap(),
            min_qty_for_discount: min_qty,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_service_type_serialization() {
        assert_eq!(
            serde_json::to_string(&ServiceType::DoctorView).unwrap(),
            "\"doctor_view\""
        );
        assert_eq!(
            serde_json::to_string(&ServiceType::VideoConsultation).unwrap(),
            "\"video_consultation\""
        );
    }

    #[test]
    fn test_no_discount_below_threshold() {
        let rule = rule("10000.00", "20.00", 5);
        assert_eq!(
            rule.effective_unit_price(4),
            BigDecimal::from_str("10000.00").unwrap()
        );
    }

    #[test]
    fn test_discount_at_threshold() {
        let rule = rule("10000.00", "20.00", 5);
        assert_eq!(
            rule.effective_unit_price(5),
            BigDecimal::from_str("8000.00").unwrap()
        );
        assert_eq!(
            rule.total_price(5),
            BigDecimal::from_str("40000.00").unwrap()
        );
    }

    #[test]
    fn test_zero_discount_rule() {
        let rule = rule("10000.00", "0.00", 1);
        assert_eq!(
            rule.effective_unit_price(100),
            BigDecimal::from_str("10000.00").unwrap()
        );
    }
}
