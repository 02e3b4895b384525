//! Payment gateway configuration.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Supported external payment gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_gateway_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// Click REST-style prepare/complete callbacks.
    Click,
    /// Payme JSON-RPC 2.0 merchant API.
    Payme,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Click => "click",
            GatewayKind::Payme => "payme",
        }
    }
}

/// How the gateway's commission is computed on top of the credited amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "commission_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommissionType {
    /// Percentage of the amount.
    Percentage,
    /// Flat fee per payment.
    Fixed,
    /// Percentage plus flat fee.
    Combined,
}

/// Configuration for one external payment provider.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentGateway {
    pub id: Uuid,
    pub kind: GatewayKind,
    /// Merchant/cabinet identifier issued by the provider.
    pub merchant_id: String,
    /// Provider-side service identifier (Click service_id, Payme account
    /// key owner).
    pub service_id: String,
    /// Shared secret for callback authentication.
    pub secret_key: String,
    /// Minimum amount this gateway accepts.
    pub min_amount: BigDecimal,
    /// Maximum amount this gateway accepts.
    pub max_amount: BigDecimal,
    pub commission_type: CommissionType,
    /// Percentage component (0-100).
    pub commission_pct: BigDecimal,
    /// Fixed component.
    pub commission_fixed: BigDecimal,
    /// Ledger currency code.
    pub currency: String,
    pub is_active: bool,
    pub test_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentGateway {
    /// Commission the provider takes for a payment of `amount`, rounded to
    /// 2 decimal places. The commission is the provider's cut: the user pays
    /// `amount + commission`, the wallet is credited `amount`.
    pub fn commission_for(&self, amount: &BigDecimal) -> BigDecimal {
        let pct_part = amount * &self.commission_pct / BigDecimal::from(100);
        let raw = match self.commission_type {
            CommissionType::Percentage => pct_part,
            CommissionType::Fixed => self.commission_fixed.clone(),
            CommissionType::Combined => pct_part + &self.commission_fixed,
        };
        raw.with_scale_round(2, RoundingMode::HalfUp)
    }

    /// Returns true if `amount` is within this gateway's accepted bounds.
    pub fn accepts_amount(&self, amount: &BigDecimal) -> bool {
        amount >= &self.min_amount && amount <= &self.max_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn gateway(kind: GatewayKind, commission_type: CommissionType) -> PaymentGateway {
        let now = Utc::now();
        PaymentGateway {
            id: Uuid::new_v4(),
            kind,
            merchant_id: "merchant-1".to_string(),
            service_id: "12345".to_string(),
            secret_key: "SECRET_KEY".to_string(),
            min_amount: BigDecimal::from_str("1000.00").unwrap(),
            max_amount: BigDecimal::from_str("10000000.00").unwrap(),
            commission_type,
            commission_pct: BigDecimal::from_str("1.00").unwrap(),
            commission_fixed: BigDecimal::from_str("500.00").unwrap(),
            currency: "UZS".to_string(),
            is_active: true,
            test_mode: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_percentage_commission() {
        let gw = gateway(GatewayKind::Click, CommissionType::Percentage);
        // 1% of 50,000 = 500
        assert_eq!(
            gw.commission_for(&BigDecimal::from_str("50000.00").unwrap()),
            BigDecimal::from_str("500.00").unwrap()
        );
    }

    #[test]
    fn test_fixed_commission() {
        let gw = gateway(GatewayKind::Payme, CommissionType::Fixed);
        assert_eq!(
            gw.commission_for(&BigDecimal::from_str("50000.00").unwrap()),
            BigDecimal::from_str("500.00").unwrap()
        );
    }

    #[test]
    fn test_combined_commission() {
        let gw = gateway(GatewayKind::Click, CommissionType::Combined);
        assert_eq!(
            gw.commission_for(&BigDecimal::from_str("50000.00").unwrap()),
            BigDecimal::from_str("1000.00").unwrap()
        );
    }

    #[test]
    fn test_commission_rounds_half_up() {
        let mut gw = gateway(GatewayKind::Click, CommissionType::Percentage);
        gw.commission_pct = BigDecimal::from_str("1.50").unwrap();
        // 1.5% of 333.33 = 4.99995 -> 5.00
        assert_eq!(
            gw.commission_for(&BigDecimal::from_str("333.33").unwrap()),
            BigDecimal::from_str("5.00").unwrap()
        );
    }

    #[test]
    fn test_accepts_amount_bounds() {
        let gw = gateway(GatewayKind::Click, CommissionType::Percentage);
        assert!(gw.accepts_amount(&BigDecimal::from_str("1000.00").unwrap()));
        assert!(gw.accepts_amount(&BigDecimal::from_str("10000000.00").unwrap()));
        assert!(!gw.accepts_amount(&BigDecimal::from_str("999.99").unwrap()));
        assert!(!gw.accepts_amount(&BigDecimal::from_str("10000000.01").unwrap()));
    }
}
