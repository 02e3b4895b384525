//! Wallet model: one stored balance per user.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user's wallet. The balance is never mutated except through a paired
/// `WalletTransaction`; it must equal the running sum of that user's
/// completed transactions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    /// Unique identifier for this wallet.
    pub id: Uuid,
    /// Owning user (one wallet per user).
    pub user_id: Uuid,
    /// Current balance. Non-negative by database constraint.
    pub balance: BigDecimal,
    /// Lifetime sum of completed debits.
    pub total_spent: BigDecimal,
    /// Lifetime sum of completed credits.
    pub total_topped_up: BigDecimal,
    /// Blocked wallets refuse debits.
    pub is_blocked: bool,
    /// When this wallet was created.
    pub created_at: DateTime<Utc>,
    /// When this wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Returns true if the wallet can cover the given amount.
    pub fn has_sufficient_balance(&self, amount: &BigDecimal) -> bool {
        &self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn wallet_with_balance(balance: &str) -> Wallet {
        let now = Utc::now();
        Wallet {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            balance: BigDecimal::from_str(balance).unwrap(),
            total_spent: BigDecimal::from(0),
            total_topped_up: BigDecimal::from(0),
            is_blocked: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_has_sufficient_balance() {
        let wallet = wallet_with_balance("5000.00");
        assert!(wallet.has_sufficient_balance(&BigDecimal::from_str("5000.00").unwrap()));
        assert!(wallet.has_sufficient_balance(&BigDecimal::from_str("4999.99").unwrap()));
        assert!(!wallet.has_sufficient_balance(&BigDecimal::from_str("5000.01").unwrap()));
    }
}
