//! Append-only wallet transaction ledger entries.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Direction of a wallet transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_tx_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletTxType {
    /// Balance increased (top-up, reversal release).
    Credit,
    /// Balance decreased (service charge, refund reversal).
    Debit,
}

/// Status of a ledger entry. Entries are never rewritten; a cancelled entry
/// keeps its snapshots and is excluded from the balance chain only if it was
/// never applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_tx_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletTxStatus {
    Completed,
    Cancelled,
}

/// An immutable ledger entry. `balance_before`/`balance_after` must form a
/// contiguous chain per wallet when ordered by creation time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletTransaction {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// Wallet this entry belongs to.
    pub wallet_id: Uuid,
    /// Credit or debit.
    pub tx_type: WalletTxType,
    /// Amount moved. Zero only for the free-usage marker entry.
    pub amount: BigDecimal,
    /// Balance snapshot before this entry was applied.
    pub balance_before: BigDecimal,
    /// Balance snapshot after this entry was applied.
    pub balance_after: BigDecimal,
    /// Human-readable description.
    pub description: String,
    /// Entry status.
    pub status: WalletTxStatus,
    /// The payment that triggered this entry, if any.
    pub payment_id: Option<Uuid>,
    /// For reversing debits: the credit entry being reversed.
    pub reversal_of: Option<Uuid>,
    /// When this entry was created (immutable).
    pub created_at: DateTime<Utc>,
}

/// Data required to append a new ledger entry.
#[derive(Debug, Clone)]
pub struct NewWalletTransaction {
    pub tx_type: WalletTxType,
    pub amount: BigDecimal,
    pub description: String,
    pub payment_id: Option<Uuid>,
    pub reversal_of: Option<Uuid>,
}

impl NewWalletTransaction {
    /// A credit entry (balance increases).
    pub fn credit(amount: BigDecimal, description: String, payment_id: Option<Uuid>) -> Self {
        Self {
            tx_type: WalletTxType::Credit,
            amount,
            description,
            payment_id,
            reversal_of: None,
        }
    }

    /// A debit entry (balance decreases).
    pub fn debit(amount: BigDecimal, description: String) -> Self {
        Self {
            tx_type: WalletTxType::Debit,
            amount,
            description,
            payment_id: None,
            reversal_of: None,
        }
    }

    /// The documented zero-amount marker recording a free usage against the
    /// wallet's history without moving balance.
    pub fn free_usage(description: String) -> Self {
        Self {
            tx_type: WalletTxType::Debit,
            amount: BigDecimal::from(0),
            description,
            payment_id: None,
            reversal_of: None,
        }
    }

    /// A debit that reverses a previously applied credit (post-perform
    /// gateway cancellation).
    pub fn reversal(amount: BigDecimal, description: String, reverses: Uuid) -> Self {
        Self {
            tx_type: WalletTxType::Debit,
            amount,
            description,
            payment_id: None,
            reversal_of: Some(reverses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_tx_type_serialization() {
        assert_eq!(
            serde_json::to_string(&WalletTxType::Credit).unwrap(),
            "\"credit\""
        );
        assert_eq!(
            serde_json::to_string(&WalletTxType::Debit).unwrap(),
            "\"debit\""
        );
    }

    #[test]
    fn test_free_usage_marker_is_zero_debit() {
        let entry = NewWalletTransaction::free_usage("free doctor view".to_string());
        assert_eq!(entry.tx_type, WalletTxType::Debit);
        assert_eq!(entry.amount, BigDecimal::from(0));
        assert!(entry.payment_id.is_none());
    }

    #[test]
    fn test_reversal_links_original_entry() {
        let original = Uuid::new_v4();
        let entry = NewWalletTransaction::reversal(
            BigDecimal::from_str("50000.00").unwrap(),
            "payme cancellation".to_string(),
            original,
        );
        assert_eq!(entry.tx_type, WalletTxType::Debit);
        assert_eq!(entry.reversal_of, Some(original));
    }
}
