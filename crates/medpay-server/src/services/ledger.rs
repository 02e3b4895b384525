//! Ledger store: atomic wallet credit/debit with append-only history.
//!
//! Every balance mutation happens inside a single database transaction that
//! locks the wallet row (`SELECT ... FOR UPDATE`), re-reads the balance,
//! checks invariants, writes the new balance, and appends the
//! `WalletTransaction` row with before/after snapshots. The row lock is the
//! per-wallet serialization point; it holds across server instances, which
//! an in-process mutex would not.
//!
//! The `*_tx` variants run against a caller-provided transaction so protocol
//! handlers can pair the credit with their payment-status transition in one
//! unit of work.

use bigdecimal::BigDecimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    NewWalletTransaction, UserAccountType, UserProfile, Wallet, WalletTransaction, WalletTxType,
};
use crate::services::billing;

/// Fetches the user's wallet, creating an empty one on first access.
/// Explicit get-or-create: the result is the same whether the wallet existed
/// or not.
pub async fn get_or_create_wallet(pool: &PgPool, user_id: Uuid) -> Result<Wallet, AppError> {
    let mut tx = pool.begin().await?;
    let wallet = lock_wallet(&mut tx, user_id).await?;
    tx.commit().await?;
    Ok(wallet)
}

/// Ensures the wallet row exists and takes the row lock on it for the
/// remainder of the transaction.
pub async fn lock_wallet(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Wallet, AppError> {
    sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    let wallet: Wallet = sqlx::query_as(
        r#"
        SELECT id, user_id, balance, total_spent, total_topped_up, is_blocked, created_at, updated_at
        FROM wallets
        WHERE user_id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(wallet)
}

/// Credits the wallet. If `payment_id` is set and a completed credit for
/// that payment already exists, the call is a no-op returning the existing
/// entry. A detected double-credit is logged, never re-applied.
pub async fn credit(
    pool: &PgPool,
    user_id: Uuid,
    amount: BigDecimal,
    description: &str,
    payment_id: Option<Uuid>,
) -> Result<WalletTransaction, AppError> {
    let mut tx = pool.begin().await?;
    let entry = credit_tx(&mut tx, user_id, amount, description, payment_id).await?;
    tx.commit().await?;
    Ok(entry)
}

/// Transaction-scoped credit. See [`credit`].
pub async fn credit_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    amount: BigDecimal,
    description: &str,
    payment_id: Option<Uuid>,
) -> Result<WalletTransaction, AppError> {
    if amount <= BigDecimal::from(0) {
        return Err(AppError::Validation(
            "Credit amount must be positive".to_string(),
        ));
    }

    if let Some(payment_id) = payment_id {
        if let Some(existing) = find_completed_credit(tx, payment_id).await? {
            tracing::warn!(
                payment_id = %payment_id,
                transaction_id = %existing.id,
                "double credit attempt detected, returning existing ledger entry"
            );
            return Ok(existing);
        }
    }

    let wallet = lock_wallet(tx, user_id).await?;
    let balance_before = wallet.balance.clone();
    let balance_after = &balance_before + &amount;

    sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $2, total_topped_up = total_topped_up + $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(wallet.id)
    .bind(&balance_after)
    .bind(&amount)
    .execute(&mut **tx)
    .await?;

    let new_entry = NewWalletTransaction::credit(amount, description.to_string(), payment_id);
    let entry = insert_entry(tx, wallet.id, &new_entry, &balance_before, &balance_after).await?;

    unblock_doctor_if_solvent(tx, user_id, &balance_after).await?;

    Ok(entry)
}

/// Debits the wallet. Fails with `WalletBlocked` on a blocked wallet and
/// `InsufficientBalance` when the balance cannot cover the amount; neither
/// failure writes anything.
pub async fn debit(
    pool: &PgPool,
    user_id: Uuid,
    amount: BigDecimal,
    description: &str,
) -> Result<WalletTransaction, AppError> {
    let mut tx = pool.begin().await?;
    let entry = debit_tx(&mut tx, user_id, amount, description).await?;
    tx.commit().await?;
    Ok(entry)
}

/// Transaction-scoped debit. See [`debit`].
pub async fn debit_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    amount: BigDecimal,
    description: &str,
) -> Result<WalletTransaction, AppError> {
    if amount <= BigDecimal::from(0) {
        return Err(AppError::Validation(
            "Debit amount must be positive".to_string(),
        ));
    }

    let wallet = lock_wallet(tx, user_id).await?;

    if wallet.is_blocked {
        return Err(AppError::WalletBlocked(format!(
            "wallet {} does not accept debits",
            wallet.id
        )));
    }
    if !wallet.has_sufficient_balance(&amount) {
        return Err(AppError::InsufficientBalance {
            available: wallet.balance.to_string(),
            required: amount.to_string(),
        });
    }

    let balance_before = wallet.balance.clone();
    let balance_after = &balance_before - &amount;

    sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $2, total_spent = total_spent + $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(wallet.id)
    .bind(&balance_after)
    .bind(&amount)
    .execute(&mut **tx)
    .await?;

    let new_entry = NewWalletTransaction::debit(amount, description.to_string());
    insert_entry(tx, wallet.id, &new_entry, &balance_before, &balance_after).await
}

/// Appends the zero-amount free-usage marker entry. Balance is untouched;
/// before and after snapshots are equal.
pub async fn free_usage_marker_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    description: &str,
) -> Result<WalletTransaction, AppError> {
    let wallet = lock_wallet(tx, user_id).await?;
    let balance = wallet.balance.clone();
    let new_entry = NewWalletTransaction::free_usage(description.to_string());
    insert_entry(tx, wallet.id, &new_entry, &balance, &balance).await
}

/// Reverses a completed credit for `payment_id` with a linked debit (Payme
/// post-perform cancellation). Idempotent: an already-reversed credit
/// returns the existing reversal. Fails with `InsufficientBalance` when the
/// wallet no longer covers the original amount.
pub async fn reverse_credit_tx(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
    description: &str,
) -> Result<WalletTransaction, AppError> {
    let original = find_completed_credit(tx, payment_id).await?.ok_or_else(|| {
        AppError::NotFound(format!("no completed credit for payment {}", payment_id))
    })?;

    let existing: Option<WalletTransaction> = sqlx::query_as(
        r#"
        SELECT id, wallet_id, tx_type, amount, balance_before, balance_after,
               description, status, payment_id, reversal_of, created_at
        FROM wallet_transactions
        WHERE reversal_of = $1
        "#,
    )
    .bind(original.id)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(existing) = existing {
        tracing::warn!(
            payment_id = %payment_id,
            "credit already reversed, returning existing reversal entry"
        );
        return Ok(existing);
    }

    let wallet: Wallet = sqlx::query_as(
        r#"
        SELECT id, user_id, balance, total_spent, total_topped_up, is_blocked, created_at, updated_at
        FROM wallets
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(original.wallet_id)
    .fetch_one(&mut **tx)
    .await?;

    if !wallet.has_sufficient_balance(&original.amount) {
        return Err(AppError::InsufficientBalance {
            available: wallet.balance.to_string(),
            required: original.amount.to_string(),
        });
    }

    let balance_before = wallet.balance.clone();
    let balance_after = &balance_before - &original.amount;

    sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $2, total_topped_up = total_topped_up - $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(wallet.id)
    .bind(&balance_after)
    .bind(&original.amount)
    .execute(&mut **tx)
    .await?;

    let new_entry = NewWalletTransaction::reversal(
        original.amount.clone(),
        description.to_string(),
        original.id,
    );
    insert_entry(tx, wallet.id, &new_entry, &balance_before, &balance_after).await
}

/// Most recent ledger entries for a user's wallet, newest first.
pub async fn recent_transactions(
    pool: &PgPool,
    wallet_id: Uuid,
    limit: i64,
) -> Result<Vec<WalletTransaction>, AppError> {
    let entries: Vec<WalletTransaction> = sqlx::query_as(
        r#"
        SELECT id, wallet_id, tx_type, amount, balance_before, balance_after,
               description, status, payment_id, reversal_of, created_at
        FROM wallet_transactions
        WHERE wallet_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(wallet_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

async fn find_completed_credit(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> Result<Option<WalletTransaction>, AppError> {
    let entry: Option<WalletTransaction> = sqlx::query_as(
        r#"
        SELECT id, wallet_id, tx_type, amount, balance_before, balance_after,
               description, status, payment_id, reversal_of, created_at
        FROM wallet_transactions
        WHERE payment_id = $1 AND tx_type = 'credit' AND status = 'completed'
        "#,
    )
    .bind(payment_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(entry)
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    entry: &NewWalletTransaction,
    balance_before: &BigDecimal,
    balance_after: &BigDecimal,
) -> Result<WalletTransaction, AppError> {
    let row: WalletTransaction = sqlx::query_as(
        r#"
        INSERT INTO wallet_transactions
            (wallet_id, tx_type, amount, balance_before, balance_after, description,
             status, payment_id, reversal_of)
        VALUES ($1, $2, $3, $4, $5, $6, 'completed', $7, $8)
        RETURNING id, wallet_id, tx_type, amount, balance_before, balance_after,
                  description, status, payment_id, reversal_of, created_at
        "#,
    )
    .bind(wallet_id)
    .bind(entry.tx_type)
    .bind(&entry.amount)
    .bind(balance_before)
    .bind(balance_after)
    .bind(&entry.description)
    .bind(entry.payment_id)
    .bind(entry.reversal_of)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

/// Cross-aggregate invariant: a doctor's profile block is derived from
/// wallet solvency. A credit that lifts the balance to the configured
/// threshold clears the block in the same unit of work.
async fn unblock_doctor_if_solvent(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    new_balance: &BigDecimal,
) -> Result<(), AppError> {
    let profile: Option<UserProfile> = sqlx::query_as(
        "SELECT id, account_type, is_blocked, created_at FROM user_profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(profile) = profile else {
        return Ok(());
    };
    if profile.account_type != UserAccountType::Doctor || !profile.is_blocked {
        return Ok(());
    }

    let settings = billing::load_settings(&mut **tx).await?;
    if new_balance >= &settings.doctor_unblock_threshold {
        sqlx::query("UPDATE user_profiles SET is_blocked = FALSE WHERE id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        tracing::info!(user_id = %user_id, "doctor profile unblocked after wallet credit");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_chain_arithmetic() {
        // The snapshots written by credit/debit must chain: after a credit
        // of a and debit of b, balance = initial + a - b.
        let initial = BigDecimal::from(0);
        let after_credit = &initial + BigDecimal::from(50_000);
        let after_debit = &after_credit - BigDecimal::from(10_000);
        assert_eq!(after_debit, BigDecimal::from(40_000));
    }

    #[test]
    fn test_free_usage_entry_keeps_balance() {
        let entry = NewWalletTransaction::free_usage("free view".to_string());
        assert_eq!(entry.amount, BigDecimal::from(0));
        assert_eq!(entry.tx_type, WalletTxType::Debit);
    }
}
