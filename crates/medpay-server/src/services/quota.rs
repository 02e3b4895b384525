//! Quota tracker: free-of-charge usage counters for metered doctor views.
//!
//! The free-access checks run in a fixed order (re-view, daily quota,
//! new-user bonus, paid fallback). The re-view check comes first so that
//! navigating back to the same profile never charges twice and never erodes
//! the daily quota.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{BillingSettings, NewDoctorViewCharge, ServiceType, UserProfile};
use crate::services::{billing, ledger};

/// Why an access attempt was (or was not) free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    /// Same (user, doctor, day) was already recorded; re-views are free.
    AlreadyViewedToday,
    /// Daily free-view quota not yet exhausted.
    DailyQuota,
    /// User is inside the new-user window with bonus views left.
    NewUserBonus,
    /// Billing is globally disabled; nothing is metered.
    BillingDisabled,
    /// All free paths exhausted; the caller must charge the wallet.
    RequiresPayment,
}

/// Outcome of a metered doctor-view access.
#[derive(Debug, Clone, Serialize)]
pub struct ViewOutcome {
    pub charged: bool,
    pub amount: BigDecimal,
    pub new_balance: BigDecimal,
    pub reason: AccessReason,
}

/// Runs the ordered free-access checks without consuming anything.
/// `checkServiceAccess` uses this read-only; `charge_for_view` re-runs it
/// under the wallet row lock before consuming quota or balance.
pub async fn can_access_free(
    conn: &mut PgConnection,
    user_id: Uuid,
    doctor_id: Uuid,
    settings: &BillingSettings,
) -> Result<(bool, AccessReason), AppError> {
    let today = Utc::now().date_naive();

    // Step 1: an existing same-day row means this is a re-view. Checked
    // before quota so repeated views never consume it.
    let already_viewed: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM doctor_view_charges
        WHERE user_id = $1 AND doctor_id = $2 AND view_date = $3
        "#,
    )
    .bind(user_id)
    .bind(doctor_id)
    .bind(today)
    .fetch_optional(&mut *conn)
    .await?;
    if already_viewed.is_some() {
        return Ok((true, AccessReason::AlreadyViewedToday));
    }

    // Step 2: daily quota over today's free (zero-amount) views.
    let free_today: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM doctor_view_charges
        WHERE user_id = $1 AND view_date = $2 AND amount = 0
        "#,
    )
    .bind(user_id)
    .bind(today)
    .fetch_one(&mut *conn)
    .await?;
    if free_today < settings.free_views_per_day as i64 {
        return Ok((true, AccessReason::DailyQuota));
    }

    // Step 3: new-user bonus against the lifetime charge count.
    let profile: Option<UserProfile> = sqlx::query_as(
        "SELECT id, account_type, is_blocked, created_at FROM user_profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(profile) = profile {
        if profile.account_age_days(Utc::now()) <= settings.new_user_window_days as i64 {
            let lifetime: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM doctor_view_charges WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
            if lifetime < settings.free_views_for_new_users as i64 {
                return Ok((true, AccessReason::NewUserBonus));
            }
        }
    }

    Ok((false, AccessReason::RequiresPayment))
}

/// Records one doctor-profile view, free if quota allows, otherwise debiting
/// the wallet at the doctor-view rule price. The whole read-then-write runs
/// under the wallet row lock so concurrent requests for the same user
/// serialize, and the `(user, doctor, day)` unique constraint settles any
/// cross-instance race in favor of a single charge.
pub async fn charge_for_view(
    pool: &PgPool,
    user_id: Uuid,
    doctor_id: Uuid,
    meta: NewDoctorViewCharge,
) -> Result<ViewOutcome, AppError> {
    let settings = billing::load_settings(pool).await?;
    if settings.maintenance_mode {
        return Err(AppError::GatewayUnavailable(
            "billing is in maintenance mode".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let wallet = ledger::lock_wallet(&mut tx, user_id).await?;

    if !settings.billing_enabled {
        tx.commit().await?;
        return Ok(ViewOutcome {
            charged: false,
            amount: BigDecimal::from(0),
            new_balance: wallet.balance,
            reason: AccessReason::BillingDisabled,
        });
    }

    let (free, reason) = can_access_free(&mut tx, user_id, doctor_id, &settings).await?;

    if free {
        if reason == AccessReason::AlreadyViewedToday {
            tx.commit().await?;
            return Ok(ViewOutcome {
                charged: false,
                amount: BigDecimal::from(0),
                new_balance: wallet.balance,
                reason,
            });
        }

        let charge_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO doctor_view_charges (user_id, doctor_id, amount, ip_address, user_agent)
            VALUES ($1, $2, 0, $3, $4)
            ON CONFLICT (user_id, doctor_id, view_date) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(doctor_id)
        .bind(&meta.ip_address)
        .bind(&meta.user_agent)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome_reason = match charge_id {
            Some(charge_id) => {
                let marker =
                    ledger::free_usage_marker_tx(&mut tx, user_id, "free doctor profile view")
                        .await?;
                sqlx::query(
                    "UPDATE doctor_view_charges SET wallet_transaction_id = $2 WHERE id = $1",
                )
                .bind(charge_id)
                .bind(marker.id)
                .execute(&mut *tx)
                .await?;
                reason
            }
            // Lost a cross-instance race; the row that won makes this a
            // re-view.
            None => AccessReason::AlreadyViewedToday,
        };

        tx.commit().await?;
        return Ok(ViewOutcome {
            charged: false,
            amount: BigDecimal::from(0),
            new_balance: wallet.balance,
            reason: outcome_reason,
        });
    }

    // Paid fallback.
    let rule = billing::active_rule(&mut *tx, ServiceType::DoctorView).await?;
    let price = rule.effective_unit_price(1);
    let entry = ledger::debit_tx(&mut tx, user_id, price.clone(), "doctor profile view").await?;

    sqlx::query(
        r#"
        INSERT INTO doctor_view_charges
            (user_id, doctor_id, amount, wallet_transaction_id, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(user_id)
    .bind(doctor_id)
    .bind(&price)
    .bind(entry.id)
    .bind(&meta.ip_address)
    .bind(&meta.user_agent)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(ViewOutcome {
        charged: true,
        amount: price,
        new_balance: entry.balance_after,
        reason: AccessReason::RequiresPayment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_serialization() {
        assert_eq!(
            serde_json::to_string(&AccessReason::AlreadyViewedToday).unwrap(),
            "\"already_viewed_today\""
        );
        assert_eq!(
            serde_json::to_string(&AccessReason::RequiresPayment).unwrap(),
            "\"requires_payment\""
        );
    }
}
