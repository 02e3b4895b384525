//! Click two-phase callback protocol (`prepare` / `complete`).
//!
//! Click delivers both callbacks at least once, signed with the MD5 scheme
//! implemented in `medpay-sign`. Responses always use Click's own numeric
//! error vocabulary; application errors never leak to the provider. The
//! exactly-once ledger guarantee is the `pending -> processing` CAS on the
//! payment row plus the per-payment double-credit guard in the ledger.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use medpay_sign::click::{ClickSignPayload, ACTION_COMPLETE, ACTION_PREPARE};

use crate::error::AppError;
use crate::models::{ClickTransaction, GatewayKind, PaymentGateway, PaymentStatus};
use crate::services::{gateway, ledger, webhook_log};

pub const CLICK_OK: i32 = 0;
pub const CLICK_ERR_SIGNATURE: i32 = -1;
pub const CLICK_ERR_AMOUNT: i32 = -2;
pub const CLICK_ERR_ALREADY_PAID: i32 = -4;
pub const CLICK_ERR_NOT_FOUND: i32 = -5;
pub const CLICK_ERR_UNKNOWN_PREPARE: i32 = -6;
pub const CLICK_ERR_INTERNAL: i32 = -7;
pub const CLICK_ERR_BAD_REQUEST: i32 = -8;
pub const CLICK_ERR_CANCELLED: i32 = -9;

/// Fields Click sends on both callbacks (form-encoded).
#[derive(Debug, Clone, Deserialize)]
pub struct ClickCallback {
    pub click_trans_id: i64,
    pub service_id: i64,
    #[serde(default)]
    pub click_paydoc_id: Option<i64>,
    pub merchant_trans_id: String,
    #[serde(default)]
    pub merchant_prepare_id: Option<i64>,
    pub amount: String,
    pub action: i32,
    #[serde(default)]
    pub error: Option<i32>,
    #[serde(default)]
    pub error_note: Option<String>,
    pub sign_time: String,
    pub sign_string: String,
}

/// Response envelope in Click's expected shape.
#[derive(Debug, Clone, Serialize)]
pub struct ClickResponse {
    pub error: i32,
    pub error_note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_trans_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_trans_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_prepare_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_confirm_id: Option<i64>,
}

impl ClickResponse {
    fn failure(code: i32, note: &str) -> Self {
        Self {
            error: code,
            error_note: note.to_string(),
            click_trans_id: None,
            merchant_trans_id: None,
            merchant_prepare_id: None,
            merchant_confirm_id: None,
        }
    }

    fn prepared(cb: &ClickCallback, merchant_prepare_id: i64) -> Self {
        Self {
            error: CLICK_OK,
            error_note: "Success".to_string(),
            click_trans_id: Some(cb.click_trans_id),
            merchant_trans_id: Some(cb.merchant_trans_id.clone()),
            merchant_prepare_id: Some(merchant_prepare_id),
            merchant_confirm_id: None,
        }
    }

    fn confirmed(cb: &ClickCallback, merchant_confirm_id: i64) -> Self {
        Self {
            error: CLICK_OK,
            error_note: "Success".to_string(),
            click_trans_id: Some(cb.click_trans_id),
            merchant_trans_id: Some(cb.merchant_trans_id.clone()),
            merchant_prepare_id: None,
            merchant_confirm_id: Some(merchant_confirm_id),
        }
    }
}

/// Creates the Click callback router.
pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/prepare", post(handle_prepare))
        .route("/complete", post(handle_complete))
        .with_state(pool)
}

async fn handle_prepare(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    body: String,
) -> Json<ClickResponse> {
    handle_callback(pool, headers, body, ACTION_PREPARE).await
}

async fn handle_complete(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    body: String,
) -> Json<ClickResponse> {
    handle_callback(pool, headers, body, ACTION_COMPLETE).await
}

/// Shared callback shell: audit-log the raw request, verify the signature,
/// run the state machine, audit-log the response.
async fn handle_callback(
    pool: PgPool,
    headers: HeaderMap,
    body: String,
    action: i32,
) -> Json<ClickResponse> {
    let webhook_id =
        match webhook_log::record_inbound(&pool, GatewayKind::Click, &headers, &body).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("failed to record Click webhook: {}", e);
                return Json(ClickResponse::failure(CLICK_ERR_INTERNAL, "Internal error"));
            }
        };

    let cb: ClickCallback = match serde_urlencoded::from_str(&body) {
        Ok(cb) => cb,
        Err(e) => {
            let response = ClickResponse::failure(CLICK_ERR_BAD_REQUEST, "Error in request");
            tracing::warn!("malformed Click callback: {}", e);
            finish_log(&pool, webhook_id, None, None, &response).await;
            return Json(response);
        }
    };

    let (response, payment_id, signature_valid) = process_callback(&pool, &cb, action).await;
    finish_log(&pool, webhook_id, payment_id, signature_valid, &response).await;
    Json(response)
}

async fn finish_log(
    pool: &PgPool,
    webhook_id: Uuid,
    payment_id: Option<Uuid>,
    signature_valid: Option<bool>,
    response: &ClickResponse,
) {
    let result = serde_json::to_value(response).unwrap_or_default();
    if let Err(e) = webhook_log::finish(pool, webhook_id, payment_id, signature_valid, &result).await
    {
        tracing::error!("failed to finish Click webhook log: {}", e);
    }
}

async fn process_callback(
    pool: &PgPool,
    cb: &ClickCallback,
    action: i32,
) -> (ClickResponse, Option<Uuid>, Option<bool>) {
    let gw = match gateway::load_active_gateway(pool, GatewayKind::Click).await {
        Ok(gw) => gw,
        Err(e) => {
            tracing::error!("Click gateway unavailable: {}", e);
            return (
                ClickResponse::failure(CLICK_ERR_INTERNAL, "Internal error"),
                None,
                None,
            );
        }
    };

    if cb.action != action {
        return (
            ClickResponse::failure(CLICK_ERR_BAD_REQUEST, "Action mismatch"),
            None,
            Some(false),
        );
    }

    if !verify_signature(&gw, cb, action) {
        return (
            ClickResponse::failure(CLICK_ERR_SIGNATURE, "Signature check failed"),
            None,
            Some(false),
        );
    }

    let outcome = if action == ACTION_PREPARE {
        process_prepare(pool, cb).await
    } else {
        process_complete(pool, cb).await
    };

    match outcome {
        Ok((response, payment_id)) => (response, payment_id, Some(true)),
        Err(e) => {
            tracing::error!(click_trans_id = cb.click_trans_id, "Click processing failed: {}", e);
            (
                ClickResponse::failure(CLICK_ERR_INTERNAL, "Internal error"),
                None,
                Some(true),
            )
        }
    }
}

fn verify_signature(gw: &PaymentGateway, cb: &ClickCallback, action: i32) -> bool {
    // Click omits merchant_prepare_id from the prepare digest and includes
    // it in the complete digest.
    let merchant_prepare_id = if action == ACTION_COMPLETE {
        match cb.merchant_prepare_id {
            Some(id) => Some(id),
            None => return false,
        }
    } else {
        None
    };
    let payload = ClickSignPayload {
        click_trans_id: cb.click_trans_id,
        service_id: cb.service_id,
        secret_key: &gw.secret_key,
        merchant_trans_id: &cb.merchant_trans_id,
        merchant_prepare_id,
        amount: &cb.amount,
        action,
        sign_time: &cb.sign_time,
    };
    medpay_sign::verify_click_signature(&payload, &cb.sign_string)
}

async fn find_click_transaction(
    pool: &PgPool,
    click_trans_id: i64,
) -> Result<Option<ClickTransaction>, AppError> {
    let ct: Option<ClickTransaction> = sqlx::query_as(
        r#"
        SELECT id, payment_id, click_trans_id, merchant_prepare_id, sign_time,
               error_code, created_at, updated_at
        FROM click_transactions
        WHERE click_trans_id = $1
        "#,
    )
    .bind(click_trans_id)
    .fetch_optional(pool)
    .await?;
    Ok(ct)
}

async fn process_prepare(
    pool: &PgPool,
    cb: &ClickCallback,
) -> Result<(ClickResponse, Option<Uuid>), AppError> {
    // Replay: a known click_trans_id gets its previously recorded result.
    if let Some(ct) = find_click_transaction(pool, cb.click_trans_id).await? {
        let response = match ct.error_code {
            None => ClickResponse::prepared(cb, ct.merchant_prepare_id),
            Some(_) => ClickResponse::failure(CLICK_ERR_CANCELLED, "Transaction cancelled"),
        };
        return Ok((response, Some(ct.payment_id)));
    }

    let Ok(payment_id) = Uuid::parse_str(&cb.merchant_trans_id) else {
        return Ok((
            ClickResponse::failure(CLICK_ERR_NOT_FOUND, "Payment not found"),
            None,
        ));
    };
    let Some(payment) = gateway::find_payment(pool, payment_id).await? else {
        return Ok((
            ClickResponse::failure(CLICK_ERR_NOT_FOUND, "Payment not found"),
            None,
        ));
    };

    // A payment opened for another gateway is not visible to Click.
    if payment.gateway != GatewayKind::Click {
        return Ok((
            ClickResponse::failure(CLICK_ERR_NOT_FOUND, "Payment not found"),
            Some(payment.id),
        ));
    }

    if gateway::expire_if_stale(pool, &payment).await? {
        return Ok((
            ClickResponse::failure(CLICK_ERR_NOT_FOUND, "Payment expired"),
            Some(payment.id),
        ));
    }
    if payment.status != PaymentStatus::Pending {
        return Ok((
            ClickResponse::failure(CLICK_ERR_NOT_FOUND, "Payment is not awaiting payment"),
            Some(payment.id),
        ));
    }

    let Ok(claimed) = BigDecimal::from_str(cb.amount.trim()) else {
        return Ok((
            ClickResponse::failure(CLICK_ERR_AMOUNT, "Invalid amount"),
            Some(payment.id),
        ));
    };
    if claimed != payment.total_amount {
        return Ok((
            ClickResponse::failure(CLICK_ERR_AMOUNT, "Incorrect amount"),
            Some(payment.id),
        ));
    }

    let ct: Option<ClickTransaction> = sqlx::query_as(
        r#"
        INSERT INTO click_transactions (payment_id, click_trans_id, sign_time)
        VALUES ($1, $2, $3)
        ON CONFLICT (payment_id) DO NOTHING
        RETURNING id, payment_id, click_trans_id, merchant_prepare_id, sign_time,
                  error_code, created_at, updated_at
        "#,
    )
    .bind(payment.id)
    .bind(cb.click_trans_id)
    .bind(&cb.sign_time)
    .fetch_optional(pool)
    .await?;

    let Some(ct) = ct else {
        // A different Click transaction already prepared this payment.
        return Ok((
            ClickResponse::failure(CLICK_ERR_ALREADY_PAID, "Payment already prepared"),
            Some(payment.id),
        ));
    };

    gateway::increment_attempts(pool, payment.id).await?;
    Ok((
        ClickResponse::prepared(cb, ct.merchant_prepare_id),
        Some(payment.id),
    ))
}

async fn process_complete(
    pool: &PgPool,
    cb: &ClickCallback,
) -> Result<(ClickResponse, Option<Uuid>), AppError> {
    let Some(ct) = find_click_transaction(pool, cb.click_trans_id).await? else {
        return Ok((
            ClickResponse::failure(CLICK_ERR_UNKNOWN_PREPARE, "Transaction not found"),
            None,
        ));
    };
    if cb.merchant_prepare_id != Some(ct.merchant_prepare_id) {
        return Ok((
            ClickResponse::failure(CLICK_ERR_UNKNOWN_PREPARE, "Unknown prepare id"),
            Some(ct.payment_id),
        ));
    }

    let Some(payment) = gateway::find_payment(pool, ct.payment_id).await? else {
        return Ok((
            ClickResponse::failure(CLICK_ERR_NOT_FOUND, "Payment not found"),
            Some(ct.payment_id),
        ));
    };

    // Provider-side failure: mark the payment failed, keep the error code.
    if cb.error.unwrap_or(0) != 0 {
        let response = fail_payment(pool, &ct, payment.status, cb).await?;
        return Ok((response, Some(payment.id)));
    }

    match payment.status {
        // Replay of a finished complete: answer with the recorded result,
        // ledger untouched.
        PaymentStatus::Completed => {
            gateway::increment_attempts(pool, payment.id).await?;
            return Ok((
                ClickResponse::confirmed(cb, ct.merchant_prepare_id),
                Some(payment.id),
            ));
        }
        PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Expired => {
            return Ok((
                ClickResponse::failure(CLICK_ERR_CANCELLED, "Transaction cancelled"),
                Some(payment.id),
            ));
        }
        PaymentStatus::Pending | PaymentStatus::Processing => {}
        _ => {
            return Ok((
                ClickResponse::failure(CLICK_ERR_NOT_FOUND, "Payment is not payable"),
                Some(payment.id),
            ));
        }
    }

    if gateway::expire_if_stale(pool, &payment).await? {
        return Ok((
            ClickResponse::failure(CLICK_ERR_CANCELLED, "Payment expired"),
            Some(payment.id),
        ));
    }

    // Single unit of work: win the CAS, credit the wallet, complete the
    // payment. Only the first delivery to observe `pending` gets here past
    // the CAS.
    let mut tx = pool.begin().await?;
    let won = gateway::transition_status(
        &mut *tx,
        payment.id,
        PaymentStatus::Pending,
        PaymentStatus::Processing,
    )
    .await?;
    if !won {
        drop(tx);
        // A concurrent delivery owns the transition; report its outcome.
        let current = gateway::find_payment(pool, payment.id).await?;
        let response = match current.map(|p| p.status) {
            Some(PaymentStatus::Completed) => {
                ClickResponse::confirmed(cb, ct.merchant_prepare_id)
            }
            Some(PaymentStatus::Processing) => {
                ClickResponse::failure(CLICK_ERR_INTERNAL, "Processing in progress")
            }
            _ => ClickResponse::failure(CLICK_ERR_CANCELLED, "Transaction cancelled"),
        };
        return Ok((response, Some(payment.id)));
    }

    ledger::credit_tx(
        &mut tx,
        payment.user_id,
        payment.amount.clone(),
        "Wallet top-up via Click",
        Some(payment.id),
    )
    .await?;
    gateway::mark_completed(
        &mut tx,
        payment.id,
        &cb.click_trans_id.to_string(),
        Utc::now(),
    )
    .await?;
    gateway::increment_attempts(&mut *tx, payment.id).await?;
    tx.commit().await?;

    tracing::info!(
        payment_id = %payment.id,
        click_trans_id = cb.click_trans_id,
        amount = %payment.amount,
        "Click payment completed, wallet credited"
    );
    Ok((
        ClickResponse::confirmed(cb, ct.merchant_prepare_id),
        Some(payment.id),
    ))
}

async fn fail_payment(
    pool: &PgPool,
    ct: &ClickTransaction,
    status: PaymentStatus,
    cb: &ClickCallback,
) -> Result<ClickResponse, AppError> {
    // A provider error after the payment settled does not unwind it; the
    // truthful answer is "already paid".
    if status == PaymentStatus::Completed {
        return Ok(ClickResponse::failure(
            CLICK_ERR_ALREADY_PAID,
            "Payment already completed",
        ));
    }
    if matches!(status, PaymentStatus::Pending | PaymentStatus::Processing) {
        let mut tx = pool.begin().await?;
        gateway::transition_status(&mut *tx, ct.payment_id, status, PaymentStatus::Failed).await?;
        sqlx::query(
            "UPDATE click_transactions SET error_code = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(ct.id)
        .bind(cb.error)
        .execute(&mut *tx)
        .await?;
        gateway::increment_attempts(&mut *tx, ct.payment_id).await?;
        tx.commit().await?;
        tracing::info!(
            payment_id = %ct.payment_id,
            error = ?cb.error,
            "Click payment failed at provider"
        );
    }
    Ok(ClickResponse::failure(
        CLICK_ERR_CANCELLED,
        "Transaction cancelled",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback() -> ClickCallback {
        ClickCallback {
            click_trans_id: 1234567,
            service_id: 12345,
            click_paydoc_id: None,
            merchant_trans_id: "pay-42".to_string(),
            merchant_prepare_id: None,
            amount: "50500.00".to_string(),
            action: ACTION_PREPARE,
            error: None,
            error_note: None,
            sign_time: "2026-08-31 12:00:00".to_string(),
            sign_string: "ec477c6c90db62132490f5da3627cbcd".to_string(),
        }
    }

    #[test]
    fn test_parse_form_encoded_callback() {
        let body = "click_trans_id=1234567&service_id=12345&merchant_trans_id=pay-42\
                    &amount=50500.00&action=0&sign_time=2026-08-31%2012%3A00%3A00\
                    &sign_string=abc&error=0";
        let cb: ClickCallback = serde_urlencoded::from_str(body).unwrap();
        assert_eq!(cb.click_trans_id, 1234567);
        assert_eq!(cb.amount, "50500.00");
        assert_eq!(cb.sign_time, "2026-08-31 12:00:00");
        assert_eq!(cb.error, Some(0));
        assert!(cb.merchant_prepare_id.is_none());
    }

    #[test]
    fn test_response_skips_absent_ids() {
        let response = ClickResponse::failure(CLICK_ERR_SIGNATURE, "Signature check failed");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], -1);
        assert!(json.get("merchant_prepare_id").is_none());
        assert!(json.get("merchant_confirm_id").is_none());
    }

    #[test]
    fn test_prepared_response_shape() {
        let cb = callback();
        let response = ClickResponse::prepared(&cb, 77);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"], 0);
        assert_eq!(json["merchant_prepare_id"], 77);
        assert_eq!(json["click_trans_id"], 1234567);
        assert_eq!(json["merchant_trans_id"], "pay-42");
    }

    #[test]
    fn test_signature_verification_against_gateway_secret() {
        let now = chrono::Utc::now();
        let gw = PaymentGateway {
            id: Uuid::new_v4(),
            kind: GatewayKind::Click,
            merchant_id: "m-1".to_string(),
            service_id: "12345".to_string(),
            secret_key: "SECRET_KEY".to_string(),
            min_amount: BigDecimal::from(0),
            max_amount: BigDecimal::from(1),
            commission_type: crate::models::CommissionType::Percentage,
            commission_pct: BigDecimal::from(0),
            commission_fixed: BigDecimal::from(0),
            currency: "UZS".to_string(),
            is_active: true,
            test_mode: false,
            created_at: now,
            updated_at: now,
        };
        let cb = callback();
        assert!(verify_signature(&gw, &cb, ACTION_PREPARE));

        let mut tampered = cb.clone();
        tampered.amount = "1.00".to_string();
        assert!(!verify_signature(&gw, &tampered, ACTION_PREPARE));

        // complete without a prepare id cannot verify
        assert!(!verify_signature(&gw, &cb, ACTION_COMPLETE));
    }
}
