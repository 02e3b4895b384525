//! Payme merchant API: a JSON-RPC 2.0 surface with five methods.
//!
//! Every call arrives as `POST /payme/webhook` with HTTP Basic auth. The
//! protocol keeps its own transaction state (1 created, 2 performed,
//! -1 cancelled before perform, -2 cancelled after perform) alongside the
//! payment lifecycle; the wallet is credited exactly once on the first
//! successful `PerformTransaction` and reversed at most once on a
//! post-perform `CancelTransaction`.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{GatewayKind, Payment, PaymentStatus, PaymeState, PaymeTransaction};
use crate::services::{gateway, ledger, webhook_log};

pub const ERR_INVALID_AMOUNT: i32 = -31001;
pub const ERR_TRANSACTION_NOT_FOUND: i32 = -31003;
pub const ERR_UNABLE_TO_CANCEL: i32 = -31007;
pub const ERR_UNABLE_TO_PERFORM: i32 = -31008;
pub const ERR_ACCOUNT_NOT_FOUND: i32 = -31050;
pub const ERR_INTERNAL: i32 = -32400;
pub const ERR_UNAUTHORIZED: i32 = -32504;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_PARSE: i32 = -32700;

/// Protocol-level failure carried back as a JSON-RPC error object.
#[derive(Debug, Clone)]
struct PaymeError {
    code: i32,
    message: String,
}

impl PaymeError {
    fn new(code: i32, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

impl From<AppError> for PaymeError {
    fn from(e: AppError) -> Self {
        tracing::error!("Payme request failed internally: {}", e);
        PaymeError::new(ERR_INTERNAL, "Internal error")
    }
}

impl From<sqlx::Error> for PaymeError {
    fn from(e: sqlx::Error) -> Self {
        AppError::from(e).into()
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Creates the Payme JSON-RPC router.
pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/webhook", post(handle_rpc))
        .with_state(pool)
}

async fn handle_rpc(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    body: String,
) -> Json<Value> {
    let webhook_id =
        match webhook_log::record_inbound(&pool, GatewayKind::Payme, &headers, &body).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("failed to record Payme webhook: {}", e);
                return Json(rpc_error(Value::Null, ERR_INTERNAL, "Internal error"));
            }
        };

    // The request id is echoed even on auth and parse failures when it can
    // be recovered from the body.
    let request: Option<RpcRequest> = serde_json::from_str(&body).ok();
    let rpc_id = request
        .as_ref()
        .map(|r| r.id.clone())
        .unwrap_or(Value::Null);

    let authorized = match check_authorization(&pool, &headers).await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::error!("Payme gateway unavailable: {}", e);
            let response = rpc_error(rpc_id, ERR_INTERNAL, "Internal error");
            finish_log(&pool, webhook_id, None, None, &response).await;
            return Json(response);
        }
    };
    if !authorized {
        let response = rpc_error(rpc_id, ERR_UNAUTHORIZED, "Insufficient privileges");
        finish_log(&pool, webhook_id, None, Some(false), &response).await;
        return Json(response);
    }

    let Some(request) = request else {
        let response = rpc_error(Value::Null, ERR_PARSE, "Parse error");
        finish_log(&pool, webhook_id, None, Some(true), &response).await;
        return Json(response);
    };

    let (outcome, payment_id) = dispatch(&pool, &request).await;
    let response = match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": request.id, "result": result }),
        Err(e) => rpc_error(request.id, e.code, &e.message),
    };
    finish_log(&pool, webhook_id, payment_id, Some(true), &response).await;
    Json(response)
}

async fn check_authorization(pool: &PgPool, headers: &HeaderMap) -> Result<bool, AppError> {
    let gw = gateway::load_active_gateway(pool, GatewayKind::Payme).await?;
    let Some(header) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(false);
    };
    Ok(medpay_sign::verify_authorization(header, &gw.secret_key))
}

async fn dispatch(
    pool: &PgPool,
    request: &RpcRequest,
) -> (Result<Value, PaymeError>, Option<Uuid>) {
    let mut payment_id = None;
    let result = match request.method.as_str() {
        "CheckPerformTransaction" => {
            check_perform_transaction(pool, &request.params, &mut payment_id).await
        }
        "CreateTransaction" => create_transaction(pool, &request.params, &mut payment_id).await,
        "PerformTransaction" => perform_transaction(pool, &request.params, &mut payment_id).await,
        "CancelTransaction" => cancel_transaction(pool, &request.params, &mut payment_id).await,
        "CheckTransaction" => check_transaction(pool, &request.params, &mut payment_id).await,
        other => {
            tracing::warn!(method = other, "unknown Payme method");
            Err(PaymeError::new(ERR_METHOD_NOT_FOUND, "Method not found"))
        }
    };
    (result, payment_id)
}

fn rpc_error(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

async fn finish_log(
    pool: &PgPool,
    webhook_id: Uuid,
    payment_id: Option<Uuid>,
    signature_valid: Option<bool>,
    response: &Value,
) {
    if let Err(e) =
        webhook_log::finish(pool, webhook_id, payment_id, signature_valid, response).await
    {
        tracing::error!("failed to finish Payme webhook log: {}", e);
    }
}

/// Resolves `params.account.payment_id` to a pending payment. Anything the
/// account field cannot name, including an expired or already-settled
/// payment, is an account error.
async fn resolve_pending_payment(
    pool: &PgPool,
    params: &Value,
    payment_id_out: &mut Option<Uuid>,
) -> Result<Payment, PaymeError> {
    let account_error = || PaymeError::new(ERR_ACCOUNT_NOT_FOUND, "Account not found");

    let raw = params["account"]["payment_id"]
        .as_str()
        .ok_or_else(account_error)?;
    let payment_id = Uuid::parse_str(raw).map_err(|_| account_error())?;
    let payment = gateway::find_payment(pool, payment_id)
        .await?
        .ok_or_else(account_error)?;
    *payment_id_out = Some(payment.id);

    if gateway::expire_if_stale(pool, &payment).await? {
        return Err(account_error());
    }
    if payment.status != PaymentStatus::Pending {
        return Err(account_error());
    }
    if payment.gateway != GatewayKind::Payme {
        return Err(account_error());
    }
    Ok(payment)
}

fn check_amount(params: &Value, payment: &Payment) -> Result<(), PaymeError> {
    let amount = params["amount"]
        .as_i64()
        .ok_or_else(|| PaymeError::new(ERR_INVALID_AMOUNT, "Invalid amount"))?;
    if BigDecimal::from(amount) != payment.total_amount_minor() {
        return Err(PaymeError::new(ERR_INVALID_AMOUNT, "Invalid amount"));
    }
    Ok(())
}

fn require_payme_id<'a>(params: &'a Value) -> Result<&'a str, PaymeError> {
    params["id"]
        .as_str()
        .ok_or_else(|| PaymeError::new(ERR_PARSE, "Missing transaction id"))
}

async fn find_payme_transaction(
    pool: &PgPool,
    payme_id: &str,
) -> Result<Option<PaymeTransaction>, AppError> {
    let t: Option<PaymeTransaction> = sqlx::query_as(
        r#"
        SELECT id, payment_id, payme_id, state, create_time, perform_time,
               cancel_time, cancel_reason, created_at, updated_at
        FROM payme_transactions
        WHERE payme_id = $1
        "#,
    )
    .bind(payme_id)
    .fetch_optional(pool)
    .await?;
    Ok(t)
}

fn created_result(t: &PaymeTransaction) -> Value {
    json!({
        "create_time": t.create_time,
        "transaction": t.id.to_string(),
        "state": PaymeState::Created.code(),
    })
}

async fn check_perform_transaction(
    pool: &PgPool,
    params: &Value,
    payment_id_out: &mut Option<Uuid>,
) -> Result<Value, PaymeError> {
    let payment = resolve_pending_payment(pool, params, payment_id_out).await?;
    check_amount(params, &payment)?;
    Ok(json!({ "allow": true }))
}

async fn create_transaction(
    pool: &PgPool,
    params: &Value,
    payment_id_out: &mut Option<Uuid>,
) -> Result<Value, PaymeError> {
    let payme_id = require_payme_id(params)?;

    // Replay of a known transaction id answers from the stored record.
    if let Some(t) = find_payme_transaction(pool, payme_id).await? {
        *payment_id_out = Some(t.payment_id);
        return match t.state {
            PaymeState::Created => Ok(created_result(&t)),
            _ => Err(PaymeError::new(
                ERR_UNABLE_TO_PERFORM,
                "Transaction is not in a creatable state",
            )),
        };
    }

    let payment = resolve_pending_payment(pool, params, payment_id_out).await?;
    check_amount(params, &payment)?;

    let mut tx = pool.begin().await?;
    let won = gateway::transition_status(
        &mut *tx,
        payment.id,
        PaymentStatus::Pending,
        PaymentStatus::Processing,
    )
    .await?;
    if !won {
        // Another transaction claimed this payment between the read and the
        // CAS.
        return Err(PaymeError::new(
            ERR_UNABLE_TO_PERFORM,
            "Payment is already taken by another transaction",
        ));
    }

    let create_time = Utc::now().timestamp_millis();
    let inserted: Option<PaymeTransaction> = sqlx::query_as(
        r#"
        INSERT INTO payme_transactions (payment_id, payme_id, state, create_time)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (payment_id) DO NOTHING
        RETURNING id, payment_id, payme_id, state, create_time, perform_time,
                  cancel_time, cancel_reason, created_at, updated_at
        "#,
    )
    .bind(payment.id)
    .bind(payme_id)
    .bind(PaymeState::Created)
    .bind(create_time)
    .fetch_optional(&mut *tx)
    .await
    .map_err(AppError::from)?;

    let Some(t) = inserted else {
        return Err(PaymeError::new(
            ERR_UNABLE_TO_PERFORM,
            "Payment is already taken by another transaction",
        ));
    };
    gateway::increment_attempts(&mut *tx, payment.id).await?;
    tx.commit().await.map_err(AppError::from)?;

    tracing::info!(
        payment_id = %payment.id,
        payme_id,
        "Payme transaction created"
    );
    Ok(created_result(&t))
}

async fn perform_transaction(
    pool: &PgPool,
    params: &Value,
    payment_id_out: &mut Option<Uuid>,
) -> Result<Value, PaymeError> {
    let payme_id = require_payme_id(params)?;
    let Some(t) = find_payme_transaction(pool, payme_id).await? else {
        return Err(PaymeError::new(
            ERR_TRANSACTION_NOT_FOUND,
            "Transaction not found",
        ));
    };
    *payment_id_out = Some(t.payment_id);

    match t.state {
        PaymeState::Created => {}
        // Replay: report the recorded perform, ledger untouched.
        PaymeState::Performed => {
            return Ok(json!({
                "transaction": t.id.to_string(),
                "perform_time": t.perform_time.unwrap_or(0),
                "state": PaymeState::Performed.code(),
            }));
        }
        _ => {
            return Err(PaymeError::new(
                ERR_UNABLE_TO_PERFORM,
                "Transaction is cancelled",
            ));
        }
    }

    let payment = gateway::find_payment(pool, t.payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment {} missing", t.payment_id)))?;

    // One unit of work: flip the protocol state, credit the wallet, settle
    // the payment. The state CAS makes concurrent performs single-winner.
    let perform_time = Utc::now().timestamp_millis();
    let mut tx = pool.begin().await?;
    let rows = sqlx::query(
        r#"
        UPDATE payme_transactions
        SET state = $2, perform_time = $3, updated_at = NOW()
        WHERE id = $1 AND state = $4
        "#,
    )
    .bind(t.id)
    .bind(PaymeState::Performed)
    .bind(perform_time)
    .bind(PaymeState::Created)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?
    .rows_affected();
    if rows == 0 {
        drop(tx);
        let current = find_payme_transaction(pool, payme_id).await?;
        return match current {
            Some(t) if t.state == PaymeState::Performed => Ok(json!({
                "transaction": t.id.to_string(),
                "perform_time": t.perform_time.unwrap_or(0),
                "state": PaymeState::Performed.code(),
            })),
            _ => Err(PaymeError::new(
                ERR_UNABLE_TO_PERFORM,
                "Transaction is cancelled",
            )),
        };
    }

    ledger::credit_tx(
        &mut tx,
        payment.user_id,
        payment.amount.clone(),
        "Wallet top-up via Payme",
        Some(payment.id),
    )
    .await?;
    gateway::mark_completed(&mut tx, payment.id, payme_id, Utc::now()).await?;
    gateway::increment_attempts(&mut *tx, payment.id).await?;
    tx.commit().await.map_err(AppError::from)?;

    tracing::info!(
        payment_id = %payment.id,
        payme_id,
        amount = %payment.amount,
        "Payme payment performed, wallet credited"
    );
    Ok(json!({
        "transaction": t.id.to_string(),
        "perform_time": perform_time,
        "state": PaymeState::Performed.code(),
    }))
}

async fn cancel_transaction(
    pool: &PgPool,
    params: &Value,
    payment_id_out: &mut Option<Uuid>,
) -> Result<Value, PaymeError> {
    let payme_id = require_payme_id(params)?;
    let reason = params["reason"].as_i64().map(|r| r as i32);
    let Some(t) = find_payme_transaction(pool, payme_id).await? else {
        return Err(PaymeError::new(
            ERR_TRANSACTION_NOT_FOUND,
            "Transaction not found",
        ));
    };
    *payment_id_out = Some(t.payment_id);

    match t.state {
        PaymeState::Created => cancel_before_perform(pool, &t, reason).await,
        PaymeState::Performed => cancel_after_perform(pool, &t, reason).await,
        // Replay of a settled cancel.
        state => Ok(json!({
            "transaction": t.id.to_string(),
            "cancel_time": t.cancel_time.unwrap_or(0),
            "state": state.code(),
        })),
    }
}

async fn cancel_before_perform(
    pool: &PgPool,
    t: &PaymeTransaction,
    reason: Option<i32>,
) -> Result<Value, PaymeError> {
    let cancel_time = Utc::now().timestamp_millis();
    let mut tx = pool.begin().await?;
    let rows = sqlx::query(
        r#"
        UPDATE payme_transactions
        SET state = $2, cancel_time = $3, cancel_reason = $4, updated_at = NOW()
        WHERE id = $1 AND state = $5
        "#,
    )
    .bind(t.id)
    .bind(PaymeState::CancelledBeforePerform)
    .bind(cancel_time)
    .bind(reason)
    .bind(PaymeState::Created)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?
    .rows_affected();
    if rows == 0 {
        return Err(PaymeError::new(
            ERR_UNABLE_TO_CANCEL,
            "Transaction state changed concurrently",
        ));
    }
    gateway::transition_status(
        &mut *tx,
        t.payment_id,
        PaymentStatus::Processing,
        PaymentStatus::Cancelled,
    )
    .await?;
    gateway::increment_attempts(&mut *tx, t.payment_id).await?;
    tx.commit().await.map_err(AppError::from)?;

    tracing::info!(payment_id = %t.payment_id, payme_id = %t.payme_id, "Payme transaction cancelled before perform");
    Ok(json!({
        "transaction": t.id.to_string(),
        "cancel_time": cancel_time,
        "state": PaymeState::CancelledBeforePerform.code(),
    }))
}

/// Post-perform cancellation reverses the credit. A wallet that no longer
/// covers the original amount refuses the cancellation; the provider may
/// retry after the balance recovers.
async fn cancel_after_perform(
    pool: &PgPool,
    t: &PaymeTransaction,
    reason: Option<i32>,
) -> Result<Value, PaymeError> {
    let cancel_time = Utc::now().timestamp_millis();
    let mut tx = pool.begin().await?;

    match ledger::reverse_credit_tx(&mut tx, t.payment_id, "Top-up reversed by Payme cancellation")
        .await
    {
        Ok(_) => {}
        Err(AppError::InsufficientBalance { .. }) => {
            return Err(PaymeError::new(
                ERR_UNABLE_TO_CANCEL,
                "Unable to cancel: funds already spent",
            ));
        }
        Err(e) => return Err(e.into()),
    }

    let rows = sqlx::query(
        r#"
        UPDATE payme_transactions
        SET state = $2, cancel_time = $3, cancel_reason = $4, updated_at = NOW()
        WHERE id = $1 AND state = $5
        "#,
    )
    .bind(t.id)
    .bind(PaymeState::CancelledAfterPerform)
    .bind(cancel_time)
    .bind(reason)
    .bind(PaymeState::Performed)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)?
    .rows_affected();
    if rows == 0 {
        return Err(PaymeError::new(
            ERR_UNABLE_TO_CANCEL,
            "Transaction state changed concurrently",
        ));
    }
    gateway::transition_status(
        &mut *tx,
        t.payment_id,
        PaymentStatus::Completed,
        PaymentStatus::Refunded,
    )
    .await?;
    gateway::increment_attempts(&mut *tx, t.payment_id).await?;
    tx.commit().await.map_err(AppError::from)?;

    tracing::info!(payment_id = %t.payment_id, payme_id = %t.payme_id, "Payme transaction cancelled after perform, credit reversed");
    Ok(json!({
        "transaction": t.id.to_string(),
        "cancel_time": cancel_time,
        "state": PaymeState::CancelledAfterPerform.code(),
    }))
}

async fn check_transaction(
    pool: &PgPool,
    params: &Value,
    payment_id_out: &mut Option<Uuid>,
) -> Result<Value, PaymeError> {
    let payme_id = require_payme_id(params)?;
    let Some(t) = find_payme_transaction(pool, payme_id).await? else {
        return Err(PaymeError::new(
            ERR_TRANSACTION_NOT_FOUND,
            "Transaction not found",
        ));
    };
    *payment_id_out = Some(t.payment_id);
    Ok(json!({
        "create_time": t.create_time,
        "perform_time": t.perform_time.unwrap_or(0),
        "cancel_time": t.cancel_time.unwrap_or(0),
        "transaction": t.id.to_string(),
        "state": t.state.code(),
        "reason": t.cancel_reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_shape() {
        let response = rpc_error(json!(42), ERR_UNAUTHORIZED, "Insufficient privileges");
        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], 42);
        assert_eq!(response["error"]["code"], -32504);
        assert_eq!(response["error"]["message"], "Insufficient privileges");
        assert!(response.get("result").is_none());
    }

    #[test]
    fn test_request_envelope_parses() {
        let body = r#"{
            "jsonrpc": "2.0",
            "id": 7,
            "method": "CheckPerformTransaction",
            "params": { "amount": 5050000, "account": { "payment_id": "abc" } }
        }"#;
        let request: RpcRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.method, "CheckPerformTransaction");
        assert_eq!(request.id, json!(7));
        assert_eq!(request.params["amount"], 5050000);
        assert_eq!(request.params["account"]["payment_id"], "abc");
    }

    #[test]
    fn test_request_without_params() {
        let request: RpcRequest =
            serde_json::from_str(r#"{"id": 1, "method": "CheckTransaction"}"#).unwrap();
        assert!(request.params.is_null());
        assert!(require_payme_id(&request.params).is_err());
    }

    #[test]
    fn test_check_amount_uses_minor_units() {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            gateway: GatewayKind::Payme,
            amount: bigdecimal::BigDecimal::from(50_000),
            commission: bigdecimal::BigDecimal::from(500),
            total_amount: bigdecimal::BigDecimal::from(50_500),
            status: PaymentStatus::Pending,
            external_ref: None,
            attempts: 0,
            expires_at: now,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(check_amount(&json!({ "amount": 5_050_000 }), &payment).is_ok());
        // major units are wrong on this surface
        assert!(check_amount(&json!({ "amount": 50_500 }), &payment).is_err());
        assert!(check_amount(&json!({ "amount": "5050000" }), &payment).is_err());
    }

    #[test]
    fn test_created_result_shape() {
        let now = Utc::now();
        let t = PaymeTransaction {
            id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            payme_id: "payme-1".to_string(),
            state: PaymeState::Created,
            create_time: 1_725_000_000_000,
            perform_time: None,
            cancel_time: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let result = created_result(&t);
        assert_eq!(result["state"], 1);
        assert_eq!(result["create_time"], 1_725_000_000_000i64);
        assert_eq!(result["transaction"], t.id.to_string());
    }
}
