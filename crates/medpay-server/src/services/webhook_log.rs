//! Webhook audit layer: verbatim record of every inbound gateway callback.
//!
//! A row is written before any processing and completed afterwards with the
//! signature verdict, the resolved payment, and the exact protocol response
//! returned. The state machines provide the functional idempotency
//! guarantee; this log is the forensic record that lets "was this exact
//! callback already fully processed" be answered under at-least-once
//! delivery.

use axum::http::HeaderMap;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::GatewayKind;

/// Records an inbound callback before processing starts.
pub async fn record_inbound(
    pool: &PgPool,
    gateway: GatewayKind,
    headers: &HeaderMap,
    raw_body: &str,
) -> Result<Uuid, AppError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO payment_webhooks (gateway, headers, raw_body)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(gateway)
    .bind(headers_to_json(headers))
    .bind(raw_body)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Completes the audit row once processing has produced a protocol
/// response.
pub async fn finish(
    pool: &PgPool,
    webhook_id: Uuid,
    payment_id: Option<Uuid>,
    signature_valid: Option<bool>,
    result: &Value,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE payment_webhooks
        SET payment_id = $2, signature_valid = $3, result = $4, processed_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(webhook_id)
    .bind(payment_id)
    .bind(signature_valid)
    .bind(result)
    .execute(pool)
    .await?;
    Ok(())
}

/// Header map as a JSON object; non-UTF-8 values are recorded lossily
/// rather than dropped.
fn headers_to_json(headers: &HeaderMap) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();
    Value::Object(map)
}
