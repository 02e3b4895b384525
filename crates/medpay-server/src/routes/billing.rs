//! Client-facing billing API: top-ups, access checks, charges, balance.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{GatewayKind, NewDoctorViewCharge, ServiceType, WalletTransaction};
use crate::services::{billing, gateway, ledger, quota};

/// Creates the billing API router.
pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/topup", post(create_topup))
        .route("/access", get(check_access))
        .route("/charge", post(charge_service))
        .route("/balance", get(get_balance))
        .with_state(pool)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopupRequest {
    user_id: Uuid,
    amount: BigDecimal,
    gateway: GatewayKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TopupResponse {
    payment_id: Uuid,
    amount: BigDecimal,
    commission: BigDecimal,
    total_amount: BigDecimal,
    redirect_url: String,
    expires_at: DateTime<Utc>,
}

/// Initiates a wallet top-up and returns the gateway checkout redirect.
async fn create_topup(
    State(pool): State<PgPool>,
    Json(request): Json<TopupRequest>,
) -> Result<(StatusCode, Json<TopupResponse>), AppError> {
    let outcome =
        gateway::create_topup(&pool, request.user_id, request.amount, request.gateway).await?;
    let response = TopupResponse {
        payment_id: outcome.payment.id,
        amount: outcome.payment.amount,
        commission: outcome.payment.commission,
        total_amount: outcome.payment.total_amount,
        redirect_url: outcome.redirect_url,
        expires_at: outcome.payment.expires_at,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessQuery {
    user_id: Uuid,
    service_type: ServiceType,
    resource_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessResponse {
    can_access: bool,
    reason: quota::AccessReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<BigDecimal>,
}

/// Read-only access check. Consumes nothing; a positive answer can still
/// lose a race by the time the charge call arrives, which the charge path
/// resolves on its own.
async fn check_access(
    State(pool): State<PgPool>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<AccessResponse>, AppError> {
    let settings = billing::load_settings(&pool).await?;
    if !settings.billing_enabled {
        return Ok(Json(AccessResponse {
            can_access: true,
            reason: quota::AccessReason::BillingDisabled,
            price: None,
        }));
    }

    match query.service_type {
        ServiceType::DoctorView => {
            let doctor_id = billing::require_resource(query.service_type, query.resource_id)?
                .ok_or_else(|| AppError::Validation("resourceId is required".to_string()))?;
            let mut conn = pool.acquire().await?;
            let (free, reason) =
                quota::can_access_free(&mut conn, query.user_id, doctor_id, &settings).await?;
            if free {
                return Ok(Json(AccessResponse {
                    can_access: true,
                    reason,
                    price: None,
                }));
            }
            let price = billing::price_for(&pool, query.service_type, 1).await?;
            let wallet = ledger::get_or_create_wallet(&pool, query.user_id).await?;
            Ok(Json(AccessResponse {
                can_access: !wallet.is_blocked && wallet.balance >= price,
                reason,
                price: Some(price),
            }))
        }
        _ => {
            let price = billing::price_for(&pool, query.service_type, 1).await?;
            let wallet = ledger::get_or_create_wallet(&pool, query.user_id).await?;
            Ok(Json(AccessResponse {
                can_access: !wallet.is_blocked && wallet.balance >= price,
                reason: quota::AccessReason::RequiresPayment,
                price: Some(price),
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChargeRequest {
    user_id: Uuid,
    service_type: ServiceType,
    resource_id: Option<Uuid>,
    #[serde(default)]
    quantity: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChargeResponse {
    charged: bool,
    amount: BigDecimal,
    new_balance: BigDecimal,
    reason: quota::AccessReason,
}

/// Charges the wallet for a service. Doctor views run through the quota
/// tracker; other services debit the rule price directly.
async fn charge_service(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Json(request): Json<ChargeRequest>,
) -> Result<Json<ChargeResponse>, AppError> {
    match request.service_type {
        ServiceType::DoctorView => {
            let doctor_id = billing::require_resource(request.service_type, request.resource_id)?
                .ok_or_else(|| AppError::Validation("resourceId is required".to_string()))?;
            let meta = NewDoctorViewCharge {
                ip_address: None,
                user_agent: headers
                    .get("user-agent")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            };
            let outcome =
                quota::charge_for_view(&pool, request.user_id, doctor_id, meta).await?;
            Ok(Json(ChargeResponse {
                charged: outcome.charged,
                amount: outcome.amount,
                new_balance: outcome.new_balance,
                reason: outcome.reason,
            }))
        }
        service_type => {
            let settings = billing::load_settings(&pool).await?;
            billing::require_operational(&settings)?;
            let qty = request.quantity.unwrap_or(1);
            let price = billing::price_for(&pool, service_type, qty).await?;
            let description = match service_type {
                ServiceType::VideoConsultation => "video consultation",
                ServiceType::ChatConsultation => "chat consultation",
                ServiceType::DoctorView => unreachable!(),
            };
            let entry = ledger::debit(&pool, request.user_id, price.clone(), description).await?;
            Ok(Json(ChargeResponse {
                charged: true,
                amount: price,
                new_balance: entry.balance_after,
                reason: quota::AccessReason::RequiresPayment,
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceQuery {
    user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    balance: BigDecimal,
    total_spent: BigDecimal,
    total_topped_up: BigDecimal,
    is_blocked: bool,
    recent_transactions: Vec<WalletTransaction>,
}

/// Current wallet balance with the last few ledger entries.
async fn get_balance(
    State(pool): State<PgPool>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, AppError> {
    let wallet = ledger::get_or_create_wallet(&pool, query.user_id).await?;
    let recent = ledger::recent_transactions(&pool, wallet.id, 10).await?;
    Ok(Json(BalanceResponse {
        balance: wallet.balance,
        total_spent: wallet.total_spent,
        total_topped_up: wallet.total_topped_up,
        is_blocked: wallet.is_blocked,
        recent_transactions: recent,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_topup_request_parses_camel_case() {
        let body = r#"{
            "userId": "8f14e45f-ceea-467f-a8cb-000000000042",
            "amount": "50000.00",
            "gateway": "click"
        }"#;
        let request: TopupRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.gateway, GatewayKind::Click);
        assert_eq!(request.amount, BigDecimal::from_str("50000.00").unwrap());
    }

    #[test]
    fn test_access_response_omits_price_when_free() {
        let response = AccessResponse {
            can_access: true,
            reason: quota::AccessReason::DailyQuota,
            price: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["canAccess"], true);
        assert_eq!(json["reason"], "daily_quota");
        assert!(json.get("price").is_none());
    }

    #[test]
    fn test_charge_request_defaults_quantity() {
        let body = r#"{
            "userId": "8f14e45f-ceea-467f-a8cb-000000000042",
            "serviceType": "video_consultation"
        }"#;
        let request: ChargeRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.service_type, ServiceType::VideoConsultation);
        assert!(request.resource_id.is_none());
        assert!(request.quantity.is_none());
    }
}
