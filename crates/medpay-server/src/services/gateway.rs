//! Gateway adapter layer: the one place that knows which external provider
//! a payment belongs to.
//!
//! The billing engine never branches on gateway name outside this module
//! and the two protocol routes; adding a third provider means adding one
//! adapter here plus its callback route.

use base64::Engine;
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{GatewayKind, Payment, PaymentGateway, PaymentStatus};
use crate::services::billing;

/// How long a pending top-up stays payable.
const TOPUP_TTL_MINUTES: i64 = 15;

/// Uniform contract a concrete gateway satisfies: build the checkout
/// redirect for a pending payment. Inbound callback handling lives in the
/// protocol routes; signature verification in `medpay-sign`.
pub trait GatewayAdapter: Send + Sync {
    fn kind(&self) -> GatewayKind;
    fn payment_url(&self, gateway: &PaymentGateway, payment: &Payment) -> String;
}

pub struct ClickAdapter;

impl GatewayAdapter for ClickAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Click
    }

    fn payment_url(&self, gateway: &PaymentGateway, payment: &Payment) -> String {
        format!(
            "https://my.click.uz/services/pay?service_id={}&merchant_id={}&amount={}&transaction_param={}",
            gateway.service_id, gateway.merchant_id, payment.total_amount, payment.id
        )
    }
}

pub struct PaymeAdapter;

impl GatewayAdapter for PaymeAdapter {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Payme
    }

    fn payment_url(&self, gateway: &PaymentGateway, payment: &Payment) -> String {
        let minor = payment
            .total_amount_minor()
            .with_scale_round(0, RoundingMode::HalfUp);
        let params = format!(
            "m={};ac.payment_id={};a={}",
            gateway.merchant_id, payment.id, minor
        );
        let encoded = base64::engine::general_purpose::STANDARD.encode(params);
        let host = if gateway.test_mode {
            "https://checkout.test.paycom.uz"
        } else {
            "https://checkout.paycom.uz"
        };
        format!("{}/{}", host, encoded)
    }
}

static CLICK: ClickAdapter = ClickAdapter;
static PAYME: PaymeAdapter = PaymeAdapter;

/// Single dispatch point from gateway kind to adapter.
pub fn adapter_for(kind: GatewayKind) -> &'static dyn GatewayAdapter {
    match kind {
        GatewayKind::Click => &CLICK,
        GatewayKind::Payme => &PAYME,
    }
}

/// Loads an active gateway configuration. An inactive or missing gateway is
/// `GatewayUnavailable`.
pub async fn load_active_gateway<'e, E: PgExecutor<'e>>(
    executor: E,
    kind: GatewayKind,
) -> Result<PaymentGateway, AppError> {
    let gateway: Option<PaymentGateway> = sqlx::query_as(
        r#"
        SELECT id, kind, merchant_id, service_id, secret_key, min_amount, max_amount,
               commission_type, commission_pct, commission_fixed, currency,
               is_active, test_mode, created_at, updated_at
        FROM payment_gateways
        WHERE kind = $1
        "#,
    )
    .bind(kind)
    .fetch_optional(executor)
    .await?;

    match gateway {
        Some(gw) if gw.is_active => Ok(gw),
        Some(_) => Err(AppError::GatewayUnavailable(format!(
            "gateway {} is not active",
            kind.as_str()
        ))),
        None => Err(AppError::GatewayUnavailable(format!(
            "gateway {} is not configured",
            kind.as_str()
        ))),
    }
}

/// Result of initiating a top-up.
#[derive(Debug, Clone)]
pub struct TopupOutcome {
    pub payment: Payment,
    pub redirect_url: String,
}

/// Creates a pending top-up payment and the gateway redirect URL. The user
/// pays `amount + commission` at the gateway; the wallet is credited
/// `amount` when the provider confirms.
pub async fn create_topup(
    pool: &PgPool,
    user_id: Uuid,
    amount: BigDecimal,
    kind: GatewayKind,
) -> Result<TopupOutcome, AppError> {
    let settings = billing::load_settings(pool).await?;
    billing::require_operational(&settings)?;
    billing::validate_topup_amount(&settings, &amount)?;

    let gateway = load_active_gateway(pool, kind).await?;
    if !gateway.accepts_amount(&amount) {
        return Err(AppError::Validation(format!(
            "amount outside gateway bounds ({} - {})",
            gateway.min_amount, gateway.max_amount
        )));
    }

    let commission = gateway.commission_for(&amount);
    let total_amount = &amount + &commission;
    let expires_at = Utc::now() + Duration::minutes(TOPUP_TTL_MINUTES);

    let payment: Payment = sqlx::query_as(
        r#"
        INSERT INTO payments (user_id, gateway, amount, commission, total_amount, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, user_id, gateway, amount, commission, total_amount, status,
                  external_ref, attempts, expires_at, paid_at, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(&amount)
    .bind(&commission)
    .bind(&total_amount)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    let redirect_url = adapter_for(kind).payment_url(&gateway, &payment);
    tracing::info!(
        payment_id = %payment.id,
        gateway = kind.as_str(),
        amount = %payment.amount,
        "top-up payment created"
    );

    Ok(TopupOutcome {
        payment,
        redirect_url,
    })
}

/// Loads a payment by id.
pub async fn find_payment<'e, E: PgExecutor<'e>>(
    executor: E,
    payment_id: Uuid,
) -> Result<Option<Payment>, AppError> {
    let payment: Option<Payment> = sqlx::query_as(
        r#"
        SELECT id, user_id, gateway, amount, commission, total_amount, status,
               external_ref, attempts, expires_at, paid_at, created_at, updated_at
        FROM payments
        WHERE id = $1
        "#,
    )
    .bind(payment_id)
    .fetch_optional(executor)
    .await?;
    Ok(payment)
}

/// Compare-and-set status transition. Returns true when this caller won the
/// transition; false means another delivery got there first and the caller
/// must re-read and answer idempotently.
pub async fn transition_status<'e, E: PgExecutor<'e>>(
    executor: E,
    payment_id: Uuid,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<bool, AppError> {
    debug_assert!(from.can_transition_to(to));
    let rows = sqlx::query(
        "UPDATE payments SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
    )
    .bind(payment_id)
    .bind(from)
    .bind(to)
    .execute(executor)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// Marks a completed payment: status, provider reference, and paid-at, in
/// the caller's transaction. Caller must have won the `processing`
/// transition first.
pub async fn mark_completed(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
    external_ref: &str,
    paid_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE payments
        SET status = 'completed', external_ref = $2, paid_at = $3, updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(payment_id)
    .bind(external_ref)
    .bind(paid_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Lazily expires a stale pending payment. Loses gracefully if a concurrent
/// callback completed it first.
pub async fn expire_if_stale(pool: &PgPool, payment: &Payment) -> Result<bool, AppError> {
    if !payment.is_stale(Utc::now()) {
        return Ok(false);
    }
    let expired =
        transition_status(pool, payment.id, PaymentStatus::Pending, PaymentStatus::Expired).await?;
    if expired {
        tracing::info!(payment_id = %payment.id, "pending payment expired");
    }
    Ok(expired)
}

/// Counts a callback delivery against the payment.
pub async fn increment_attempts<'e, E: PgExecutor<'e>>(
    executor: E,
    payment_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query("UPDATE payments SET attempts = attempts + 1, updated_at = NOW() WHERE id = $1")
        .bind(payment_id)
        .execute(executor)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn gateway(kind: GatewayKind, test_mode: bool) -> PaymentGateway {
        let now = Utc::now();
        PaymentGateway {
            id: Uuid::new_v4(),
            kind,
            merchant_id: "m-777".to_string(),
            service_id: "12345".to_string(),
            secret_key: "SECRET_KEY".to_string(),
            min_amount: BigDecimal::from(1000),
            max_amount: BigDecimal::from(10_000_000),
            commission_type: crate::models::CommissionType::Percentage,
            commission_pct: BigDecimal::from_str("1.00").unwrap(),
            commission_fixed: BigDecimal::from(0),
            currency: "UZS".to_string(),
            is_active: true,
            test_mode,
            created_at: now,
            updated_at: now,
        }
    }

    fn payment() -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::from_str("8f14e45f-ceea-467f-a8cb-000000000042").unwrap(),
            user_id: Uuid::new_v4(),
            gateway: GatewayKind::Click,
            amount: BigDecimal::from_str("50000.00").unwrap(),
            commission: BigDecimal::from_str("500.00").unwrap(),
            total_amount: BigDecimal::from_str("50500.00").unwrap(),
            status: PaymentStatus::Pending,
            external_ref: None,
            attempts: 0,
            expires_at: now + Duration::minutes(15),
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_click_payment_url() {
        let url = adapter_for(GatewayKind::Click).payment_url(&gateway(GatewayKind::Click, false), &payment());
        assert!(url.starts_with("https://my.click.uz/services/pay?"));
        assert!(url.contains("service_id=12345"));
        assert!(url.contains("merchant_id=m-777"));
        assert!(url.contains("amount=50500.00"));
        assert!(url.contains("transaction_param=8f14e45f-ceea-467f-a8cb-000000000042"));
    }

    #[test]
    fn test_payme_payment_url_encodes_minor_units() {
        let url = adapter_for(GatewayKind::Payme).payment_url(&gateway(GatewayKind::Payme, false), &payment());
        let encoded = url.strip_prefix("https://checkout.paycom.uz/").unwrap();
        let decoded = String::from_utf8(
            base64::engine::general_purpose::STANDARD.decode(encoded).unwrap(),
        )
        .unwrap();
        assert_eq!(
            decoded,
            "m=m-777;ac.payment_id=8f14e45f-ceea-467f-a8cb-000000000042;a=5050000"
        );
    }

    #[test]
    fn test_payme_test_mode_host() {
        let url = adapter_for(GatewayKind::Payme).payment_url(&gateway(GatewayKind::Payme, true), &payment());
        assert!(url.starts_with("https://checkout.test.paycom.uz/"));
    }
}
