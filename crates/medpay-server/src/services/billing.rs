//! Billing rules engine: pricing, commission, and settings access.

use bigdecimal::BigDecimal;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{BillingRule, BillingSettings, ServiceType};

/// Loads the billing settings singleton. Called per operation, never cached,
/// so maintenance-mode toggles take effect without a restart.
pub async fn load_settings<'e, E: PgExecutor<'e>>(
    executor: E,
) -> Result<BillingSettings, AppError> {
    let settings: BillingSettings = sqlx::query_as(
        r#"
        SELECT id, billing_enabled, maintenance_mode, free_views_per_day,
               free_views_for_new_users, new_user_window_days, min_topup_amount,
               max_topup_amount, doctor_unblock_threshold, updated_at
        FROM billing_settings
        WHERE id = 1
        "#,
    )
    .fetch_one(executor)
    .await?;
    Ok(settings)
}

/// Loads the active billing rule for a service type. A missing or inactive
/// rule means "service unavailable"; callers must not treat it as free
/// access.
pub async fn active_rule<'e, E: PgExecutor<'e>>(
    executor: E,
    service_type: ServiceType,
) -> Result<BillingRule, AppError> {
    let rule: Option<BillingRule> = sqlx::query_as(
        r#"
        SELECT id, service_type, base_price, is_active, discount_pct,
               min_qty_for_discount, created_at, updated_at
        FROM billing_rules
        WHERE service_type = $1 AND is_active = TRUE
        "#,
    )
    .bind(service_type)
    .fetch_optional(executor)
    .await?;

    rule.ok_or_else(|| {
        AppError::NotFound(format!(
            "no active billing rule for service type {:?}",
            service_type
        ))
    })
}

/// Total price for `qty` units of a service, with the rule's discount tier
/// applied.
pub async fn price_for<'e, E: PgExecutor<'e>>(
    executor: E,
    service_type: ServiceType,
    qty: i32,
) -> Result<BigDecimal, AppError> {
    if qty <= 0 {
        return Err(AppError::Validation("Quantity must be positive".to_string()));
    }
    let rule = active_rule(executor, service_type).await?;
    Ok(rule.total_price(qty))
}

/// Validates a top-up amount against the global settings bounds.
pub fn validate_topup_amount(
    settings: &BillingSettings,
    amount: &BigDecimal,
) -> Result<(), AppError> {
    if amount <= &BigDecimal::from(0) {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    if amount < &settings.min_topup_amount {
        return Err(AppError::Validation(format!(
            "Minimum top-up amount is {}",
            settings.min_topup_amount
        )));
    }
    if amount > &settings.max_topup_amount {
        return Err(AppError::Validation(format!(
            "Maximum top-up amount is {}",
            settings.max_topup_amount
        )));
    }
    Ok(())
}

/// Refuses money-moving operations while billing is disabled or in
/// maintenance.
pub fn require_operational(settings: &BillingSettings) -> Result<(), AppError> {
    if !settings.billing_enabled {
        return Err(AppError::GatewayUnavailable(
            "billing is disabled".to_string(),
        ));
    }
    if settings.maintenance_mode {
        return Err(AppError::GatewayUnavailable(
            "billing is in maintenance mode".to_string(),
        ));
    }
    Ok(())
}

/// Resolves the (opaque) resource id a charge is billed against. Doctor
/// views require one; other services do not.
pub fn require_resource(
    service_type: ServiceType,
    resource_id: Option<Uuid>,
) -> Result<Option<Uuid>, AppError> {
    match service_type {
        ServiceType::DoctorView => resource_id
            .map(Some)
            .ok_or_else(|| AppError::Validation("resourceId is required for doctor views".into())),
        _ => Ok(resource_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn settings() -> BillingSettings {
        BillingSettings {
            id: 1,
            billing_enabled: true,
            maintenance_mode: false,
            free_views_per_day: 3,
            free_views_for_new_users: 10,
            new_user_window_days: 7,
            min_topup_amount: BigDecimal::from_str("1000.00").unwrap(),
            max_topup_amount: BigDecimal::from_str("10000000.00").unwrap(),
            doctor_unblock_threshold: BigDecimal::from(0),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_topup_bounds() {
        let s = settings();
        assert!(validate_topup_amount(&s, &BigDecimal::from_str("1000.00").unwrap()).is_ok());
        assert!(validate_topup_amount(&s, &BigDecimal::from_str("999.99").unwrap()).is_err());
        assert!(validate_topup_amount(&s, &BigDecimal::from_str("10000000.01").unwrap()).is_err());
        assert!(validate_topup_amount(&s, &BigDecimal::from(-5)).is_err());
        assert!(validate_topup_amount(&s, &BigDecimal::from(0)).is_err());
    }

    #[test]
    fn test_require_operational() {
        let mut s = settings();
        assert!(require_operational(&s).is_ok());
        s.maintenance_mode = true;
        assert!(require_operational(&s).is_err());
        s.maintenance_mode = false;
        s.billing_enabled = false;
        assert!(require_operational(&s).is_err());
    }

    #[test]
    fn test_require_resource_for_doctor_view() {
        assert!(require_resource(ServiceType::DoctorView, None).is_err());
        let id = Uuid::new_v4();
        assert_eq!(
            require_resource(ServiceType::DoctorView, Some(id)).unwrap(),
            Some(id)
        );
        assert_eq!(
            require_resource(ServiceType::VideoConsultation, None).unwrap(),
            None
        );
    }
}
