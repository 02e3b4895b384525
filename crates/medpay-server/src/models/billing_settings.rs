//! Billing settings singleton.
//!
//! Loaded fresh for every operation that consults it, never cached, so
//! maintenance-mode toggles take effect without a restart.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Global billing configuration. A single row with `id = 1`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingSettings {
    pub id: i16,
    /// Master switch: when false, all charging and top-ups are refused.
    pub billing_enabled: bool,
    /// Maintenance mode: top-ups and charges refused, webhooks still
    /// audited.
    pub maintenance_mode: bool,
    /// Free doctor-profile views per user per calendar day.
    pub free_views_per_day: i32,
    /// Lifetime free views for users inside the new-user window.
    pub free_views_for_new_users: i32,
    /// Length of the new-user window in days.
    pub new_user_window_days: i32,
    /// Minimum accepted top-up amount.
    pub min_topup_amount: BigDecimal,
    /// Maximum accepted top-up amount.
    pub max_topup_amount: BigDecimal,
    /// Crediting a blocked doctor's wallet to at least this balance clears
    /// the profile block in the same unit of work.
    pub doctor_unblock_threshold: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

impl BillingSettings {
    /// Returns true when billing can accept money-moving operations.
    pub fn is_operational(&self) -> bool {
        self.billing_enabled && !self.maintenance_mode
    }
}
