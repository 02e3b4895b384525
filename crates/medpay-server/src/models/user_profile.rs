//! Collaborator projection of the identity service.
//!
//! MedPay only reads these rows, except for the doctor-unblock invariant:
//! a credit that restores a blocked doctor's solvency clears `is_blocked`
//! inside the crediting transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "user_account_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserAccountType {
    Patient,
    Doctor,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub account_type: UserAccountType,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// Account age in whole days as of `now`.
    pub fn account_age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_account_age_days() {
        let now = Utc::now();
        let profile = UserProfile {
            id: Uuid::new_v4(),
            account_type: UserAccountType::Patient,
            is_blocked: false,
            created_at: now - Duration::days(6) - Duration::hours(23),
        };
        assert_eq!(profile.account_age_days(now), 6);
    }
}
