// Click callback signature verification.
//
// Click signs every `prepare`/`complete` callback with
// MD5(click_trans_id + service_id + secret_key + merchant_trans_id +
// [merchant_prepare_id] + amount + action + sign_time), where
// merchant_prepare_id participates only in the `complete` action. MD5 is
// mandated by the provider's protocol and must be preserved exactly for
// interoperability.

use md5::{Digest, Md5};

/// Click `action` value for the prepare callback.
pub const ACTION_PREPARE: i32 = 0;
/// Click `action` value for the complete callback.
pub const ACTION_COMPLETE: i32 = 1;

/// Fields entering the Click signature digest, in protocol order.
#[derive(Debug, Clone)]
pub struct ClickSignPayload<'a> {
    pub click_trans_id: i64,
    pub service_id: i64,
    pub secret_key: &'a str,
    pub merchant_trans_id: &'a str,
    /// Present for `complete` callbacks only.
    pub merchant_prepare_id: Option<i64>,
    /// Amount exactly as it appears in the callback, not re-formatted.
    pub amount: &'a str,
    pub action: i32,
    pub sign_time: &'a str,
}

/// Computes the MD5 signature digest for a Click callback and returns it as
/// a lowercase hex string.
pub fn click_digest(payload: &ClickSignPayload<'_>) -> String {
    let mut hasher = Md5::new();
    hasher.update(payload.click_trans_id.to_string().as_bytes());
    hasher.update(payload.service_id.to_string().as_bytes());
    hasher.update(payload.secret_key.as_bytes());
    hasher.update(payload.merchant_trans_id.as_bytes());
    if let Some(prepare_id) = payload.merchant_prepare_id {
        hasher.update(prepare_id.to_string().as_bytes());
    }
    hasher.update(payload.amount.as_bytes());
    hasher.update(payload.action.to_string().as_bytes());
    hasher.update(payload.sign_time.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verifies an inbound `sign_string` against the expected digest.
/// Comparison is case-insensitive; Click integrations are inconsistent about
/// hex casing.
pub fn verify_click_signature(payload: &ClickSignPayload<'_>, sign_string: &str) -> bool {
    let expected = click_digest(payload);
    expected.eq_ignore_ascii_case(sign_string.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare_payload() -> ClickSignPayload<'static> {
        ClickSignPayload {
            click_trans_id: 1234567,
            service_id: 12345,
            secret_key: "SECRET_KEY",
            merchant_trans_id: "pay-42",
            merchant_prepare_id: None,
            amount: "50500.00",
            action: ACTION_PREPARE,
            sign_time: "2026-08-31 12:00:00",
        }
    }

    #[test]
    fn test_prepare_digest_known_vector() {
        // MD5("123456712345SECRET_KEYpay-4250500.0002026-08-31 12:00:00")
        assert_eq!(
            click_digest(&prepare_payload()),
            "ec477c6c90db62132490f5da3627cbcd"
        );
    }

    #[test]
    fn test_complete_digest_includes_prepare_id() {
        let payload = ClickSignPayload {
            merchant_prepare_id: Some(77),
            action: ACTION_COMPLETE,
            ..prepare_payload()
        };
        // MD5("123456712345SECRET_KEYpay-427750500.0012026-08-31 12:00:00")
        assert_eq!(
            click_digest(&payload),
            "956a809c66c5b81ee441d9c2e30693fd"
        );
    }

    #[test]
    fn test_verify_accepts_uppercase_hex() {
        let payload = prepare_payload();
        assert!(verify_click_signature(
            &payload,
            "EC477C6C90DB62132490F5DA3627CBCD"
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_amount() {
        let mut payload = prepare_payload();
        let sign = click_digest(&payload);
        payload.amount = "50501.00";
        assert!(!verify_click_signature(&payload, &sign));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let mut payload = prepare_payload();
        let sign = click_digest(&payload);
        payload.secret_key = "OTHER_KEY";
        assert!(!verify_click_signature(&payload, &sign));
    }
}
