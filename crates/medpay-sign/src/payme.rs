// Payme merchant API authorization.
//
// Payme authenticates every JSON-RPC call with an HTTP Basic header whose
// credentials are the fixed login "Paycom" and the merchant key issued in
// the cabinet.

use base64::Engine;

/// The login Payme uses for all merchant API calls.
pub const PAYME_LOGIN: &str = "Paycom";

/// Builds the expected `Authorization` header value for the given merchant
/// key.
pub fn basic_auth_header(merchant_key: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", PAYME_LOGIN, merchant_key));
    format!("Basic {}", token)
}

/// Verifies an inbound `Authorization` header against the merchant key.
/// Decodes the Basic credentials and compares login and key separately, so a
/// header that base64-encodes differently but decodes to the same
/// credentials still passes.
pub fn verify_authorization(header: &str, merchant_key: &str) -> bool {
    let Some(token) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(token.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    match credentials.split_once(':') {
        Some((login, key)) => login == PAYME_LOGIN && key == merchant_key,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header_known_vector() {
        // base64("Paycom:test_key_123")
        assert_eq!(
            basic_auth_header("test_key_123"),
            "Basic UGF5Y29tOnRlc3Rfa2V5XzEyMw=="
        );
    }

    #[test]
    fn test_verify_round_trip() {
        let header = basic_auth_header("test_key_123");
        assert!(verify_authorization(&header, "test_key_123"));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let header = basic_auth_header("test_key_123");
        assert!(!verify_authorization(&header, "another_key"));
    }

    #[test]
    fn test_verify_rejects_wrong_login() {
        let token = base64::engine::general_purpose::STANDARD.encode("NotPaycom:test_key_123");
        assert!(!verify_authorization(
            &format!("Basic {}", token),
            "test_key_123"
        ));
    }

    #[test]
    fn test_verify_rejects_malformed_header() {
        assert!(!verify_authorization("Bearer abc", "test_key_123"));
        assert!(!verify_authorization("Basic not-base64!!!", "test_key_123"));
        let token = base64::engine::general_purpose::STANDARD.encode("no-colon-here");
        assert!(!verify_authorization(&format!("Basic {}", token), "key"));
    }
}
