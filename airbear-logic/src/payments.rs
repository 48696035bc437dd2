use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::vehicle::UtcDT;

/// Handle returned by the payment processor for a card checkout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount_minor: i64,
}

/// What a cash/QR token carries. The token itself is opaque to the rider's
/// phone; the driver's scan posts it back for confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashTokenClaims {
    pub order_id: Option<Uuid>,
    pub ride_id: Option<Uuid>,
    pub user_id: Uuid,
    pub amount_minor: i64,
    pub timestamp: UtcDT,
}

/// A cash token failed to decode
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidCashToken;

impl fmt::Display for InvalidCashToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cash token is malformed")
    }
}

impl std::error::Error for InvalidCashToken {}

pub fn encode_cash_token(claims: &CashTokenClaims) -> String {
    let json = serde_json::to_vec(claims).expect("claims always serialize");
    URL_SAFE_NO_PAD.encode(json)
}

pub fn decode_cash_token(token: &str) -> Result<CashTokenClaims, InvalidCashToken> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|_| InvalidCashToken)?;
    serde_json::from_slice(&bytes).map_err(|_| InvalidCashToken)
}

/// Hex SHA-256 over the shared secret followed by the raw delivery body
pub fn webhook_signature(secret: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(body);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Constant-time check of a webhook delivery's signature header
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = webhook_signature(secret, body);
    let given = signature.trim().as_bytes();
    if given.len() != expected.len() {
        return false;
    }
    expected
        .as_bytes()
        .iter()
        .zip(given)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims() -> CashTokenClaims {
        CashTokenClaims {
            order_id: Some(Uuid::new_v4()),
            ride_id: None,
            user_id: Uuid::new_v4(),
            amount_minor: 400,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn cash_token_roundtrips() {
        let claims = claims();
        let token = encode_cash_token(&claims);
        let decoded = decode_cash_token(&token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn tampered_cash_token_is_rejected() {
        let token = encode_cash_token(&claims());
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(decode_cash_token(&tampered).is_err());
        assert!(decode_cash_token("definitely not base64 json!").is_err());
    }

    #[test]
    fn webhook_signature_verifies_and_rejects() {
        let body = br#"{"type":"payment.succeeded"}"#;
        let signature = webhook_signature("secret", body);

        assert!(verify_webhook_signature("secret", body, &signature));
        assert!(!verify_webhook_signature("other-secret", body, &signature));
        assert!(!verify_webhook_signature("secret", b"different body", &signature));
        assert!(!verify_webhook_signature("secret", body, "deadbeef"));
    }
}
