//! Request signing: hex-encoded HMAC-SHA256 of the exact body bytes.
//!
//! The body is the stored payload rendered once per attempt; because the
//! stored payload is canonical, every retry carries the same bytes and the
//! same signature, and subscribers can verify against what they receive.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the signature on outbound requests.
pub const SIGNATURE_HEADER: &str = "X-Ledger-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Sign `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification (used by tests and by subscriber examples).
pub fn verify(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // RFC 2202-style test vector for HMAC-SHA256.
        let sig = sign("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn verify_accepts_own_signature() {
        let body = br#"{"transaction_id":"abc"}"#;
        let sig = sign("s3cr3t", body);
        assert!(verify("s3cr3t", body, &sig));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let sig = sign("s3cr3t", b"original");
        assert!(!verify("s3cr3t", b"tampered", &sig));
    }

    #[test]
    fn verify_rejects_wrong_secret_and_garbage() {
        let sig = sign("s3cr3t", b"body");
        assert!(!verify("other", b"body", &sig));
        assert!(!verify("s3cr3t", b"body", "not-hex"));
    }

    #[test]
    fn signature_is_stable_across_calls() {
        let body = b"identical bytes";
        assert_eq!(sign("k", body), sign("k", body));
    }
}
