//! HMAC-SHA256 webhook request signing.
//!
//! The signature covers `"<timestamp>.<raw_body>"` so receivers can bind the
//! body to the send time and reject replays.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "X-Uptimer-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Uptimer-Signature";

/// Compute the lowercase-hex HMAC-SHA256 signature over the signing string.
pub fn sign_payload(secret: &[u8], timestamp: i64, raw_body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(format!("{}.{}", timestamp, raw_body).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// The `X-Uptimer-Signature` header value.
pub fn signature_header_value(secret: &[u8], timestamp: i64, raw_body: &str) -> String {
    format!("sha256={}", sign_payload(secret, timestamp, raw_body))
}

/// Receiver-side verification, used by tests and documented for consumers.
pub fn verify_signature(secret: &[u8], timestamp: i64, raw_body: &str, signature: &str) -> bool {
    let expected = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(format!("{}.{}", timestamp, raw_body).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_shape() {
        let sig = sign_payload(b"s3cret", 1700000000, r#"{"a":1}"#);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, sig.to_lowercase());
        assert_eq!(
            signature_header_value(b"s3cret", 1700000000, r#"{"a":1}"#),
            format!("sha256={}", sig)
        );
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let sig = sign_payload(b"s3cret", 1700000000, r#"{"a":1}"#);
        assert!(verify_signature(b"s3cret", 1700000000, r#"{"a":1}"#, &sig));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let sig = sign_payload(b"s3cret", 1700000000, r#"{"a":1}"#);
        assert!(!verify_signature(b"wrong", 1700000000, r#"{"a":1}"#, &sig));
        assert!(!verify_signature(b"s3cret", 1700000001, r#"{"a":1}"#, &sig));
        assert!(!verify_signature(b"s3cret", 1700000000, r#"{"a":2}"#, &sig));
        assert!(!verify_signature(b"s3cret", 1700000000, r#"{"a":1}"#, "zz"));
    }

    #[test]
    fn test_timestamp_is_part_of_signing_string() {
        // Same body, different timestamps must differ
        let a = sign_payload(b"k", 1, "body");
        let b = sign_payload(b"k", 2, "body");
        assert_ne!(a, b);
        // Moving a digit across the separator must differ
        let c = sign_payload(b"k", 12, ".body");
        let d = sign_payload(b"k", 1, "2..body");
        assert_ne!(c, d);
    }
}
