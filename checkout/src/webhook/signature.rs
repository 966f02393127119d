//! Webhook payload signing and verification.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signs a payload with the shared secret; returns the base64 digest.
///
/// # Errors
///
/// Returns [`Error::Fatal`] only for a zero-length key rejected by the
/// MAC implementation.
pub fn sign_payload(payload: &[u8], secret: &[u8]) -> Result<String, Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Fatal(format!("webhook secret: {e}")))?;
    mac.update(payload);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Verifies a base64 signature against a payload in constant time.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] when the signature is not valid
/// base64 or does not match.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &[u8]) -> Result<(), Error> {
    let expected = BASE64
        .decode(signature)
        .map_err(|e| Error::InvalidParameter(format!("signature encoding: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Fatal(format!("webhook secret: {e}")))?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| Error::InvalidParameter("signature verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let signature = sign_payload(b"payload", b"secret").unwrap();
        assert!(!signature.is_empty());
        verify_signature(b"payload", &signature, b"secret").unwrap();
    }

    #[test]
    fn any_single_byte_change_breaks_verification() {
        let payload = b"{\"event\":\"payment.succeeded\"}".to_vec();
        let signature = sign_payload(&payload, b"secret").unwrap();
        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 1;
            assert!(verify_signature(&tampered, &signature, b"secret").is_err());
        }
    }

    #[test]
    fn wrong_secret_fails() {
        let signature = sign_payload(b"payload", b"secret").unwrap();
        assert!(verify_signature(b"payload", &signature, b"other").is_err());
    }
}
