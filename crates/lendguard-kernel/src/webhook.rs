//! HMAC-SHA256 webhook signatures.
//!
//! The signature header carries `sha256=<hex>` or the bare hex digest of the
//! raw request body keyed with the shared secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
const SIGNATURE_PREFIX: &str = "sha256=";
const DIGEST_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("missing signature header")]
    MissingSignature,
    #[error("signature is not a sha256 hex digest")]
    InvalidSignatureFormat,
    #[error("signature does not match")]
    InvalidSignature,
}

fn compute(secret: &[u8], body: &[u8]) -> Result<Vec<u8>, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| WebhookError::MissingSecret)?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }
    let digest = compute(secret.as_bytes(), body)?;
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
}

fn parse_signature(header: &str) -> Result<Vec<u8>, WebhookError> {
    let trimmed = header.trim();
    let hex_part = trimmed
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(trimmed);
    let bytes = hex::decode(hex_part).map_err(|_| WebhookError::InvalidSignatureFormat)?;
    if bytes.len() != DIGEST_LEN {
        return Err(WebhookError::InvalidSignatureFormat);
    }
    Ok(bytes)
}

pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::MissingSecret);
    }
    let header = header
        .filter(|value| !value.trim().is_empty())
        .ok_or(WebhookError::MissingSignature)?;
    let provided = parse_signature(header)?;
    let expected = compute(secret.as_bytes(), body)?;
    if bool::from(expected.ct_eq(&provided)) {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"event":"loan.funded","id":"L-1001"}"#;

    #[test]
    fn signed_body_verifies_with_and_without_prefix() {
        let header = sign(SECRET, BODY).expect("sign");
        assert!(header.starts_with("sha256="));
        verify_signature(SECRET, BODY, Some(&header)).expect("prefixed");
        let bare = header.trim_start_matches("sha256=");
        verify_signature(SECRET, BODY, Some(bare)).expect("bare");
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign(SECRET, BODY).expect("sign");
        let err = verify_signature(SECRET, b"{}", Some(&header)).unwrap_err();
        assert_eq!(err, WebhookError::InvalidSignature);
    }

    #[test]
    fn malformed_and_missing_headers() {
        assert_eq!(
            verify_signature(SECRET, BODY, None).unwrap_err(),
            WebhookError::MissingSignature
        );
        assert_eq!(
            verify_signature(SECRET, BODY, Some("sha256=zz")).unwrap_err(),
            WebhookError::InvalidSignatureFormat
        );
        assert_eq!(
            verify_signature(SECRET, BODY, Some("abcd")).unwrap_err(),
            WebhookError::InvalidSignatureFormat
        );
        assert_eq!(
            verify_signature("", BODY, Some("abcd")).unwrap_err(),
            WebhookError::MissingSecret
        );
    }
}
