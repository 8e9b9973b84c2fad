//! PayU notification signature
//!
//! Notifications carry `OpenPayu-Signature:
//! sender=<pos>;signature=<hex>;algorithm=SHA-256;content=DOCUMENT` where the
//! signature is the hex SHA-256 of the raw body followed by the second key.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::payments::error::{PaymentError, PaymentResult};

pub const SIGNATURE_HEADER: &str = "openpayu-signature";

/// Parsed `OpenPayu-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub sender: Option<String>,
    pub signature: String,
    pub algorithm: String,
}

impl SignatureHeader {
    pub fn parse(value: &str) -> PaymentResult<Self> {
        let mut sender = None;
        let mut signature = None;
        let mut algorithm = None;

        for part in value.split(';') {
            let (key, val) = match part.split_once('=') {
                Some((key, val)) => (key.trim(), val.trim()),
                None => continue,
            };
            match key {
                "sender" => sender = Some(val.to_string()),
                "signature" => signature = Some(val.to_string()),
                "algorithm" => algorithm = Some(val.to_string()),
                _ => {}
            }
        }

        let signature = signature.ok_or_else(|| {
            PaymentError::credentials("Signature header carries no signature", None)
        })?;

        Ok(Self {
            sender,
            signature,
            // PayU's documented default
            algorithm: algorithm.unwrap_or_else(|| "MD5".to_string()),
        })
    }
}

/// `hex(sha256(body || second_key))`
pub fn sign(body: &[u8], second_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(second_key.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check a notification body against its `OpenPayu-Signature` header value
pub fn verify(body: &[u8], header: Option<&str>, second_key: &str) -> PaymentResult<()> {
    let header = header
        .ok_or_else(|| PaymentError::credentials("Missing OpenPayu-Signature header", None))?;
    let parsed = SignatureHeader::parse(header)?;

    let algorithm = parsed.algorithm.to_ascii_uppercase().replace('-', "");
    if algorithm != "SHA256" {
        warn!("Rejecting PayU notification signed with {}", parsed.algorithm);
        return Err(PaymentError::credentials(
            format!("Unsupported signature algorithm: {}", parsed.algorithm),
            None,
        ));
    }

    let expected = sign(body, second_key);
    if !constant_time_eq(&expected, &parsed.signature.to_ascii_lowercase()) {
        warn!(
            "PayU notification signature mismatch (sender={:?})",
            parsed.sender
        );
        return Err(PaymentError::credentials("Invalid notification signature", None));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND_KEY: &str = "b6ca15b0d1020e8094d9b5f8d163db54";

    fn header_for(body: &[u8]) -> String {
        format!(
            "sender=checkout;signature={};algorithm=SHA-256;content=DOCUMENT",
            sign(body, SECOND_KEY)
        )
    }

    #[test]
    fn test_parse_header() {
        let parsed =
            SignatureHeader::parse("sender=checkout;signature=abc;algorithm=SHA-256;content=DOCUMENT")
                .unwrap();
        assert_eq!(parsed.sender.as_deref(), Some("checkout"));
        assert_eq!(parsed.signature, "abc");
        assert_eq!(parsed.algorithm, "SHA-256");

        assert!(SignatureHeader::parse("sender=checkout;algorithm=SHA-256").is_err());
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"order":{"orderId":"X"}}"#;
        assert!(verify(body, Some(&header_for(body)), SECOND_KEY).is_ok());
    }

    #[test]
    fn test_tampered_body() {
        let body = br#"{"order":{"orderId":"X"}}"#;
        let header = header_for(body);
        let err = verify(br#"{"order":{"orderId":"Y"}}"#, Some(&header), SECOND_KEY).unwrap_err();
        assert!(matches!(err, PaymentError::Credentials { .. }));
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            verify(b"{}", None, SECOND_KEY),
            Err(PaymentError::Credentials { .. })
        ));
    }

    #[test]
    fn test_other_algorithms_rejected() {
        let body = b"{}";
        let header = format!("signature={};algorithm=MD5", sign(body, SECOND_KEY));
        assert!(verify(body, Some(&header), SECOND_KEY).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abcd", "abcd"));
        assert!(!constant_time_eq("abcd", "abce"));
        assert!(!constant_time_eq("abcd", "abc"));
    }
}
