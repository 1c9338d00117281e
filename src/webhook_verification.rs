//! # Webhook Secret Verification
//!
//! Inbound tracker webhooks prove their origin either with the shared secret in
//! the `secret` query parameter, or with an HMAC-SHA256 of the body in
//! `X-Hub-Signature: sha256=<hex>`. Both checks compare in constant time.

use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

pub const HUB_SIGNATURE_HEADER: &str = "x-hub-signature";
const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during webhook verification
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Missing webhook secret or signature")]
    MissingSignature,

    #[error("Invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: String },

    #[error("Webhook secret did not match")]
    SecretMismatch,

    #[error("Signature verification failed")]
    VerificationFailed,
}

impl VerificationError {
    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerificationError::SecretMismatch => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// Compares the `secret` query parameter with the configured secret.
pub fn verify_query_secret(provided: &str, expected: &str) -> VerificationResult<()> {
    if provided.is_empty() {
        return Err(VerificationError::MissingSignature);
    }
    if ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(VerificationError::SecretMismatch)
    }
}

/// Verifies an `X-Hub-Signature: sha256=<hex>` HMAC of the raw body.
pub fn verify_hub_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
) -> VerificationResult<()> {
    debug!(body_size = body.len(), "Verifying webhook body signature");

    let provided_hex = signature_header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| VerificationError::InvalidSignatureFormat {
            reason: "X-Hub-Signature must start with 'sha256='".to_string(),
        })?;
    let provided = hex::decode(provided_hex).map_err(|_| {
        VerificationError::InvalidSignatureFormat {
            reason: "X-Hub-Signature contains invalid hex".to_string(),
        }
    })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let expected: &[u8] = expected.as_ref();
    if ConstantTimeEq::ct_eq(expected, &provided[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Accepts the request when either proof matches `secret`. The query secret
/// takes precedence when both are present.
pub fn verify_webhook(
    query_secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
) -> VerificationResult<()> {
    if let Some(provided) = query_secret.filter(|s| !s.is_empty()) {
        return verify_query_secret(provided, secret);
    }

    match headers
        .get(HUB_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(signature) => verify_hub_signature(body, signature, secret),
        None => Err(VerificationError::MissingSignature),
    }
}

/// `sha256=<hex>` signature of `body`, as a sender would compute it.
pub fn sign_body(body: &[u8], secret: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}
