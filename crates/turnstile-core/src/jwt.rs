//! JWT decoding
//!
//! Signatures are verified by the service; the client only reads claims.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::Value;
use thiserror::Error;

/// URL-safe base64 that accepts both padded and unpadded input
pub(crate) const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token must have three parts, found {0}")]
    WrongPartCount(usize),

    #[error("Invalid base64 in token: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid JSON in token: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a JWT and return its payload claims.
///
/// The header must decode too, but its content is ignored.
pub fn decode_jwt(token: &str) -> Result<Value, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(JwtError::WrongPartCount(parts.len()));
    }

    let _header: Value = serde_json::from_slice(&BASE64_URL.decode(parts[0])?)?;
    let payload: Value = serde_json::from_slice(&BASE64_URL.decode(parts[1])?)?;
    Ok(payload)
}

/// Base64url-encode a JSON value without padding
pub fn encode_json_base64url(value: &Value) -> String {
    BASE64_URL.encode(value.to_string())
}

/// Build an unsigned token around `claims`. Only useful for tests and demos.
pub fn encode_unsigned_jwt(claims: &Value) -> String {
    let header = serde_json::json!({"alg": "none", "typ": "JWT"});
    format!(
        "{}.{}.sig",
        encode_json_base64url(&header),
        encode_json_base64url(claims)
    )
}
