//! Inspect, sign and verify JSON Web Tokens.
//!
//! Signing and verification support HS256 only.

use super::{Result, ToolError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Claims annotated with a readable timestamp, and the key it is stored under.
const TIME_CLAIMS: &[(&str, &str)] = &[
    ("exp", "expiry_readable"),
    ("iat", "issued_at_readable"),
    ("nbf", "not_before_readable"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedJwt {
    pub header: Value,
    /// Payload claims plus `*_readable` annotations and `is_expired`.
    pub payload: Value,
    /// Signature segment, still encoded.
    pub signature: String,
}

impl DecodedJwt {
    /// `Some(true)` when the token carries an `exp` claim that has been reached.
    pub fn is_expired(&self) -> Option<bool> {
        self.payload.get("is_expired").and_then(Value::as_bool)
    }
}

/// Result of checking a token against a shared secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    /// The HS256 signature matches.
    pub valid: bool,
    /// The `exp` claim is at or before the check time.
    pub expired: bool,
}

/// Decode `token` using the current time for expiry.
pub fn decode(token: &str) -> Result<DecodedJwt> {
    decode_at(token, Utc::now())
}

/// Decode `token`, evaluating expiry against `now`.
///
/// A leading `Bearer ` is ignored.
pub fn decode_at(token: &str, now: DateTime<Utc>) -> Result<DecodedJwt> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

    let parts: Vec<&str> = token.split('.').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(ToolError::InvalidToken(format!(
            "expected 3 dot-separated segments, found {}",
            parts.len()
        )));
    }

    let header = decode_segment(parts[0], "header")?;
    let mut payload = decode_segment(parts[1], "payload")?;
    if let Value::Object(claims) = &mut payload {
        annotate(claims, now);
    }

    Ok(DecodedJwt {
        header,
        payload,
        signature: parts.get(2).copied().unwrap_or_default().to_string(),
    })
}

/// Sign `header` and `payload` with HS256.
pub fn encode(header: &Value, payload: &Value, secret: &str) -> Result<String> {
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    );
    let signature = mac(&signing_input, secret)?.finalize().into_bytes();
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Check the HS256 signature and expiry of `token` at the current time.
pub fn verify(token: &str, secret: &str) -> Result<Verification> {
    verify_at(token, secret, Utc::now())
}

/// Check the HS256 signature of `token` and its expiry against `now`.
///
/// A bad signature is reported through [`Verification::valid`]; only a
/// token that cannot be parsed is an error.
pub fn verify_at(token: &str, secret: &str, now: DateTime<Utc>) -> Result<Verification> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

    let parts: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = parts.as_slice() else {
        return Err(ToolError::InvalidToken(format!(
            "expected 3 dot-separated segments, found {}",
            parts.len()
        )));
    };

    let claims = decode_segment(payload, "payload")?;
    let expired = claims
        .get("exp")
        .and_then(Value::as_i64)
        .is_some_and(|exp| expired_at(exp, now));

    let valid = match URL_SAFE_NO_PAD.decode(signature.trim_end_matches('=')) {
        Ok(bytes) => mac(&format!("{header}.{payload}"), secret)?
            .verify_slice(&bytes)
            .is_ok(),
        Err(_) => false,
    };

    Ok(Verification { valid, expired })
}

fn mac(signing_input: &str, secret: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ToolError::InvalidSecret(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    Ok(mac)
}

fn expired_at(exp: i64, now: DateTime<Utc>) -> bool {
    exp <= now.timestamp()
}

fn decode_segment(segment: &str, name: &str) -> Result<Value> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| ToolError::InvalidToken(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ToolError::InvalidToken(format!("{name} is not JSON: {e}")))
}

fn annotate(claims: &mut Map<String, Value>, now: DateTime<Utc>) {
    for (claim, readable_key) in TIME_CLAIMS {
        let Some(seconds) = claims.get(*claim).and_then(Value::as_i64) else {
            continue;
        };
        if let Some(at) = DateTime::from_timestamp(seconds, 0) {
            claims.insert(
                (*readable_key).to_string(),
                Value::String(at.format(TIME_FORMAT).to_string()),
            );
        }
        if *claim == "exp" {
            claims.insert("is_expired".to_string(), Value::Bool(expired_at(seconds, now)));
        }
    }
}
