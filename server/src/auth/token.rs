use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, GeneralPurposeConfig};
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::auth::claims::{Role, TokenClaims};

type HmacSha256 = Hmac<Sha256>;

/// URL-safe base64 for token segments. Encodes without padding, accepts
/// segments with or without it.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Why a token was refused. Callers must surface all three identically to
/// the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("malformed token")]
    MalformedToken,
    #[error("token signature mismatch")]
    SignatureMismatch,
    #[error("token expired")]
    Expired,
}

/// `sub` as minted by the web application is a JSON integer, but some
/// issuers stringify it.
#[derive(Deserialize)]
#[serde(untagged)]
enum Subject {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
struct PayloadClaims {
    sub: Subject,
    role: String,
    exp: i64,
}

#[derive(Serialize)]
struct IssuedClaims<'a> {
    sub: i64,
    role: &'a str,
    iat: i64,
    exp: i64,
}

/// Verify a client token against the signing secret at the current time.
pub fn verify(token: &str, secret: &[u8]) -> Result<TokenClaims, AuthError> {
    verify_at(token, secret, Utc::now().timestamp())
}

/// Verify a client token as of `now` (seconds since epoch).
///
/// Checks, in order: three non-empty segments, JSON-object header and
/// payload, HMAC-SHA256 over the literal `header.payload`, expiry, then
/// claim shapes.
pub fn verify_at(token: &str, secret: &[u8], now: i64) -> Result<TokenClaims, AuthError> {
    let mut segments = token.split('.');
    let (header, payload, signature) = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => {
            (h, p, s)
        }
        _ => return Err(AuthError::MalformedToken),
    };

    let header_json = decode_object(header)?;
    if let Some(alg) = header_json.get("alg") {
        if alg.as_str() != Some("HS256") {
            return Err(AuthError::MalformedToken);
        }
    }
    let payload_json = decode_object(payload)?;

    let signature = SEGMENT_ENGINE
        .decode(signature)
        .map_err(|_| AuthError::SignatureMismatch)?;
    let signing_input = &token[..header.len() + 1 + payload.len()];

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| AuthError::SignatureMismatch)?;
    mac.update(signing_input.as_bytes());
    // verify_slice compares in constant time
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::SignatureMismatch)?;

    let claims: PayloadClaims = serde_json::from_value(Value::Object(payload_json))
        .map_err(|_| AuthError::MalformedToken)?;

    if now > claims.exp {
        return Err(AuthError::Expired);
    }

    let user_id = match claims.sub {
        Subject::Number(id) => id,
        Subject::Text(text) => text.trim().parse().map_err(|_| AuthError::MalformedToken)?,
    };
    if user_id <= 0 {
        return Err(AuthError::MalformedToken);
    }

    Ok(TokenClaims {
        user_id,
        role: Role::from(claims.role),
        expires_at: claims.exp,
    })
}

fn decode_object(segment: &str) -> Result<Map<String, Value>, AuthError> {
    let bytes = SEGMENT_ENGINE
        .decode(segment)
        .map_err(|_| AuthError::MalformedToken)?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(AuthError::MalformedToken),
    }
}

/// Issue a token with the same claims the web application mints
/// (`sub`, `role`, `iat`, `exp`), valid for `ttl_secs`.
pub fn issue_token(
    secret: &[u8],
    user_id: i64,
    role: &Role,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    issue_token_expiring_at(secret, user_id, role, now, now + ttl_secs)
}

/// Issue a token with explicit `iat`/`exp` timestamps.
pub fn issue_token_expiring_at(
    secret: &[u8],
    user_id: i64,
    role: &Role,
    issued_at: i64,
    expires_at: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = IssuedClaims {
        sub: user_id,
        role: role.as_str(),
        iat: issued_at,
        exp: expires_at,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}
