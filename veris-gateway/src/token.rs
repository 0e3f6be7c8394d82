//! Bearer session tokens.
//!
//! HS256 JWTs assembled by hand: `base64url(header).base64url(claims)` with
//! an HMAC-SHA256 tag over the signing input. Claims snapshot the agent's
//! identity and trust attributes at mint time; the pipeline re-reads nothing
//! from the token beyond what it carries.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::crypto;

/// Tokens live 180 seconds.
pub const TOKEN_TTL_SECS: u64 = 180;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub agent_id: String,
    pub role: String,
    pub verification_level: String,
    pub risk_tier: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("jwt_expired")]
    Expired,
    #[error("jwt_invalid")]
    Invalid,
}

/// Mint a signed token for the given claims.
pub fn issue(signing_key: &str, claims: &Claims) -> anyhow::Result<String> {
    let header = json!({"alg": "HS256", "typ": "JWT"});
    let header_b64 = crypto::b64url_encode(&serde_json::to_vec(&header)?);
    let claims_b64 = crypto::b64url_encode(&serde_json::to_vec(claims)?);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let tag = crypto::mac_b64url(signing_key.as_bytes(), signing_input.as_bytes())?;
    Ok(format!("{signing_input}.{tag}"))
}

/// Verify and decode a token. The MAC is checked before any claim is
/// trusted; expiry is reported distinctly from every other defect.
pub fn decode(signing_key: &str, token: &str, now: u64) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(tag), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Invalid);
    };

    let signing_input = format!("{header_b64}.{claims_b64}");
    if !crypto::mac_verify_b64url(signing_key.as_bytes(), signing_input.as_bytes(), tag) {
        return Err(TokenError::Invalid);
    }

    let header_bytes = crypto::b64url_decode(header_b64).map_err(|_| TokenError::Invalid)?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Invalid)?;
    if header.get("alg").and_then(|v| v.as_str()) != Some("HS256") {
        return Err(TokenError::Invalid);
    }

    let claims_bytes = crypto::b64url_decode(claims_b64).map_err(|_| TokenError::Invalid)?;
    let claims: Claims = serde_json::from_slice(&claims_bytes).map_err(|_| TokenError::Invalid)?;

    if claims.exp < now {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(now: u64) -> Claims {
        Claims {
            sub: "a1".into(),
            agent_id: "a1".into(),
            role: "agent_runtime".into(),
            verification_level: "none".into(),
            risk_tier: "low".into(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        }
    }

    #[test]
    fn roundtrip() {
        let token = issue("key", &claims(1000)).unwrap();
        let decoded = decode("key", &token, 1001).unwrap();
        assert_eq!(decoded.agent_id, "a1");
        assert_eq!(decoded.role, "agent_runtime");
        assert_eq!(decoded.exp, 1000 + TOKEN_TTL_SECS);
    }

    #[test]
    fn expired_reported_distinctly() {
        let token = issue("key", &claims(1000)).unwrap();
        assert_eq!(
            decode("key", &token, 1000 + TOKEN_TTL_SECS + 1),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn wrong_key_is_invalid() {
        let token = issue("key", &claims(1000)).unwrap();
        assert_eq!(decode("other", &token, 1001), Err(TokenError::Invalid));
    }

    #[test]
    fn tampered_claims_are_invalid() {
        let token = issue("key", &claims(1000)).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = crypto::b64url_encode(
            br#"{"sub":"a1","agent_id":"a1","role":"admin","verification_level":"none","risk_tier":"low","iat":1000,"exp":9999999999}"#,
        );
        parts[1] = &forged;
        assert_eq!(
            decode("key", &parts.join("."), 1001),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(decode("key", "", 0), Err(TokenError::Invalid));
        assert_eq!(decode("key", "a.b", 0), Err(TokenError::Invalid));
        assert_eq!(decode("key", "a.b.c.d", 0), Err(TokenError::Invalid));
        assert_eq!(decode("key", "not a token at all", 0), Err(TokenError::Invalid));
    }

    #[test]
    fn expiry_checked_only_after_mac() {
        // An expired-looking token under the wrong key must read as invalid,
        // not expired, or an attacker could probe claim contents.
        let token = issue("key", &claims(0)).unwrap();
        assert_eq!(decode("other", &token, u64::MAX), Err(TokenError::Invalid));
    }
}
