//! HS256 bearer tokens for the login exchange.
//!
//! A token carries the key id, name, and permissions, and expires 30 minutes
//! after issue by default. Structure is standard JWT: three base64url
//! segments, the last being an HMAC-SHA256 over the first two.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{FindexError, Result};
use super::keys::{KeyInfo, Permission};

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime in seconds (30 minutes).
pub const TOKEN_TTL_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Key id the token was exchanged for
    pub sub: String,
    /// Key name, for logs
    pub name: String,
    pub permissions: Vec<Permission>,
    /// Unix seconds expiry
    pub exp: i64,
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

fn sign(secret: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Mint a token for a validated key.
pub fn issue(secret: &[u8], key: &KeyInfo, ttl_secs: i64) -> Result<String> {
    let header = Header { alg: "HS256", typ: "JWT" };
    let claims = Claims {
        sub: key.id.clone(),
        name: key.name.clone(),
        permissions: key.permissions.clone(),
        exp: Utc::now().timestamp() + ttl_secs,
    };

    let header_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&header).map_err(|e| FindexError::Internal(e.to_string()))?,
    );
    let claims_b64 = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&claims).map_err(|e| FindexError::Internal(e.to_string()))?,
    );

    let message = format!("{}.{}", header_b64, claims_b64);
    let signature = URL_SAFE_NO_PAD.encode(sign(secret, message.as_bytes()));

    Ok(format!("{}.{}", message, signature))
}

/// Verify a token's signature and expiry, returning its claims.
pub fn verify(secret: &[u8], token: &str) -> Result<Claims> {
    let mut parts = token.splitn(3, '.');
    let (header_b64, claims_b64, signature_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s)) => (h, c, s),
        _ => return Err(FindexError::Unauthenticated("malformed token".to_string())),
    };

    let message = format!("{}.{}", header_b64, claims_b64);
    let expected = sign(secret, message.as_bytes());
    let presented = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| FindexError::Unauthenticated("malformed token signature".to_string()))?;

    // Constant-time comparison via the Mac verify API
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(message.as_bytes());
    if mac.verify_slice(&presented).is_err() || expected.len() != presented.len() {
        return Err(FindexError::Unauthenticated("invalid token signature".to_string()));
    }

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .map_err(|_| FindexError::Unauthenticated("malformed token claims".to_string()))?;
    let claims: Claims = serde_json::from_slice(&claims_bytes)
        .map_err(|_| FindexError::Unauthenticated("malformed token claims".to_string()))?;

    if claims.exp < Utc::now().timestamp() {
        return Err(FindexError::Forbidden("token has expired".to_string()));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_info() -> KeyInfo {
        KeyInfo {
            id: "key-1".to_string(),
            name: "ci".to_string(),
            description: None,
            created_at: Utc::now().to_rfc3339(),
            expires_at: None,
            permissions: vec![Permission::Search, Permission::Read],
            active: true,
        }
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let secret = b"test-secret";
        let token = issue(secret, &key_info(), TOKEN_TTL_SECS).unwrap();
        assert_eq!(token.matches('.').count(), 2);

        let claims = verify(secret, &token).unwrap();
        assert_eq!(claims.sub, "key-1");
        assert_eq!(claims.name, "ci");
        assert_eq!(claims.permissions, vec![Permission::Search, Permission::Read]);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue(b"secret-a", &key_info(), TOKEN_TTL_SECS).unwrap();
        let err = verify(b"secret-b", &token).unwrap_err();
        assert!(matches!(err, FindexError::Unauthenticated(_)));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let secret = b"test-secret";
        let token = issue(secret, &key_info(), TOKEN_TTL_SECS).unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_claims = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "sub": "key-1",
                "name": "ci",
                "permissions": ["admin"],
                "exp": Utc::now().timestamp() + 9999
            })
            .to_string(),
        );
        let forged = format!("{}.{}.{}", parts.remove(0), forged_claims, parts.pop().unwrap());

        assert!(verify(secret, &forged).is_err());
    }

    #[test]
    fn test_expired_token_forbidden() {
        let secret = b"test-secret";
        let token = issue(secret, &key_info(), -10).unwrap();
        let err = verify(secret, &token).unwrap_err();
        assert!(matches!(err, FindexError::Forbidden(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(verify(b"s", "not-a-token").is_err());
        assert!(verify(b"s", "a.b").is_err());
        assert!(verify(b"s", "a.b.c").is_err());
    }
}
