use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

/// Bearer token lifetime in seconds (24 hours).
const TOKEN_TTL_SECS: i64 = 86_400;

/// Claims carried in a bearer token.
/// `username` is optional on the decode side so that a structurally valid
/// token without the claim is reported as MissingClaim, not MalformedToken.
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    iat: i64,
    exp: i64,
}

/// Load or generate the token signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        // Invalid key file — regenerate
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Mint a bearer token for a username. HS256, 24-hour expiry.
///
/// Issuance is the collaborator surface used by the login route; the
/// real-time core only ever verifies.
pub fn issue_token(secret: &[u8], username: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = TokenClaims {
        username: Some(username.to_string()),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Verify a presented bearer token and extract the claimed username.
///
/// Checks signature integrity and expiry against the process-wide secret.
/// Stateless and synchronous — safe to call from any task without
/// coordination. Does NOT confirm the username corresponds to a real
/// account; that is the resolver's job.
pub fn verify_token(secret: &[u8], token: &str) -> Result<String, AuthError> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<TokenClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|_| AuthError::MalformedToken)?;
    data.claims.username.ok_or(AuthError::MissingClaim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Vec<u8> {
        vec![7u8; 32]
    }

    #[test]
    fn issue_then_verify_roundtrip() {
        let token = issue_token(&secret(), "alice").unwrap();
        let username = verify_token(&secret(), &token).unwrap();
        assert_eq!(username, "alice");
    }

    #[test]
    fn garbage_token_is_malformed() {
        let err = verify_token(&secret(), "not-a-jwt").unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken));
    }

    #[test]
    fn wrong_secret_is_malformed() {
        let token = issue_token(&secret(), "alice").unwrap();
        let err = verify_token(&[9u8; 32], &token).unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken));
    }

    #[test]
    fn expired_token_is_refused() {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            username: Some("alice".to_string()),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&secret()),
        )
        .unwrap();

        let err = verify_token(&secret(), &token).unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken));
    }

    #[test]
    fn token_without_username_claim_is_missing_claim() {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            username: None,
            iat: now,
            exp: now + 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&secret()),
        )
        .unwrap();

        let err = verify_token(&secret(), &token).unwrap_err();
        assert!(matches!(err, AuthError::MissingClaim));
    }
}
