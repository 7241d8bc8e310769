//! Minimal bearer-token authentication. Identity management (login, OTP,
//! password reset) lives in a separate system; the core only needs an
//! authenticated actor id plus a role.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::AppConfig, errors::ServiceError, AppState};

pub const ROLE_SHOPPER: &str = "shopper";
pub const ROLE_OPERATOR: &str = "operator";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// Authenticated caller, extracted from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_operator(&self) -> bool {
        self.role == ROLE_OPERATOR
    }

    pub fn require_operator(&self) -> Result<(), ServiceError> {
        if self.is_operator() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "operator role required".to_string(),
            ))
        }
    }
}

/// Issues a signed token for the given actor. Used by tests and ops tooling;
/// production tokens come from the identity service, which shares the secret.
pub fn issue_token(cfg: &AppConfig, actor_id: Uuid, role: &str) -> Result<String, ServiceError> {
    let claims = Claims {
        sub: actor_id.to_string(),
        role: role.to_string(),
        exp: (Utc::now().timestamp() as usize) + cfg.jwt_expiration_secs as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("failed to sign token: {}", e)))
}

pub fn verify_token(cfg: &AppConfig, token: &str) -> Result<AuthUser, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))?;

    let id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| ServiceError::Unauthorized("invalid token subject".to_string()))?;

    Ok(AuthUser {
        id,
        role: data.claims.role,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("malformed authorization header".to_string()))?;

        verify_token(&state.config, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:",
            "test_secret_key_for_testing_purposes_only",
            "whsec_test",
            "127.0.0.1",
            18080,
            "test",
        )
    }

    #[test]
    fn token_round_trip() {
        let cfg = test_config();
        let id = Uuid::new_v4();
        let token = issue_token(&cfg, id, ROLE_OPERATOR).unwrap();
        let user = verify_token(&cfg, &token).unwrap();
        assert_eq!(user.id, id);
        assert!(user.is_operator());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let cfg = test_config();
        let token = issue_token(&cfg, Uuid::new_v4(), ROLE_SHOPPER).unwrap();
        let mut forged = token.clone();
        forged.push('x');
        assert!(verify_token(&cfg, &forged).is_err());
    }

    #[test]
    fn shopper_cannot_pass_operator_gate() {
        let user = AuthUser {
            id: Uuid::new_v4(),
            role: ROLE_SHOPPER.to_string(),
        };
        assert!(user.require_operator().is_err());
    }
}
