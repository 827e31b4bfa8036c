//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs whose `sub` is the numeric user id. The
//! [`AuthUser`] extractor re-reads the user row on every request so that
//! deactivation and hierarchy changes take effect without re-issuing tokens.

use crate::{config::AppConfig, entities::user, errors::ServiceError, AppState};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// JWT claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Clone)]
pub struct AuthService {
    secret: String,
    issuer: String,
    expiration: ChronoDuration,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("issuer", &self.issuer)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(secret: impl Into<String>, issuer: impl Into<String>, expiration_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.into(),
            expiration: ChronoDuration::seconds(expiration_secs),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.jwt_secret.clone(),
            config.auth_issuer.clone(),
            i64::try_from(config.jwt_expiration).unwrap_or(i64::MAX / 2),
        )
    }

    /// Mint an access token for `user_id`
    pub fn issue_token(&self, user_id: i32) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.expiration).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("token creation failed: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => ServiceError::Unauthorized("token has expired".into()),
            _ => ServiceError::Unauthorized("invalid authentication token".into()),
        })
    }

    /// Resolve a token to an active user
    pub async fn authenticate<C: ConnectionTrait>(
        &self,
        db: &C,
        token: &str,
    ) -> Result<user::Model, ServiceError> {
        let claims = self.validate_token(token)?;
        let user_id: i32 = claims
            .sub
            .parse()
            .map_err(|_| ServiceError::Unauthorized("invalid token subject".into()))?;

        let user = user::Entity::find_by_id(user_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("unknown user".into()))?;
        if !user.active {
            warn!(user_id, "Rejected token for inactive user");
            return Err(ServiceError::Unauthorized("user is inactive".into()));
        }
        debug!(user_id, jti = %claims.jti, "Request authenticated");
        Ok(user)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser(pub user::Model);

impl AuthUser {
    pub fn user(&self) -> &user::Model {
        &self.0
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ServiceError::Unauthorized("authentication required".into()))?;
        let user = state.services.auth.authenticate(&*state.db, token).await?;
        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "a-test-secret-that-is-long-enough-123";

    #[test]
    fn issued_token_validates() {
        let auth = AuthService::new(SECRET, "tirecrm", 3600);
        let token = auth.issue_token(42).unwrap();
        let claims = auth.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.iss, "tirecrm");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let token = AuthService::new(SECRET, "someone-else", 3600)
            .issue_token(1)
            .unwrap();
        assert_matches!(
            AuthService::new(SECRET, "tirecrm", 3600).validate_token(&token),
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = AuthService::new(SECRET, "tirecrm", -3600);
        let token = auth.issue_token(1).unwrap();
        assert_matches!(
            auth.validate_token(&token),
            Err(ServiceError::Unauthorized(msg)) if msg.contains("expired")
        );
    }

    #[test]
    fn tampered_token_is_rejected() {
        let auth = AuthService::new(SECRET, "tirecrm", 3600);
        let other = AuthService::new("another-secret-that-is-long-enough-456", "tirecrm", 3600);
        let token = other.issue_token(1).unwrap();
        assert_matches!(auth.validate_token(&token), Err(ServiceError::Unauthorized(_)));
    }
}
