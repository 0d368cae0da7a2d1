use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::handlers::routes::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

/// Authenticated publisher id, inserted into request extensions by [`auth`].
#[derive(Debug, Clone)]
pub struct UserId(pub String);

#[derive(Clone)]
pub struct JwtConfig {
    pub jwt_secret: String,
    pub maxage: Duration,
}

impl JwtConfig {
    pub fn new(jwt_secret: impl Into<String>, maxage: Duration) -> Self {
        Self { jwt_secret: jwt_secret.into(), maxage }
    }

    pub fn issue(&self, sub: &str) -> jsonwebtoken::errors::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = TokenClaims {
            sub: sub.to_string(),
            iat: now,
            exp: now + self.maxage.as_secs() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_ref()),
        )
    }

    pub fn verify(&self, token: &str) -> jsonwebtoken::errors::Result<TokenClaims> {
        decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_ref()),
            &Validation::default(),
        )
        .map(|data| data.claims)
    }
}

pub async fn auth<B>(
    State(state): State<Arc<AppState>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let token = req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|auth_header| auth_header.to_str().ok())
        .and_then(|auth_value| auth_value.strip_prefix("Bearer ").map(str::to_owned));

    let token = token.ok_or_else(|| {
        let json_error = ErrorResponse {
            status: "fail",
            message: "Not authenticated".to_string(),
        };
        (StatusCode::UNAUTHORIZED, Json(json_error))
    })?;

    let claims = state.jwt.verify(&token).map_err(|e| {
        debug!("Rejected token: {}", e);
        let json_error = ErrorResponse {
            status: "fail",
            message: "Invalid token".to_string(),
        };
        (StatusCode::UNAUTHORIZED, Json(json_error))
    })?;

    req.extensions_mut().insert(UserId(claims.sub));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_with_same_secret_only() {
        let config = JwtConfig::new("s3cret", Duration::from_secs(60));
        let token = config.issue("bus-1").unwrap();

        let claims = config.verify(&token).unwrap();
        assert_eq!(claims.sub, "bus-1");
        assert!(claims.exp > claims.iat);

        let other = JwtConfig::new("other", Duration::from_secs(60));
        assert!(other.verify(&token).is_err());
    }
}
