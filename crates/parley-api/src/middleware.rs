use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parley_types::api::Claims;
use parley_types::error::ChatError;

use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header. Identity
/// issuance lives outside this system; a request without a resolvable
/// identity is Unauthenticated.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError(ChatError::Unauthenticated))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError(ChatError::Unauthenticated))?;

    let claims = decode_claims(token, &jwt_secret()).ok_or(ApiError(ChatError::Unauthenticated))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn jwt_secret() -> String {
    std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into())
}

/// Shared by the REST middleware and the WebSocket upgrade path.
pub fn decode_claims(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    fn token_for(secret: &str) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "ana".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips_claims() {
        let token = token_for("s3cret");
        let claims = decode_claims(&token, "s3cret").unwrap();
        assert_eq!(claims.username, "ana");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = token_for("s3cret");
        assert!(decode_claims(&token, "other").is_none());
    }
}
