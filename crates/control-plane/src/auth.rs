//! Session tokens and the authentication middleware.
//!
//! A session is an HS256-signed bearer carrying the user id, valid for seven
//! days, delivered as an HTTP-only SameSite=Lax cookie. The middleware loads
//! the owning user row and stores it in request extensions for handlers.

use axum::{extract::{Request, State}, middleware::Next, response::{IntoResponse, Response}};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::services::users;
use crate::AppState;

pub const COOKIE_NAME: &str = "rcnbuild_session";
const SESSION_TTL_SECS: i64 = 60 * 60 * 24 * 7;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(secret: &str, user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims { sub: user_id, iat: now, exp: now + SESSION_TTL_SECS };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

pub fn validate_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
}

pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(7))
        .build()
}

pub fn expired_cookie() -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
}

/// Middleware for session-gated routes. On an invalid or expired token the
/// cookie is cleared along with the 401.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let Some(cookie) = jar.get(COOKIE_NAME) else {
        return Err(ApiError::unauthorized("not authenticated").into_response());
    };
    let claims = match validate_token(&state.cfg.session_secret, cookie.value()) {
        Ok(c) => c,
        Err(_) => {
            let jar = jar.add(expired_cookie());
            return Err((jar, ApiError::unauthorized("invalid or expired session")).into_response());
        }
    };
    let Some(pool) = state.db.as_ref() else {
        return Err(ApiError::service_unavailable().into_response());
    };
    let user = match users::get_by_id(pool, claims.sub).await {
        Ok(u) => u,
        Err(_) => return Err(ApiError::unauthorized("user not found").into_response()),
    };
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-session-secret-test-session-secret";

    #[test]
    fn token_round_trip() {
        let id = Uuid::new_v4();
        let token = issue_token(SECRET, id).unwrap();
        let claims = validate_token(SECRET, &token).unwrap();
        assert_eq!(claims.sub, id);
        assert!(claims.exp - claims.iat == SESSION_TTL_SECS);
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = issue_token(SECRET, Uuid::new_v4()).unwrap();
        assert!(validate_token("another-secret-another-secret-12", &token).is_err());
    }

    #[test]
    fn tampered_token_rejected() {
        let mut token = issue_token(SECRET, Uuid::new_v4()).unwrap();
        token.push('x');
        assert!(validate_token(SECRET, &token).is_err());
    }

    #[test]
    fn cookie_attributes() {
        let c = session_cookie("tok".into());
        assert_eq!(c.name(), COOKIE_NAME);
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.same_site(), Some(SameSite::Lax));
    }
}
