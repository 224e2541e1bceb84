use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::auth::{expired_cookie, issue_token, session_cookie};
use crate::error::{ApiError, ApiResult};
use crate::models::User;
use crate::services::users;
use crate::{github, AppState};

/// Redirect the browser to the source host's consent page.
pub async fn github_login(State(state): State<AppState>) -> ApiResult<Redirect> {
    let cfg = &state.cfg;
    if cfg.github_client_id.is_empty() || cfg.github_redirect_uri.is_empty() {
        return Err(ApiError::internal("github oauth is not configured"));
    }
    Ok(Redirect::temporary(&github::authorize_url(&cfg.github_client_id, &cfg.github_redirect_uri)))
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
}

/// Exchange the authorization code, persist the user with a sealed access
/// token, and hand the browser a session cookie.
pub async fn github_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> ApiResult<impl IntoResponse> {
    let code = query.code.filter(|c| !c.is_empty()).ok_or_else(|| ApiError::bad_request("missing authorization code"))?;
    let pool = state.pool()?;

    let token = github::exchange_code(&state.cfg.github_client_id, &state.cfg.github_client_secret, &code)
        .await
        .map_err(|e| {
            error!(error = %e, "token exchange failed");
            ApiError::upstream("failed to exchange code for token")
        })?;
    if token.access_token.is_empty() {
        return Err(ApiError::upstream("source host returned no access token"));
    }

    let gh_user = github::Client::new(token.access_token.as_str())
        .fetch_authenticated_user()
        .await
        .map_err(|e| {
            error!(error = %e, "user fetch failed");
            ApiError::upstream("failed to fetch user from source host")
        })?;

    let sealed = state
        .sealer
        .seal(&token.access_token)
        .map_err(|_| ApiError::internal("failed to seal access token"))?;
    let user = users::upsert(pool, &gh_user, &sealed).await?;

    let session = issue_token(&state.cfg.session_secret, user.id)
        .map_err(|_| ApiError::internal("failed to issue session token"))?;
    info!(user_id = %user.id, github_username = %user.github_username, "user authenticated");

    Ok((jar.add(session_cookie(session)), Redirect::temporary(&state.cfg.dashboard_url)))
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (jar.add(expired_cookie()), Json(json!({"message": "logged out"})))
}

pub async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}
