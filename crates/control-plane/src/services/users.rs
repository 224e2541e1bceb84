use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::github::GithubUser;
use crate::models::User;

const COLUMNS: &str = "id, github_id, github_username, email, avatar_url, access_token_sealed, created_at, updated_at";

/// Upsert on the source-host identity. Runs on every successful
/// authentication; the sealed access token is refreshed each time.
pub async fn upsert(pool: &Pool<Postgres>, gh: &GithubUser, access_token_sealed: &str) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (github_id, github_username, email, avatar_url, access_token_sealed, updated_at)
         VALUES ($1, $2, $3, $4, $5, NOW())
         ON CONFLICT (github_id) DO UPDATE SET
             github_username = EXCLUDED.github_username,
             email = EXCLUDED.email,
             avatar_url = EXCLUDED.avatar_url,
             access_token_sealed = EXCLUDED.access_token_sealed,
             updated_at = NOW()
         RETURNING {COLUMNS}"
    ))
    .bind(gh.id)
    .bind(&gh.login)
    .bind(gh.email.as_deref().filter(|e| !e.is_empty()))
    .bind(gh.avatar_url.as_deref().filter(|a| !a.is_empty()))
    .bind(access_token_sealed)
    .fetch_one(pool)
    .await
}

pub async fn get_by_id(pool: &Pool<Postgres>, id: Uuid) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Decrypt the stored source-host access token for API calls on the user's
/// behalf. This is the only read path that unseals it.
pub async fn access_token(pool: &Pool<Postgres>, sealer: &seal::Sealer, user_id: Uuid) -> anyhow::Result<String> {
    let sealed: Option<String> = sqlx::query_scalar("SELECT access_token_sealed FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    let sealed = sealed.ok_or_else(|| anyhow::anyhow!("user has no access token"))?;
    Ok(sealer.open(&sealed)?)
}

pub async fn delete(pool: &Pool<Postgres>, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}
