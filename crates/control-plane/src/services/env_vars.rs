//! Environment-variable store. Values are sealed before they reach this
//! module and unsealed only in [`decrypted_map`], the container-injection
//! path. Everything API-facing goes through the masked display form.

use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::EnvVar;

const COLUMNS: &str = "id, project_id, key, value_sealed, created_at";

pub async fn upsert(pool: &Pool<Postgres>, project_id: Uuid, key: &str, value_sealed: &str) -> Result<EnvVar, sqlx::Error> {
    sqlx::query_as::<_, EnvVar>(&format!(
        "INSERT INTO env_vars (project_id, key, value_sealed)
         VALUES ($1, $2, $3)
         ON CONFLICT (project_id, key) DO UPDATE SET value_sealed = EXCLUDED.value_sealed
         RETURNING {COLUMNS}"
    ))
    .bind(project_id)
    .bind(key)
    .bind(value_sealed)
    .fetch_one(pool)
    .await
}

pub async fn list(pool: &Pool<Postgres>, project_id: Uuid) -> Result<Vec<EnvVar>, sqlx::Error> {
    sqlx::query_as::<_, EnvVar>(&format!(
        "SELECT {COLUMNS} FROM env_vars WHERE project_id = $1 ORDER BY created_at ASC"
    ))
    .bind(project_id)
    .fetch_all(pool)
    .await
}

pub async fn delete(pool: &Pool<Postgres>, project_id: Uuid, key: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM env_vars WHERE project_id = $1 AND key = $2")
        .bind(project_id)
        .bind(key)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Cleartext mapping for container injection. The only place sealed values
/// are opened.
pub async fn decrypted_map(pool: &Pool<Postgres>, sealer: &seal::Sealer, project_id: Uuid) -> anyhow::Result<HashMap<String, String>> {
    let vars = list(pool, project_id).await?;
    let mut map = HashMap::with_capacity(vars.len());
    for v in vars {
        map.insert(v.key, sealer.open(&v.value_sealed)?);
    }
    Ok(map)
}
