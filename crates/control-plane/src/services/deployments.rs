//! Deployment orchestrator.
//!
//! All state changes are conditional updates keyed on the expected prior
//! status; the affected-row count is the "was this my transition?" signal.
//! Workers treat a false return as an instruction to abort silently, which
//! gives at most one successful build and one successful release per row no
//! matter how often the broker redelivers a task.

use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::{Deployment, DeploymentStatus};
use crate::telemetry::DEPLOYMENTS_TOTAL;

const COLUMNS: &str = "id, project_id, commit_sha, commit_message, commit_author, branch, status, \
                       image_tag, container_id, url, error_message, created_at, started_at, completed_at";

pub struct NewDeployment {
    pub project_id: Uuid,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub commit_author: Option<String>,
    pub branch: Option<String>,
}

/// Allocate a `pending` row. Called exactly once per triggering push.
pub async fn create(pool: &Pool<Postgres>, input: &NewDeployment) -> Result<Deployment, sqlx::Error> {
    sqlx::query_as::<_, Deployment>(&format!(
        "INSERT INTO deployments (project_id, commit_sha, commit_message, commit_author, branch, status)
         VALUES ($1, $2, $3, $4, $5, 'pending')
         RETURNING {COLUMNS}"
    ))
    .bind(input.project_id)
    .bind(&input.commit_sha)
    .bind(input.commit_message.as_deref())
    .bind(input.commit_author.as_deref())
    .bind(input.branch.as_deref())
    .fetch_one(pool)
    .await
}

/// Materialize a rollback: a fresh row entering the machine at `deploying`
/// with the source row's already-built image. The build phase is bypassed.
pub async fn create_redeploy(pool: &Pool<Postgres>, source: &Deployment, image_tag: &str) -> Result<Deployment, sqlx::Error> {
    sqlx::query_as::<_, Deployment>(&format!(
        "INSERT INTO deployments (project_id, commit_sha, commit_message, commit_author, branch, status, image_tag, started_at)
         VALUES ($1, $2, $3, $4, $5, 'deploying', $6, NOW())
         RETURNING {COLUMNS}"
    ))
    .bind(source.project_id)
    .bind(&source.commit_sha)
    .bind(source.commit_message.as_deref())
    .bind(source.commit_author.as_deref())
    .bind(source.branch.as_deref())
    .bind(image_tag)
    .fetch_one(pool)
    .await
}

pub async fn get(pool: &Pool<Postgres>, id: Uuid) -> Result<Deployment, sqlx::Error> {
    sqlx::query_as::<_, Deployment>(&format!("SELECT {COLUMNS} FROM deployments WHERE id = $1"))
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn list_for_project(pool: &Pool<Postgres>, project_id: Uuid, limit: i64) -> Result<Vec<Deployment>, sqlx::Error> {
    sqlx::query_as::<_, Deployment>(&format!(
        "SELECT {COLUMNS} FROM deployments WHERE project_id = $1 ORDER BY created_at DESC LIMIT $2"
    ))
    .bind(project_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn live_for_project(pool: &Pool<Postgres>, project_id: Uuid) -> Result<Option<Deployment>, sqlx::Error> {
    sqlx::query_as::<_, Deployment>(&format!(
        "SELECT {COLUMNS} FROM deployments WHERE project_id = $1 AND status = 'live' LIMIT 1"
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await
}

/// `pending -> building`, stamping the build start.
pub async fn begin_build(pool: &Pool<Postgres>, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE deployments SET status = 'building', started_at = NOW() WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `building -> deploying`, persisting the image reference.
pub async fn mark_built(pool: &Pool<Postgres>, id: Uuid, image_tag: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE deployments SET status = 'deploying', image_tag = $2 WHERE id = $1 AND status = 'building'",
    )
    .bind(id)
    .bind(image_tag)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Promotion: `deploying -> live` (persisting the container identifier and
/// public URL) plus supersession of every other `live` row of the project,
/// in one transaction. Either the promotion and all demotions commit
/// together, or the row stays `deploying` and a redelivered task redoes
/// both steps. Anything less than that atomicity can strand two `live` rows:
/// a supersede failing after a committed promotion would never be retried,
/// because redelivery bails on the no-longer-`deploying` row.
pub async fn promote(
    pool: &Pool<Postgres>,
    id: Uuid,
    project_id: Uuid,
    container_id: &str,
    url: &str,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let promoted = sqlx::query(
        "UPDATE deployments SET status = 'live', container_id = $2, url = $3, completed_at = NOW()
         WHERE id = $1 AND status = 'deploying'",
    )
    .bind(id)
    .bind(container_id)
    .bind(url)
    .execute(&mut *tx)
    .await?;
    if promoted.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }
    let demoted = sqlx::query(
        "UPDATE deployments SET status = 'superseded', completed_at = NOW()
         WHERE project_id = $1 AND status = 'live' AND id != $2",
    )
    .bind(project_id)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    let superseded = demoted.rows_affected();
    tx.commit().await?;

    DEPLOYMENTS_TOTAL.with_label_values(&["live"]).inc();
    if superseded > 0 {
        DEPLOYMENTS_TOTAL.with_label_values(&["superseded"]).inc_by(superseded);
    }
    Ok(true)
}

/// Terminal failure with a human-readable reason. Legal from any non-terminal
/// state; a no-op if the row already reached a terminal state.
pub async fn fail(pool: &Pool<Postgres>, id: Uuid, reason: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE deployments SET status = 'failed', error_message = $2, completed_at = NOW()
         WHERE id = $1 AND status IN ('pending', 'building', 'deploying')",
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await?;
    if result.rows_affected() == 1 {
        DEPLOYMENTS_TOTAL.with_label_values(&["failed"]).inc();
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Cooperative cancel: only rows the pipeline is still working on can be
/// cancelled. In-flight workers notice at their next conditional transition.
pub async fn cancel(pool: &Pool<Postgres>, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE deployments SET status = 'cancelled', completed_at = NOW()
         WHERE id = $1 AND status IN ('pending', 'building', 'deploying')",
    )
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 1 {
        DEPLOYMENTS_TOTAL.with_label_values(&["cancelled"]).inc();
        Ok(true)
    } else {
        Ok(false)
    }
}
