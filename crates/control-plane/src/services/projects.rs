use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::Project;

const COLUMNS: &str = "id, user_id, name, slug, repo_full_name, repo_url, branch, root_directory, \
                       build_command, start_command, runtime, port, webhook_id, webhook_secret_sealed, \
                       created_at, updated_at";

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new("^[a-z][a-z0-9-]{0,49}$").unwrap());
static ENV_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new("^[A-Za-z][A-Za-z0-9_]{0,254}$").unwrap());

/// How many random-suffix retries the slug allocator gets before giving up.
const SLUG_RETRY_BUDGET: usize = 5;

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG_RE.is_match(slug)
}

pub fn is_valid_env_key(key: &str) -> bool {
    ENV_KEY_RE.is_match(key)
}

/// Derive a slug candidate from a display name: lowercase, non-[a-z0-9-]
/// replaced with `-`, runs collapsed, edges trimmed, truncated to 50.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.chars() {
        let mapped = match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9') => Some(c),
            _ => None,
        };
        match mapped {
            Some(c) => {
                out.push(c);
                last_dash = false;
            }
            None if !last_dash && !out.is_empty() => {
                out.push('-');
                last_dash = true;
            }
            None => {}
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.truncate(50);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Four characters of `[a-z0-9]` from the OS RNG.
pub fn random_suffix() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rngs::OsRng;
    (0..4).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect()
}

pub struct NewProject {
    pub user_id: Uuid,
    pub name: String,
    pub slug: String,
    pub repo_full_name: String,
    pub repo_url: String,
    pub branch: String,
    pub root_directory: String,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub runtime: Option<String>,
    pub port: i32,
}

#[derive(Debug, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub branch: Option<String>,
    pub root_directory: Option<String>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub runtime: Option<String>,
    pub port: Option<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateProjectError {
    #[error("project for this repo already exists")]
    RepoTaken,
    #[error("could not allocate a unique slug")]
    SlugExhausted,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Insert a project, serializing slug allocation through the store's unique
/// index: on a slug collision a fresh random suffix is appended and the
/// insert retried, up to a bounded budget.
pub async fn create(pool: &Pool<Postgres>, input: &NewProject) -> Result<Project, CreateProjectError> {
    let base = input.slug.clone();
    let mut slug = base.clone();
    for _ in 0..SLUG_RETRY_BUDGET {
        let attempt = sqlx::query_as::<_, Project>(&format!(
            "INSERT INTO projects (user_id, name, slug, repo_full_name, repo_url, branch,
                                   root_directory, build_command, start_command, runtime, port)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {COLUMNS}"
        ))
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&slug)
        .bind(&input.repo_full_name)
        .bind(&input.repo_url)
        .bind(&input.branch)
        .bind(&input.root_directory)
        .bind(input.build_command.as_deref())
        .bind(input.start_command.as_deref())
        .bind(input.runtime.as_deref())
        .bind(input.port)
        .fetch_one(pool)
        .await;

        match attempt {
            Ok(project) => return Ok(project),
            Err(e) => {
                let constraint = e
                    .as_database_error()
                    .filter(|d| d.code().as_deref() == Some("23505"))
                    .and_then(|d| d.constraint().map(str::to_string));
                match constraint.as_deref() {
                    Some("projects_repo_full_name_key") => return Err(CreateProjectError::RepoTaken),
                    Some("projects_slug_key") => {
                        let mut candidate = base.clone();
                        candidate.truncate(45);
                        slug = format!("{}-{}", candidate.trim_end_matches('-'), random_suffix());
                    }
                    _ => return Err(CreateProjectError::Db(e)),
                }
            }
        }
    }
    Err(CreateProjectError::SlugExhausted)
}

pub async fn get_by_id(pool: &Pool<Postgres>, id: Uuid) -> Result<Project, sqlx::Error> {
    sqlx::query_as::<_, Project>(&format!("SELECT {COLUMNS} FROM projects WHERE id = $1"))
        .bind(id)
        .fetch_one(pool)
        .await
}

pub async fn get_by_repo_full_name(pool: &Pool<Postgres>, repo_full_name: &str) -> Result<Option<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(&format!("SELECT {COLUMNS} FROM projects WHERE repo_full_name = $1"))
        .bind(repo_full_name)
        .fetch_optional(pool)
        .await
}

pub async fn list_by_user(pool: &Pool<Postgres>, user_id: Uuid) -> Result<Vec<Project>, sqlx::Error> {
    sqlx::query_as::<_, Project>(&format!(
        "SELECT {COLUMNS} FROM projects WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn update(pool: &Pool<Postgres>, id: Uuid, patch: &ProjectPatch) -> Result<Project, sqlx::Error> {
    sqlx::query_as::<_, Project>(&format!(
        "UPDATE projects SET
             name = COALESCE($2, name),
             branch = COALESCE($3, branch),
             root_directory = COALESCE($4, root_directory),
             build_command = COALESCE($5, build_command),
             start_command = COALESCE($6, start_command),
             runtime = COALESCE($7, runtime),
             port = COALESCE($8, port),
             updated_at = NOW()
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(patch.name.as_deref())
    .bind(patch.branch.as_deref())
    .bind(patch.root_directory.as_deref())
    .bind(patch.build_command.as_deref())
    .bind(patch.start_command.as_deref())
    .bind(patch.runtime.as_deref())
    .bind(patch.port)
    .fetch_one(pool)
    .await
}

/// The webhook identifier and sealed secret are set together.
pub async fn set_webhook(pool: &Pool<Postgres>, id: Uuid, webhook_id: i64, secret_sealed: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE projects SET webhook_id = $2, webhook_secret_sealed = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(webhook_id)
    .bind(secret_sealed)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Deployments and env vars go with the project via cascading FKs.
pub async fn delete(pool: &Pool<Postgres>, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("My Cool App"), "my-cool-app");
        assert_eq!(slugify("hello_world"), "hello-world");
        assert_eq!(slugify("App!!Name"), "app-name");
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("--weird---name--"), "weird-name");
        assert_eq!(slugify("...a...b..."), "a-b");
    }

    #[test]
    fn slugify_truncates_to_fifty() {
        let long = "x".repeat(80);
        let slug = slugify(&long);
        assert_eq!(slug.len(), 50);
        assert!(is_valid_slug(&slug));
    }

    #[test]
    fn slug_pattern() {
        assert!(is_valid_slug("app"));
        assert!(is_valid_slug("my-app-2"));
        assert!(!is_valid_slug("2app"));
        assert!(!is_valid_slug("-app"));
        assert!(!is_valid_slug("App"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug(&"a".repeat(51)));
        assert!(is_valid_slug(&"a".repeat(50)));
    }

    #[test]
    fn env_key_pattern() {
        assert!(is_valid_env_key("API_KEY"));
        assert!(is_valid_env_key("a1_b2"));
        assert!(!is_valid_env_key("1KEY"));
        assert!(!is_valid_env_key("_KEY"));
        assert!(!is_valid_env_key("BAD-KEY"));
        assert!(!is_valid_env_key(""));
        assert!(is_valid_env_key(&format!("A{}", "a".repeat(254))));
        assert!(!is_valid_env_key(&format!("A{}", "a".repeat(255))));
    }

    #[test]
    fn random_suffix_shape() {
        let s = random_suffix();
        assert_eq!(s.len(), 4);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn suffixed_slugs_stay_valid() {
        let long = slugify(&"y".repeat(60));
        let mut candidate = long.clone();
        candidate.truncate(45);
        let suffixed = format!("{}-{}", candidate.trim_end_matches('-'), random_suffix());
        assert!(is_valid_slug(&suffixed), "{suffixed}");
    }
}
