//! GitHub REST client: repo enumeration, file probes for runtime detection,
//! webhook lifecycle, and the OAuth token exchange.

use rand::RngCore;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.github.com";
const OAUTH_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_AGENT: &str = "rcnbuild/1.0";

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("github request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("github api error: {status} {body}")]
    Api { status: StatusCode, body: String },
    #[error("repository not found: {0}")]
    RepoNotFound(String),
    #[error("invalid repository full name: {0}")]
    BadRepoName(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    pub html_url: String,
    pub clone_url: String,
    pub default_branch: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Permissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    pub id: i64,
}

/// Subset of the authenticated-user response we persist.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubUser {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
}

pub struct Client {
    http: reqwest::Client,
    access_token: String,
}

impl Client {
    pub fn new(access_token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .expect("reqwest client");
        Self { http, access_token: access_token.into() }
    }

    fn get(&self, endpoint: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{API_BASE}{endpoint}"))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Repositories the user can deploy: push or admin access only.
    pub async fn list_deployable_repos(&self, page: u32, per_page: u32) -> Result<Vec<Repository>, GithubError> {
        let page = page.max(1);
        let per_page = if per_page == 0 { 30 } else { per_page.min(100) };
        let resp = self
            .get(&format!(
                "/user/repos?sort=updated&per_page={per_page}&page={page}&affiliation=owner,collaborator,organization_member"
            ))
            .send()
            .await?;
        let resp = check(resp).await?;
        let repos: Vec<Repository> = resp.json().await?;
        Ok(repos.into_iter().filter(|r| r.permissions.push || r.permissions.admin).collect())
    }

    pub async fn get_repo(&self, owner: &str, repo: &str) -> Result<Repository, GithubError> {
        let resp = self.get(&format!("/repos/{owner}/{repo}")).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(GithubError::RepoNotFound(format!("{owner}/{repo}")));
        }
        Ok(check(resp).await?.json().await?)
    }

    /// Existence probe used by runtime detection.
    pub async fn file_exists(&self, owner: &str, repo: &str, path: &str, branch: &str) -> bool {
        let mut endpoint = format!("/repos/{owner}/{repo}/contents/{path}");
        if !branch.is_empty() {
            endpoint.push_str(&format!("?ref={branch}"));
        }
        match self.get(&endpoint).send().await {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(_) => false,
        }
    }

    pub async fn create_webhook(&self, owner: &str, repo: &str, callback_url: &str, secret: &str) -> Result<Webhook, GithubError> {
        let payload = serde_json::json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": {
                "url": callback_url,
                "content_type": "json",
                "secret": secret,
                "insecure_ssl": "0",
            }
        });
        let resp = self
            .http
            .post(format!("{API_BASE}/repos/{owner}/{repo}/hooks"))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .json(&payload)
            .send()
            .await?;
        if resp.status() != StatusCode::CREATED {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GithubError::Api { status, body });
        }
        Ok(resp.json().await?)
    }

    /// Idempotent teardown: 404 means the hook is already gone.
    pub async fn delete_webhook(&self, owner: &str, repo: &str, webhook_id: i64) -> Result<(), GithubError> {
        let resp = self
            .http
            .delete(format!("{API_BASE}/repos/{owner}/{repo}/hooks/{webhook_id}"))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        match resp.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(GithubError::Api { status, body })
            }
        }
    }

    pub async fn fetch_authenticated_user(&self) -> Result<GithubUser, GithubError> {
        Ok(check(self.get("/user").send().await?).await?.json().await?)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GithubError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(GithubError::Api { status, body })
    }
}

/// Exchange an OAuth authorization code for an access token.
pub async fn exchange_code(client_id: &str, client_secret: &str, code: &str) -> Result<TokenResponse, GithubError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .expect("reqwest client");
    let resp = http
        .post(OAUTH_TOKEN_URL)
        .header("Accept", "application/json")
        .form(&[("client_id", client_id), ("client_secret", client_secret), ("code", code)])
        .send()
        .await?;
    Ok(check(resp).await?.json().await?)
}

pub fn authorize_url(client_id: &str, redirect_uri: &str) -> String {
    format!("https://github.com/login/oauth/authorize?client_id={client_id}&redirect_uri={redirect_uri}")
}

/// Per-project secret shared with the source host for signing push bodies.
pub fn generate_webhook_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Split `owner/name` into its parts.
pub fn parse_repo_full_name(full_name: &str) -> Result<(&str, &str), GithubError> {
    match full_name.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => Ok((owner, repo)),
        _ => Err(GithubError::BadRepoName(full_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_repo_full_name_accepts_owner_slash_repo() {
        assert_eq!(parse_repo_full_name("dev/app").unwrap(), ("dev", "app"));
    }

    #[test]
    fn parse_repo_full_name_rejects_malformed() {
        assert!(parse_repo_full_name("noslash").is_err());
        assert!(parse_repo_full_name("a/b/c").is_err());
        assert!(parse_repo_full_name("/repo").is_err());
        assert!(parse_repo_full_name("owner/").is_err());
    }

    #[test]
    fn webhook_secret_is_hex_of_32_bytes() {
        let s = generate_webhook_secret();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(s, generate_webhook_secret());
    }

    #[test]
    fn authorize_url_embeds_client() {
        let url = authorize_url("abc", "https://cb");
        assert!(url.contains("client_id=abc"));
        assert!(url.contains("redirect_uri=https://cb"));
    }
}
