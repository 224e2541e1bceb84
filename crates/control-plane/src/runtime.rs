//! Ordered runtime detection and Dockerfile synthesis.
//!
//! Detection walks a fixed probe list against a [`FileProbe`]: the GitHub
//! contents API at project-creation time, the cloned working directory in the
//! build worker. First match wins.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Nodejs,
    Python,
    Go,
    Static,
    Docker,
    Unknown,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nodejs => "nodejs",
            Self::Python => "python",
            Self::Go => "go",
            Self::Static => "static",
            Self::Docker => "docker",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "nodejs" => Self::Nodejs,
            "python" => Self::Python,
            "go" => Self::Go,
            "static" => Self::Static,
            "docker" => Self::Docker,
            _ => Self::Unknown,
        }
    }
}

/// Detected runtime plus suggested commands and listen port.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RuntimeProfile {
    pub runtime: Runtime,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub port: i32,
}

impl RuntimeProfile {
    fn bare(runtime: Runtime, port: i32) -> Self {
        Self { runtime, build_command: None, start_command: None, port }
    }

    fn with_commands(runtime: Runtime, build: &str, start: &str, port: i32) -> Self {
        Self { runtime, build_command: Some(build.into()), start_command: Some(start.into()), port }
    }
}

/// File-existence probe over a repository root (or subdirectory).
#[async_trait]
pub trait FileProbe: Send + Sync {
    async fn exists(&self, path: &str) -> bool;
}

/// Probe over a local checkout, used by the build worker.
pub struct LocalProbe {
    root: PathBuf,
}

impl LocalProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileProbe for LocalProbe {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.root.join(path)).await.unwrap_or(false)
    }
}

/// Probe over the source host's contents API, used at project creation.
pub struct RepoProbe<'a> {
    client: &'a crate::github::Client,
    owner: &'a str,
    repo: &'a str,
    branch: &'a str,
    root: &'a str,
}

impl<'a> RepoProbe<'a> {
    pub fn new(client: &'a crate::github::Client, owner: &'a str, repo: &'a str, branch: &'a str, root: &'a str) -> Self {
        Self { client, owner, repo, branch, root }
    }

    fn join(&self, file: &str) -> String {
        let root = self.root.trim_matches('/');
        if root.is_empty() || root == "." {
            file.to_string()
        } else {
            format!("{root}/{file}")
        }
    }
}

#[async_trait]
impl FileProbe for RepoProbe<'_> {
    async fn exists(&self, path: &str) -> bool {
        self.client.file_exists(self.owner, self.repo, &self.join(path), self.branch).await
    }
}

/// Ordered detection; the first probe hit decides the runtime.
pub async fn detect(probe: &dyn FileProbe) -> RuntimeProfile {
    if probe.exists("Dockerfile").await {
        return RuntimeProfile::bare(Runtime::Docker, 3000);
    }
    if probe.exists("package.json").await {
        return detect_nodejs(probe).await;
    }
    if probe.exists("requirements.txt").await {
        return RuntimeProfile::with_commands(Runtime::Python, "pip install -r requirements.txt", "python app.py", 8000);
    }
    if probe.exists("pyproject.toml").await {
        return RuntimeProfile::with_commands(Runtime::Python, "pip install .", "python -m app", 8000);
    }
    if probe.exists("Pipfile").await {
        return RuntimeProfile::with_commands(Runtime::Python, "pipenv install", "pipenv run python app.py", 8000);
    }
    if probe.exists("go.mod").await {
        return RuntimeProfile::with_commands(Runtime::Go, "go build -o app .", "./app", 8080);
    }
    if probe.exists("index.html").await {
        return RuntimeProfile::bare(Runtime::Static, 80);
    }
    RuntimeProfile::bare(Runtime::Unknown, 3000)
}

/// Node.js secondary probes: lockfile selects the package manager, framework
/// config overrides the commands.
async fn detect_nodejs(probe: &dyn FileProbe) -> RuntimeProfile {
    let (pm, run) = if probe.exists("pnpm-lock.yaml").await {
        ("pnpm", "pnpm")
    } else if probe.exists("yarn.lock").await {
        ("yarn", "yarn")
    } else if probe.exists("bun.lockb").await {
        ("bun", "bun run")
    } else {
        ("npm", "npm run")
    };

    for f in ["next.config.js", "next.config.mjs", "next.config.ts"] {
        if probe.exists(f).await {
            return RuntimeProfile::with_commands(
                Runtime::Nodejs,
                &format!("{pm} install && {run} build"),
                &format!("{run} start"),
                3000,
            );
        }
    }
    for f in ["vite.config.js", "vite.config.ts"] {
        if probe.exists(f).await {
            return RuntimeProfile::with_commands(
                Runtime::Nodejs,
                &format!("{pm} install && {run} build"),
                &format!("{run} preview"),
                4173,
            );
        }
    }

    RuntimeProfile::with_commands(Runtime::Nodejs, &format!("{pm} install"), &format!("{run} start"), 3000)
}

/// Synthesize a Dockerfile for projects that do not ship one. Start commands
/// run under `sh -c` so multi-word commands work.
pub fn dockerfile_for(runtime: Runtime, build_command: Option<&str>, start_command: Option<&str>, port: i32) -> Option<String> {
    let build = build_command.unwrap_or_default();
    let start = start_command.unwrap_or_default();
    match runtime {
        Runtime::Nodejs => Some(format!(
            "FROM node:20-alpine AS builder\n\
             WORKDIR /app\n\
             COPY . .\n\
             RUN {build}\n\
             \n\
             FROM node:20-alpine\n\
             WORKDIR /app\n\
             COPY --from=builder /app .\n\
             EXPOSE {port}\n\
             CMD [\"sh\", \"-c\", \"{start}\"]\n"
        )),
        Runtime::Python => Some(format!(
            "FROM python:3.11-slim\n\
             WORKDIR /app\n\
             COPY . .\n\
             RUN {build}\n\
             EXPOSE {port}\n\
             CMD [\"sh\", \"-c\", \"{start}\"]\n"
        )),
        Runtime::Go => Some(format!(
            "FROM golang:1.22-alpine AS builder\n\
             WORKDIR /app\n\
             COPY go.mod ./\n\
             RUN go mod download\n\
             COPY . .\n\
             RUN CGO_ENABLED=0 GOOS=linux go build -o app .\n\
             \n\
             FROM alpine:latest\n\
             RUN apk --no-cache add ca-certificates\n\
             WORKDIR /srv\n\
             COPY --from=builder /app/app .\n\
             EXPOSE {port}\n\
             CMD [\"./app\"]\n"
        )),
        Runtime::Static => Some(
            "FROM nginx:alpine\n\
             COPY . /usr/share/nginx/html\n\
             EXPOSE 80\n\
             CMD [\"nginx\", \"-g\", \"daemon off;\"]\n"
                .to_string(),
        ),
        Runtime::Docker | Runtime::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn detect_in(files: &[&str]) -> RuntimeProfile {
        let dir = TempDir::new().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        detect(&LocalProbe::new(dir.path())).await
    }

    #[tokio::test]
    async fn dockerfile_wins_over_everything() {
        let p = detect_in(&["Dockerfile", "package.json", "go.mod"]).await;
        assert_eq!(p.runtime, Runtime::Docker);
        assert_eq!(p.port, 3000);
        assert!(p.build_command.is_none());
    }

    #[tokio::test]
    async fn python_variants() {
        let p = detect_in(&["requirements.txt"]).await;
        assert_eq!(p.build_command.as_deref(), Some("pip install -r requirements.txt"));
        assert_eq!(p.port, 8000);

        let p = detect_in(&["pyproject.toml"]).await;
        assert_eq!(p.start_command.as_deref(), Some("python -m app"));

        let p = detect_in(&["Pipfile"]).await;
        assert_eq!(p.build_command.as_deref(), Some("pipenv install"));
    }

    #[tokio::test]
    async fn go_and_static_and_unknown() {
        let p = detect_in(&["go.mod"]).await;
        assert_eq!(p.runtime, Runtime::Go);
        assert_eq!(p.port, 8080);

        let p = detect_in(&["index.html"]).await;
        assert_eq!(p.runtime, Runtime::Static);
        assert_eq!(p.port, 80);

        let p = detect_in(&[]).await;
        assert_eq!(p.runtime, Runtime::Unknown);
        assert_eq!(p.port, 3000);
    }

    #[tokio::test]
    async fn node_package_manager_order() {
        let p = detect_in(&["package.json"]).await;
        assert_eq!(p.build_command.as_deref(), Some("npm install"));
        assert_eq!(p.start_command.as_deref(), Some("npm run start"));

        let p = detect_in(&["package.json", "yarn.lock"]).await;
        assert_eq!(p.build_command.as_deref(), Some("yarn install"));

        // pnpm beats yarn when both lockfiles are present
        let p = detect_in(&["package.json", "yarn.lock", "pnpm-lock.yaml"]).await;
        assert_eq!(p.build_command.as_deref(), Some("pnpm install"));

        let p = detect_in(&["package.json", "bun.lockb"]).await;
        assert_eq!(p.start_command.as_deref(), Some("bun run start"));
    }

    #[tokio::test]
    async fn next_and_vite_framework_probes() {
        let p = detect_in(&["package.json", "next.config.ts"]).await;
        assert_eq!(p.build_command.as_deref(), Some("npm install && npm run build"));
        assert_eq!(p.start_command.as_deref(), Some("npm run start"));
        assert_eq!(p.port, 3000);

        let p = detect_in(&["package.json", "vite.config.ts", "pnpm-lock.yaml"]).await;
        assert_eq!(p.build_command.as_deref(), Some("pnpm install && pnpm build"));
        assert_eq!(p.start_command.as_deref(), Some("pnpm preview"));
        assert_eq!(p.port, 4173);
    }

    #[test]
    fn dockerfile_uses_shell_form_cmd() {
        let df = dockerfile_for(Runtime::Nodejs, Some("npm install"), Some("npm run start"), 3000).unwrap();
        assert!(df.contains("CMD [\"sh\", \"-c\", \"npm run start\"]"));
        assert!(df.contains("EXPOSE 3000"));
    }

    #[test]
    fn no_dockerfile_for_docker_or_unknown() {
        assert!(dockerfile_for(Runtime::Docker, None, None, 3000).is_none());
        assert!(dockerfile_for(Runtime::Unknown, None, None, 3000).is_none());
    }

    #[test]
    fn python_dockerfile_runs_project_build_command() {
        let df = dockerfile_for(Runtime::Python, Some("pipenv install"), Some("pipenv run python app.py"), 8000).unwrap();
        assert!(df.contains("RUN pipenv install"));
        assert!(df.contains("CMD [\"sh\", \"-c\", \"pipenv run python app.py\"]"));
    }
}
