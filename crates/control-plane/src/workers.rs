//! Build and deploy workers.
//!
//! Each worker pool consumes one queue. Every step failure records `failed`
//! with a descriptive reason; a lost conditional transition means another
//! actor (a concurrent worker, a cancel, a redelivered task that already
//! succeeded) owns the row, and the worker aborts silently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use sqlx::{Pool, Postgres};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::{routing_labels, ContainerEngine, ContainerSpec};
use crate::queue::{BuildTask, DeployTask, Queue, BUILD_TIMEOUT, DEPLOY_TIMEOUT, MAX_ATTEMPTS};
use crate::runtime::{detect, dockerfile_for, LocalProbe, Runtime};
use crate::services::{deployments, env_vars, projects};

#[derive(Clone)]
pub struct WorkerContext {
    pub db: Pool<Postgres>,
    pub queue: Queue,
    pub engine: Arc<dyn ContainerEngine>,
    pub sealer: seal::Sealer,
    pub cfg: Arc<Config>,
}

/// Spawn the configured build and deploy pools.
pub fn spawn_all(ctx: WorkerContext) {
    for i in 0..ctx.cfg.build_workers {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            info!(worker = i, queue = "builds", "worker started");
            build_loop(ctx).await;
        });
    }
    for i in 0..ctx.cfg.deploy_workers {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            info!(worker = i, queue = "deploys", "worker started");
            deploy_loop(ctx).await;
        });
    }
}

async fn build_loop(ctx: WorkerContext) {
    loop {
        match ctx.queue.pop_build().await {
            Ok(Some(task)) => process_build(&ctx, task).await,
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "build queue pop failed");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

async fn deploy_loop(ctx: WorkerContext) {
    loop {
        match ctx.queue.pop_deploy().await {
            Ok(Some(task)) => process_deploy(&ctx, task).await,
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "deploy queue pop failed");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

async fn process_build(ctx: &WorkerContext, task: BuildTask) {
    let id = task.deployment_id;
    let outcome = tokio::time::timeout(BUILD_TIMEOUT, handle_build(ctx, &task)).await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(deployment_id = %id, attempt = task.attempt, error = %e, "build task failed");
            maybe_retry_build(ctx, task);
        }
        Err(_) => {
            error!(deployment_id = %id, "build task exceeded ceiling");
            let _ = deployments::fail(&ctx.db, id, "build timed out").await;
            maybe_retry_build(ctx, task);
        }
    }
}

async fn process_deploy(ctx: &WorkerContext, task: DeployTask) {
    let id = task.deployment_id;
    let outcome = tokio::time::timeout(DEPLOY_TIMEOUT, handle_deploy(ctx, &task)).await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(deployment_id = %id, attempt = task.attempt, error = %e, "deploy task failed");
            if task.attempt + 1 < MAX_ATTEMPTS {
                ctx.queue.requeue_deploy_later(task);
            } else {
                warn!(deployment_id = %id, "deploy retries exhausted");
            }
        }
        Err(_) => {
            error!(deployment_id = %id, "deploy task exceeded ceiling");
            let _ = deployments::fail(&ctx.db, id, "deploy timed out").await;
            if task.attempt + 1 < MAX_ATTEMPTS {
                ctx.queue.requeue_deploy_later(task);
            }
        }
    }
}

fn maybe_retry_build(ctx: &WorkerContext, task: BuildTask) {
    // A redelivered task whose row already reached a terminal state aborts
    // silently at the first conditional transition, so retries only resurrect
    // tasks that died without recording an outcome.
    if task.attempt + 1 < MAX_ATTEMPTS {
        ctx.queue.requeue_build_later(task);
    } else {
        warn!(deployment_id = %task.deployment_id, "build retries exhausted");
    }
}

/// Record the failure on the row, then surface it to the retry layer.
async fn step_failed(ctx: &WorkerContext, id: Uuid, step: &str, detail: impl std::fmt::Display) -> anyhow::Error {
    let reason = format!("{step}: {detail}");
    if let Err(e) = deployments::fail(&ctx.db, id, &reason).await {
        error!(deployment_id = %id, error = %e, "could not record failure");
    }
    anyhow::anyhow!(reason)
}

pub fn image_tag_for(registry: &str, project_id: Uuid, commit_sha: &str) -> String {
    let short = &commit_sha[..commit_sha.len().min(8)];
    format!("{registry}/{project_id}:{short}")
}

async fn handle_build(ctx: &WorkerContext, task: &BuildTask) -> anyhow::Result<()> {
    let id = task.deployment_id;
    if !deployments::begin_build(&ctx.db, id).await? {
        debug!(deployment_id = %id, "row is past pending, skipping redelivered build");
        return Ok(());
    }
    info!(deployment_id = %id, commit = %&task.commit_sha[..8.min(task.commit_sha.len())], "build started");

    // Removed on every exit path when the guard drops.
    let checkout = tempfile::tempdir().context("create build directory")?;

    if let Err(e) = clone_at_commit(&task.repo_clone_url, &task.branch, &task.commit_sha, checkout.path()).await {
        return Err(step_failed(ctx, id, "failed to clone repository", e).await);
    }

    let build_root = resolve_build_root(checkout.path(), &task.root_directory);

    if !build_root.join("Dockerfile").exists() {
        if let Err(e) = synthesize_dockerfile(&build_root, task).await {
            return Err(step_failed(ctx, id, "failed to generate Dockerfile", e).await);
        }
    }

    let image_tag = image_tag_for(&ctx.cfg.registry_url, task.project_id, &task.commit_sha);
    info!(deployment_id = %id, image = %image_tag, "building image");
    if let Err(e) = docker_cli(&["build", "-t", &image_tag, "."], Some(&build_root)).await {
        return Err(step_failed(ctx, id, "failed to build container image", e).await);
    }
    if let Err(e) = docker_cli(&["push", &image_tag], None).await {
        return Err(step_failed(ctx, id, "failed to push container image", e).await);
    }

    if !deployments::mark_built(&ctx.db, id, &image_tag).await? {
        debug!(deployment_id = %id, "row left building while we worked, dropping result");
        return Ok(());
    }

    let project = projects::get_by_id(&ctx.db, task.project_id).await?;
    ctx.queue
        .enqueue_deploy(&DeployTask {
            deployment_id: id,
            project_id: task.project_id,
            project_slug: project.slug,
            image_tag: image_tag.clone(),
            port: task.port,
            attempt: 0,
        })
        .await?;
    info!(deployment_id = %id, image = %image_tag, "build complete, deploy enqueued");
    Ok(())
}

async fn handle_deploy(ctx: &WorkerContext, task: &DeployTask) -> anyhow::Result<()> {
    let id = task.deployment_id;
    let row = deployments::get(&ctx.db, id).await?;
    if row.status != crate::models::DeploymentStatus::Deploying {
        debug!(deployment_id = %id, status = %row.status, "row is not deploying, skipping redelivered task");
        return Ok(());
    }
    info!(deployment_id = %id, image = %task.image_tag, "deploy started");

    let mut env = match env_vars::decrypted_map(&ctx.db, &ctx.sealer, task.project_id).await {
        Ok(env) => env,
        Err(e) => return Err(step_failed(ctx, id, "failed to prepare environment", e).await),
    };
    inject_port(&mut env, task.port);

    let name = ctx.cfg.container_name(&task.project_slug);
    match ctx.engine.find_by_name(&name).await {
        Ok(Some(existing)) => {
            info!(container = %name, "replacing existing container");
            if let Err(e) = ctx.engine.stop(&existing).await {
                warn!(container = %name, error = %e, "stop of existing container failed");
            }
            if let Err(e) = ctx.engine.remove(&existing).await {
                warn!(container = %name, error = %e, "remove of existing container failed");
            }
        }
        Ok(None) => {}
        Err(e) => return Err(step_failed(ctx, id, "failed to inspect existing container", e).await),
    }

    if let Err(e) = ctx.engine.pull(&task.image_tag).await {
        return Err(step_failed(ctx, id, "failed to pull image", e).await);
    }

    let spec = container_spec(&ctx.cfg, &task.project_slug, &task.image_tag, task.port, env);
    let container_id = match ctx.engine.create(&spec).await {
        Ok(cid) => cid,
        Err(e) => return Err(step_failed(ctx, id, "failed to create container", e).await),
    };
    if let Err(e) = ctx.engine.start(&container_id).await {
        return Err(step_failed(ctx, id, "failed to start container", e).await);
    }

    let url = ctx.cfg.public_url(&task.project_slug);
    if !deployments::promote(&ctx.db, id, task.project_id, &container_id, &url).await? {
        // A cancel won the race; the container stays unpromoted and the next
        // successful deploy replaces it by canonical name.
        warn!(deployment_id = %id, "promotion lost, leaving row untouched");
        return Ok(());
    }
    info!(deployment_id = %id, container_id = %&container_id[..12.min(container_id.len())], url = %url, "deployment live");
    Ok(())
}

/// Shallow-clone at the tracked branch, then pin the exact commit. The fetch
/// may fail when the commit is the fresh HEAD; checkout is authoritative.
async fn clone_at_commit(clone_url: &str, branch: &str, commit_sha: &str, dest: &Path) -> anyhow::Result<()> {
    let dest_str = dest.to_string_lossy();
    git(&["clone", "--depth", "1", "--branch", branch, clone_url, &dest_str], None).await?;
    let _ = git(&["fetch", "origin", commit_sha], Some(dest)).await;
    git(&["checkout", commit_sha], Some(dest)).await?;
    Ok(())
}

fn resolve_build_root(checkout: &Path, root_directory: &str) -> PathBuf {
    let root = root_directory.trim();
    if root.is_empty() || root == "." {
        checkout.to_path_buf()
    } else {
        checkout.join(root)
    }
}

/// Write a Dockerfile derived from the project's recorded runtime; when the
/// record is inconclusive the working directory is probed directly.
async fn synthesize_dockerfile(build_root: &Path, task: &BuildTask) -> anyhow::Result<()> {
    let mut runtime = Runtime::from_tag(task.runtime.as_deref().unwrap_or(""));
    let mut build_cmd = task.build_command.clone();
    let mut start_cmd = task.start_command.clone();
    let mut port = task.port;
    if runtime == Runtime::Unknown {
        let profile = detect(&LocalProbe::new(build_root)).await;
        runtime = profile.runtime;
        if build_cmd.is_none() {
            build_cmd = profile.build_command;
        }
        if start_cmd.is_none() {
            start_cmd = profile.start_command;
        }
        if port <= 0 {
            port = profile.port;
        }
    }

    let Some(dockerfile) = dockerfile_for(runtime, build_cmd.as_deref(), start_cmd.as_deref(), port) else {
        bail!("no recipe for runtime '{}'", runtime.as_str());
    };
    tokio::fs::write(build_root.join("Dockerfile"), dockerfile)
        .await
        .context("write Dockerfile")?;
    Ok(())
}

pub fn inject_port(env: &mut HashMap<String, String>, port: i32) {
    env.entry("PORT".to_string()).or_insert_with(|| port.to_string());
}

pub fn container_spec(cfg: &Config, slug: &str, image: &str, port: i32, env: HashMap<String, String>) -> ContainerSpec {
    ContainerSpec {
        name: cfg.container_name(slug),
        image: image.to_string(),
        port,
        env,
        labels: routing_labels(slug, &cfg.base_domain, port, cfg.tls_enabled, cfg.cert_resolver.as_deref()),
        memory_bytes: cfg.container_memory_bytes,
        nano_cpus: cfg.container_nano_cpus,
        network: cfg.proxy_network.clone(),
    }
}

async fn git(args: &[&str], dir: Option<&Path>) -> anyhow::Result<String> {
    run_cli("git", args, dir).await
}

async fn docker_cli(args: &[&str], dir: Option<&Path>) -> anyhow::Result<String> {
    run_cli("docker", args, dir).await
}

async fn run_cli(program: &str, args: &[&str], dir: Option<&Path>) -> anyhow::Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd.output().await.with_context(|| format!("spawn {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{program} {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tag_shape() {
        let pid = Uuid::parse_str("6f6b2a2e-1111-4a4a-9b9b-222233334444").unwrap();
        let tag = image_tag_for("localhost:5000", pid, &"abc12345deadbeef".to_string());
        assert_eq!(tag, format!("localhost:5000/{pid}:abc12345"));
    }

    #[test]
    fn image_tag_tolerates_short_sha() {
        let pid = Uuid::new_v4();
        let tag = image_tag_for("reg", pid, "abc");
        assert!(tag.ends_with(":abc"));
    }

    #[test]
    fn port_injection_respects_existing() {
        let mut env = HashMap::new();
        inject_port(&mut env, 3000);
        assert_eq!(env.get("PORT").unwrap(), "3000");

        let mut env: HashMap<_, _> = [("PORT".to_string(), "9999".to_string())].into();
        inject_port(&mut env, 3000);
        assert_eq!(env.get("PORT").unwrap(), "9999");
    }

    #[test]
    fn build_root_resolution() {
        let base = Path::new("/tmp/checkout");
        assert_eq!(resolve_build_root(base, "."), base);
        assert_eq!(resolve_build_root(base, ""), base);
        assert_eq!(resolve_build_root(base, "api"), base.join("api"));
    }

    #[test]
    fn container_spec_carries_caps_and_labels() {
        let cfg = Config::for_tests();
        let mut env = HashMap::new();
        env.insert("API_KEY".to_string(), "supersecret".to_string());
        let spec = container_spec(&cfg, "app", "reg/img:abc", 3000, env);
        assert_eq!(spec.name, "rcn-app");
        assert_eq!(spec.memory_bytes, 512 * 1024 * 1024);
        assert_eq!(spec.nano_cpus, 500_000_000);
        assert_eq!(spec.network, "rcnbuild-network");
        assert_eq!(spec.labels.get("rcnbuild.slug").unwrap(), "app");
        assert_eq!(spec.env.get("API_KEY").unwrap(), "supersecret");
    }
}
