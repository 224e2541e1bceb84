//! Job broker: two Redis-backed queues (`builds`, `deploys`) with JSON
//! payloads, bounded retries, and exponential backoff on redelivery.

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub const BUILD_QUEUE: &str = "rcnbuild:queue:builds";
pub const DEPLOY_QUEUE: &str = "rcnbuild:queue:deploys";

/// Bounded retry budget per task.
pub const MAX_ATTEMPTS: u32 = 3;
/// Execution ceilings.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEPLOY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const POP_BLOCK_SECS: f64 = 5.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildTask {
    pub deployment_id: Uuid,
    pub project_id: Uuid,
    pub commit_sha: String,
    pub branch: String,
    pub repo_clone_url: String,
    pub root_directory: String,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub runtime: Option<String>,
    pub port: i32,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTask {
    pub deployment_id: Uuid,
    pub project_id: Uuid,
    pub project_slug: String,
    pub image_tag: String,
    pub port: i32,
    #[serde(default)]
    pub attempt: u32,
}

/// Delay before redelivery attempt `attempt` (1-based), doubling each time.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(10u64.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))))
}

#[derive(Clone)]
pub struct Queue {
    client: redis::Client,
}

impl Queue {
    pub fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn push(&self, queue: &str, payload: String) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.lpush(queue, payload).await?;
        Ok(())
    }

    async fn pop<T: DeserializeOwned>(&self, queue: &str) -> anyhow::Result<Option<T>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let popped: Option<(String, String)> = conn.brpop(queue, POP_BLOCK_SECS).await?;
        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn enqueue_build(&self, task: &BuildTask) -> anyhow::Result<()> {
        self.push(BUILD_QUEUE, serde_json::to_string(task)?).await?;
        info!(deployment_id = %task.deployment_id, queue = BUILD_QUEUE, "enqueued build task");
        Ok(())
    }

    pub async fn enqueue_deploy(&self, task: &DeployTask) -> anyhow::Result<()> {
        self.push(DEPLOY_QUEUE, serde_json::to_string(task)?).await?;
        info!(deployment_id = %task.deployment_id, queue = DEPLOY_QUEUE, "enqueued deploy task");
        Ok(())
    }

    pub async fn pop_build(&self) -> anyhow::Result<Option<BuildTask>> {
        self.pop(BUILD_QUEUE).await
    }

    pub async fn pop_deploy(&self) -> anyhow::Result<Option<DeployTask>> {
        self.pop(DEPLOY_QUEUE).await
    }

    /// Schedule a redelivery after the backoff for the task's attempt count.
    pub fn requeue_build_later(&self, mut task: BuildTask) {
        task.attempt += 1;
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff(task.attempt)).await;
            if let Err(e) = queue.enqueue_build(&task).await {
                tracing::error!(deployment_id = %task.deployment_id, error = %e, "failed to requeue build task");
            }
        });
    }

    pub fn requeue_deploy_later(&self, mut task: DeployTask) {
        task.attempt += 1;
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff(task.attempt)).await;
            if let Err(e) = queue.enqueue_deploy(&task).await {
                tracing::error!(deployment_id = %task.deployment_id, error = %e, "failed to requeue deploy task");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(10));
        assert_eq!(backoff(2), Duration::from_secs(20));
        assert_eq!(backoff(3), Duration::from_secs(40));
    }

    #[test]
    fn build_task_round_trips_and_defaults_attempt() {
        let task = BuildTask {
            deployment_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            commit_sha: "a".repeat(40),
            branch: "main".into(),
            repo_clone_url: "https://example.test/dev/app.git".into(),
            root_directory: ".".into(),
            build_command: Some("npm install".into()),
            start_command: Some("npm run start".into()),
            runtime: Some("nodejs".into()),
            port: 3000,
            attempt: 1,
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: BuildTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.deployment_id, task.deployment_id);
        assert_eq!(back.attempt, 1);

        // payloads from older producers omit the attempt counter
        let mut v: serde_json::Value = serde_json::from_str(&json).unwrap();
        v.as_object_mut().unwrap().remove("attempt");
        let back: BuildTask = serde_json::from_value(v).unwrap();
        assert_eq!(back.attempt, 0);
    }
}
