//! Container engine driver.
//!
//! The engine is kept behind a narrow trait (pull, create, start, stop,
//! remove, find-by-name, logs) so an alternative runtime or a fake can
//! substitute for Docker. The production implementation speaks to the Docker
//! daemon through bollard.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogsOptions,
    NetworkingConfig, RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine operation failed: {0}")]
    Op(#[from] bollard::errors::Error),
}

/// Everything needed to create one user container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub port: i32,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub network: String,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync + 'static {
    async fn pull(&self, image: &str) -> Result<(), EngineError>;
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;
    async fn start(&self, id: &str) -> Result<(), EngineError>;
    async fn stop(&self, id: &str) -> Result<(), EngineError>;
    async fn remove(&self, id: &str) -> Result<(), EngineError>;
    /// Exact-name lookup. `Ok(None)` when no such container exists.
    async fn find_by_name(&self, name: &str) -> Result<Option<String>, EngineError>;
    async fn logs(&self, id: &str, tail: usize) -> Result<String, EngineError>;
}

/// Routing labels consumed by the reverse proxy, plus platform metadata.
pub fn routing_labels(
    slug: &str,
    base_domain: &str,
    port: i32,
    tls_enabled: bool,
    cert_resolver: Option<&str>,
) -> HashMap<String, String> {
    let host = format!("{slug}.{base_domain}");
    let mut labels = HashMap::new();
    labels.insert("traefik.enable".into(), "true".into());
    labels.insert(format!("traefik.http.routers.{slug}.rule"), format!("Host(`{host}`)"));
    labels.insert(format!("traefik.http.routers.{slug}.entrypoints"), "web".into());
    labels.insert(format!("traefik.http.routers.{slug}-secure.rule"), format!("Host(`{host}`)"));
    labels.insert(format!("traefik.http.routers.{slug}-secure.entrypoints"), "websecure".into());
    labels.insert(format!("traefik.http.routers.{slug}-secure.tls"), "true".into());
    labels.insert(
        format!("traefik.http.services.{slug}.loadbalancer.server.port"),
        port.to_string(),
    );
    labels.insert("rcnbuild.managed".into(), "true".into());
    labels.insert("rcnbuild.slug".into(), slug.to_string());
    if tls_enabled {
        if let Some(resolver) = cert_resolver {
            labels.insert(format!("traefik.http.routers.{slug}-secure.tls.certresolver"), resolver.to_string());
        }
    }
    labels
}

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect via the local socket and verify the daemon answers.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_socket_defaults().map_err(|e| EngineError::Unavailable(e.to_string()))?;
        docker.ping().await.map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull(&self, image: &str) -> Result<(), EngineError> {
        let options = CreateImageOptions { from_image: image.to_string(), ..Default::default() };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(format!("{}/tcp", spec.port), HashMap::new());
        let mut endpoints = HashMap::new();
        endpoints.insert(spec.network.clone(), EndpointSettings::default());

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                memory: Some(spec.memory_bytes),
                nano_cpus: Some(spec.nano_cpus),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                    maximum_retry_count: None,
                }),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig { endpoints_config: endpoints }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(CreateContainerOptions { name: spec.name.clone(), platform: None }), config)
            .await?;
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container::<String>(id, None)
            .await?;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        self.docker.stop_container(id, Some(StopContainerOptions { t: 30 })).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await?;
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<String>, EngineError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions { all: true, filters, ..Default::default() }))
            .await?;
        // The name filter is a substring match; require an exact hit.
        for c in containers {
            let names = c.names.unwrap_or_default();
            if names.iter().any(|n| n.trim_start_matches('/') == name) {
                return Ok(c.id);
            }
        }
        Ok(None)
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&String::from_utf8_lossy(&chunk?.into_bytes()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_labels_contract() {
        let labels = routing_labels("app", "rcnbuild.dev", 3000, false, None);
        assert_eq!(labels.get("traefik.enable").unwrap(), "true");
        assert_eq!(labels.get("traefik.http.routers.app.rule").unwrap(), "Host(`app.rcnbuild.dev`)");
        assert_eq!(labels.get("traefik.http.routers.app.entrypoints").unwrap(), "web");
        assert_eq!(labels.get("traefik.http.routers.app-secure.entrypoints").unwrap(), "websecure");
        assert_eq!(labels.get("traefik.http.routers.app-secure.tls").unwrap(), "true");
        assert_eq!(labels.get("traefik.http.services.app.loadbalancer.server.port").unwrap(), "3000");
        assert_eq!(labels.get("rcnbuild.managed").unwrap(), "true");
        assert_eq!(labels.get("rcnbuild.slug").unwrap(), "app");
        assert!(!labels.contains_key("traefik.http.routers.app-secure.tls.certresolver"));
    }

    #[test]
    fn cert_resolver_label_requires_tls() {
        let labels = routing_labels("app", "rcnbuild.dev", 3000, true, Some("letsencrypt"));
        assert_eq!(labels.get("traefik.http.routers.app-secure.tls.certresolver").unwrap(), "letsencrypt");

        let labels = routing_labels("app", "rcnbuild.dev", 3000, false, Some("letsencrypt"));
        assert!(!labels.contains_key("traefik.http.routers.app-secure.tls.certresolver"));
    }

    /// The trait stays object-safe so fakes can stand in for Docker.
    #[test]
    fn engine_trait_is_object_safe() {
        fn _takes(_: &dyn ContainerEngine) {}
    }
}
