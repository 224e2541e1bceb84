use anyhow::{bail, Context};

/// Runtime configuration, read once at startup. Misconfiguration is fatal:
/// the process refuses to start rather than run with unusable keys.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub api_port: u16,
    /// Public base URL of this control plane, used for webhook callbacks.
    pub api_url: String,
    pub dashboard_url: String,

    pub github_client_id: String,
    pub github_client_secret: String,
    pub github_redirect_uri: String,

    pub session_secret: String,
    pub encryption_key: String,

    pub registry_url: String,
    pub base_domain: String,
    pub tls_enabled: bool,
    pub cert_resolver: Option<String>,
    pub proxy_network: String,
    pub container_prefix: String,
    pub container_memory_bytes: i64,
    pub container_nano_cpus: i64,

    pub build_workers: usize,
    pub deploy_workers: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = env_or("REDIS_URL", "redis://localhost:6379");

        let session_secret = std::env::var("SESSION_SECRET").context("SESSION_SECRET is required")?;
        if session_secret.len() < 32 {
            bail!("SESSION_SECRET must be at least 32 bytes");
        }
        let encryption_key = std::env::var("ENCRYPTION_KEY").context("ENCRYPTION_KEY is required")?;
        if encryption_key.len() < 32 {
            bail!("ENCRYPTION_KEY must be at least 32 bytes");
        }

        let memory_mb: i64 = env_parse("CONTAINER_MEMORY_MB", 512);
        let cpus: f64 = env_parse("CONTAINER_CPUS", 0.5);

        Ok(Self {
            database_url,
            redis_url,
            api_port: env_parse("API_PORT", 8080),
            api_url: env_or("API_URL", "http://localhost:8080"),
            dashboard_url: env_or("DASHBOARD_URL", "/dashboard"),
            github_client_id: env_or("GITHUB_CLIENT_ID", ""),
            github_client_secret: env_or("GITHUB_CLIENT_SECRET", ""),
            github_redirect_uri: env_or("GITHUB_REDIRECT_URI", ""),
            session_secret,
            encryption_key,
            registry_url: env_or("REGISTRY_URL", "localhost:5000"),
            base_domain: env_or("BASE_DOMAIN", "rcnbuild.dev"),
            tls_enabled: env_or("TLS_ENABLED", "false") == "true",
            cert_resolver: std::env::var("CERT_RESOLVER").ok().filter(|v| !v.is_empty()),
            proxy_network: env_or("PROXY_NETWORK", "rcnbuild-network"),
            container_prefix: env_or("CONTAINER_PREFIX", "rcn"),
            container_memory_bytes: memory_mb * 1024 * 1024,
            container_nano_cpus: (cpus * 1_000_000_000.0) as i64,
            build_workers: env_parse("BUILD_WORKERS", 2),
            deploy_workers: env_parse("DEPLOY_WORKERS", 2),
        })
    }

    /// Canonical container name for a project slug, e.g. `rcn-app`.
    pub fn container_name(&self, slug: &str) -> String {
        format!("{}-{}", self.container_prefix, slug)
    }

    /// Public URL a live deployment is reachable at.
    pub fn public_url(&self, slug: &str) -> String {
        format!("https://{}.{}", slug, self.base_domain)
    }

    pub fn webhook_callback_url(&self) -> String {
        format!("{}/api/webhooks/github", self.api_url.trim_end_matches('/'))
    }

    /// A config suitable for router tests: no external services, test keys.
    #[doc(hidden)]
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            api_port: 0,
            api_url: "http://localhost:8080".into(),
            dashboard_url: "/dashboard".into(),
            github_client_id: String::new(),
            github_client_secret: String::new(),
            github_redirect_uri: String::new(),
            session_secret: "test-session-secret-test-session-secret".into(),
            encryption_key: "test-encryption-key-test-encryption-key".into(),
            registry_url: "localhost:5000".into(),
            base_domain: "rcnbuild.dev".into(),
            tls_enabled: false,
            cert_resolver: None,
            proxy_network: "rcnbuild-network".into(),
            container_prefix: "rcn".into(),
            container_memory_bytes: 512 * 1024 * 1024,
            container_nano_cpus: 500_000_000,
            build_workers: 1,
            deploy_workers: 1,
        }
    }
}
