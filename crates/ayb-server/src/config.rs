//! Process configuration: TOML file plus `AYB_<SECTION>_<KEY>` environment
//! overrides.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub jobs: JobsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_shutdown_timeout_s")]
    pub shutdown_timeout_s: u64,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            shutdown_timeout_s: default_shutdown_timeout_s(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_session_secret")]
    pub session_jwt_secret: String,
    #[serde(default = "default_session_ttl_s")]
    pub session_ttl_s: i64,
    #[serde(default)]
    pub oauth_provider: Option<OAuthProviderSection>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_jwt_secret: default_session_secret(),
            session_ttl_s: default_session_ttl_s(),
            oauth_provider: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProviderSection {
    pub issuer: String,
    pub authorization_code_ttl_s: i64,
    pub access_token_ttl_s: i64,
    pub refresh_token_ttl_s: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_lease_duration_s")]
    pub lease_duration_s: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries_default: i32,
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
    #[serde(default = "default_scheduler_tick_s")]
    pub scheduler_tick_s: u64,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_duration_s: default_lease_duration_s(),
            max_retries_default: default_max_retries(),
            scheduler_enabled: true,
            scheduler_tick_s: default_scheduler_tick_s(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            database: DatabaseSection::default(),
            auth: AuthSection::default(),
            jobs: JobsSection::default(),
        }
    }
}

impl Config {
    /// Load from `path` if given, falling back to `./ayb.toml` if it exists,
    /// falling back to defaults otherwise. Applies environment overrides
    /// last regardless of source.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is given but unreadable, or the TOML in
    /// either location fails to parse.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new("./ayb.toml").exists() => Self::from_file(Path::new("./ayb.toml"))?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        toml::from_str(&content).map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))
    }

    /// `AYB_<SECTION>_<KEY>` env vars override whatever the TOML file (or
    /// defaults) set — e.g. `AYB_DATABASE_URL`, `AYB_JOBS_ENABLED`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AYB_SERVER_BIND_ADDR") {
            if let Ok(addr) = v.parse() {
                self.server.bind_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("AYB_SERVER_SHUTDOWN_TIMEOUT_S") {
            if let Ok(n) = v.parse() {
                self.server.shutdown_timeout_s = n;
            }
        }
        if let Ok(v) = std::env::var("AYB_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("AYB_DATABASE_POOL_MAX_SIZE") {
            if let Ok(n) = v.parse() {
                self.database.pool_max_size = n;
            }
        }
        if let Ok(v) = std::env::var("AYB_AUTH_SESSION_JWT_SECRET") {
            self.auth.session_jwt_secret = v;
        }
        if let Ok(v) = std::env::var("AYB_AUTH_SESSION_TTL_S") {
            if let Ok(n) = v.parse() {
                self.auth.session_ttl_s = n;
            }
        }
        if let Ok(v) = std::env::var("AYB_JOBS_ENABLED") {
            if let Ok(b) = v.parse() {
                self.jobs.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("AYB_JOBS_WORKER_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.jobs.worker_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("AYB_JOBS_POLL_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.jobs.poll_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("AYB_JOBS_LEASE_DURATION_S") {
            if let Ok(n) = v.parse() {
                self.jobs.lease_duration_s = n;
            }
        }
        if let Ok(v) = std::env::var("AYB_JOBS_SCHEDULER_ENABLED") {
            if let Ok(b) = v.parse() {
                self.jobs.scheduler_enabled = b;
            }
        }
        if let Ok(v) = std::env::var("AYB_JOBS_SCHEDULER_TICK_S") {
            if let Ok(n) = v.parse() {
                self.jobs.scheduler_tick_s = n;
            }
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8090".parse().expect("valid default bind address")
}

fn default_shutdown_timeout_s() -> u64 {
    30
}

fn default_database_url() -> String {
    "postgresql://localhost/ayb".to_string()
}

fn default_pool_max_size() -> usize {
    20
}

fn default_session_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_session_ttl_s() -> i64 {
    86400
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_lease_duration_s() -> u64 {
    300
}

fn default_max_retries() -> i32 {
    3
}

fn default_scheduler_tick_s() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert!(!config.jobs.enabled);
        assert_eq!(config.jobs.worker_concurrency, 4);
        assert_eq!(config.jobs.poll_interval_ms, 1000);
        assert_eq!(config.jobs.lease_duration_s, 300);
        assert_eq!(config.jobs.max_retries_default, 3);
        assert!(config.jobs.scheduler_enabled);
        assert_eq!(config.jobs.scheduler_tick_s, 15);
    }

    #[test]
    fn parses_toml_sections() {
        let toml_str = r#"
            [server]
            bind_addr = "0.0.0.0:9000"

            [database]
            url = "postgresql://db/ayb_test"

            [jobs]
            enabled = true
            worker_concurrency = 8
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.database.url, "postgresql://db/ayb_test");
        assert!(config.jobs.enabled);
        assert_eq!(config.jobs.worker_concurrency, 8);
        // Untouched sections still take their defaults.
        assert_eq!(config.jobs.poll_interval_ms, 1000);
    }

    #[test]
    fn env_override_wins_over_toml_and_defaults() {
        let mut config = Config::default();
        // SAFETY in spirit only — tests run single-threaded per module via
        // cargo's default test harness isolation is not guaranteed across
        // modules, so this uses a unique var name to avoid cross-test races.
        std::env::set_var("AYB_JOBS_WORKER_CONCURRENCY", "16");
        config.apply_env_overrides();
        assert_eq!(config.jobs.worker_concurrency, 16);
        std::env::remove_var("AYB_JOBS_WORKER_CONCURRENCY");
    }
}
