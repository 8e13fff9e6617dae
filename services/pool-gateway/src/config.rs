//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The admin token is loaded from the ADMIN_TOKEN env var or `admin.token_file`,
//! never stored in the TOML directly to avoid leaking secrets.

use axum::http::{HeaderName, HeaderValue};
use common::Secret;
use serde::Deserialize;
use session_pool::{DEFAULT_FAILURE_THRESHOLD, SelectionPolicy};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub pool: PoolConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Static headers added to every outbound request, beneath session headers
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Resource pool settings
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// JSON file holding the session set (created empty if missing)
    pub sessions_file: PathBuf,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

/// Batch dispatch settings
#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Per-job timeout; unset means jobs only end when the operation does
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    /// Switches assignment from round-robin to seeded random
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Admin API listener settings
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the admin bearer token (alternative to ADMIN_TOKEN env var)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// Outbound HTTP operation settings
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Header to inject into outbound requests
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_report_interval() -> u64 {
    60
}

fn default_parallelism() -> usize {
    10
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_max_connections() -> usize {
    1000
}

fn default_timeout() -> u64 {
    60
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            job_timeout_secs: None,
            seed: None,
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
            token: None,
            token_file: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl DispatchConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn policy(&self) -> SelectionPolicy {
        match self.seed {
            Some(seed) => SelectionPolicy::SeededRandom { seed },
            None => SelectionPolicy::RoundRobin,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Admin token resolution order:
    /// 1. ADMIN_TOKEN env var
    /// 2. token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            config.admin.token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.admin.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.admin.token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Reject values the pool and dispatcher cannot run with.
    fn validate(&self) -> common::Result<()> {
        if self.pool.failure_threshold == 0 {
            return Err(common::Error::invalid(
                "pool.failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.pool.report_interval_secs == 0 {
            return Err(common::Error::invalid(
                "pool.report_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.dispatch.parallelism == 0 {
            return Err(common::Error::invalid(
                "dispatch.parallelism",
                "must be greater than 0",
            ));
        }
        if self.dispatch.job_timeout_secs == Some(0) {
            return Err(common::Error::invalid(
                "dispatch.job_timeout_secs",
                "must be greater than 0 when set",
            ));
        }
        if self.admin.max_connections == 0 {
            return Err(common::Error::invalid(
                "admin.max_connections",
                "must be greater than 0",
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(common::Error::invalid(
                "http.timeout_secs",
                "must be greater than 0",
            ));
        }
        for (i, header) in self.headers.iter().enumerate() {
            if let Err(e) = HeaderName::from_bytes(header.name.as_bytes()) {
                return Err(common::Error::invalid(
                    &format!("headers[{i}].name"),
                    format!("{:?} is not a valid header name: {e}", header.name),
                ));
            }
            if let Err(e) = HeaderValue::from_str(&header.value) {
                return Err(common::Error::invalid(
                    &format!("headers[{i}].value"),
                    format!("for {} is not a valid header value: {e}", header.name),
                ));
            }
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("pool-gateway.toml")
    }
}
