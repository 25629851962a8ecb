//! Harness configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{HarnessError, HarnessResult};

/// Port used when `SERVER_PORT` is not set
pub const DEFAULT_PORT: u16 = 8080;

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How to launch the server under test
    pub server: ServerConfig,

    /// Where and how to talk to it
    pub http: HttpConfig,

    /// Readiness probe settings
    pub readiness: ReadinessConfig,

    /// Directory receiving the summary, failure reports and (by default) the server log
    pub results_dir: PathBuf,

    /// Version string recorded in the summary and used to tag output files
    pub runtime_version: String,

    /// Quiet period the log must hold still for before a test's checkpoint,
    /// also awaited before reading the log tail of a failed test
    #[serde(rename = "log_settle_ms", with = "millis")]
    pub log_settle: Duration,

    /// Newest log lines kept in a failure report
    pub log_tail_max_lines: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            http: HttpConfig::default(),
            readiness: ReadinessConfig::default(),
            results_dir: std::env::temp_dir(),
            runtime_version: format!("v{}", env!("CARGO_PKG_VERSION")),
            log_settle: Duration::from_millis(100),
            log_tail_max_lines: 500,
        }
    }
}

/// Server process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server executable, resolved through `PATH` when not a path
    pub binary: String,

    /// Arguments; `None` means `--port <port>`
    pub args: Option<Vec<String>>,

    /// Extra environment on top of the inherited one
    pub env: BTreeMap<String, String>,

    /// Exiting within this window counts as a failed launch
    #[serde(rename = "grace_window_ms", with = "millis")]
    pub grace_window: Duration,

    /// How long to wait for exit after SIGTERM before killing
    #[serde(rename = "shutdown_timeout_ms", with = "millis")]
    pub shutdown_timeout: Duration,

    /// Combined stdout/stderr log; defaults to `<results_dir>/server-<tag>.log`
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("NODE_ENV".to_string(), "test".to_string());
        Self {
            binary: "comply-server".to_string(),
            args: None,
            env,
            grace_window: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(5),
            log_file: None,
        }
    }
}

/// HTTP endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,

    /// Upper bound for any single request
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Readiness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Health endpoint; older servers only expose `/server/status`
    pub health_path: String,
    pub max_attempts: u32,
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            health_path: "/heartbeat".to_string(),
            max_attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Apply `SERVER_PORT` and `HARNESS_RUNTIME_VERSION` from the environment
    pub fn apply_env(&mut self) -> HarnessResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply the same variables through `lookup` instead of the process environment
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> HarnessResult<()> {
        if let Some(port) = lookup("SERVER_PORT").filter(|p| !p.trim().is_empty()) {
            self.http.port = port.trim().parse().map_err(|_| {
                HarnessError::InvalidConfig(format!("SERVER_PORT is not a port number: {}", port))
            })?;
        }
        if let Some(version) = lookup("HARNESS_RUNTIME_VERSION").filter(|v| !v.is_empty()) {
            self.runtime_version = version;
        }
        Ok(())
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.server.binary.trim().is_empty() {
            return Err(HarnessError::InvalidConfig("server binary is empty".into()));
        }
        if self.http.port == 0 {
            return Err(HarnessError::InvalidConfig("port must be non-zero".into()));
        }
        if self.readiness.max_attempts == 0 {
            return Err(HarnessError::InvalidConfig(
                "readiness max_attempts must be at least 1".into(),
            ));
        }
        if !self.readiness.health_path.starts_with('/') {
            return Err(HarnessError::InvalidConfig(format!(
                "health path must start with '/': {}",
                self.readiness.health_path
            )));
        }
        Ok(())
    }

    /// Tag used to namespace output files: the runtime version with dots replaced
    pub fn version_tag(&self) -> String {
        version_tag(&self.runtime_version)
    }

    /// Arguments passed to the server
    pub fn server_args(&self) -> Vec<String> {
        match &self.server.args {
            Some(args) => args.clone(),
            None => vec!["--port".to_string(), self.http.port.to_string()],
        }
    }

    /// Server log file path
    pub fn log_file(&self) -> PathBuf {
        self.server
            .log_file
            .clone()
            .unwrap_or_else(|| self.results_dir.join(format!("server-{}.log", self.version_tag())))
    }
}

/// `v20.11.1` becomes `v20_11_1`; anything outside `[A-Za-z0-9_-]` becomes `_`
pub fn version_tag(version: &str) -> String {
    version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
