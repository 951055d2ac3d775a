//! Application configuration
//!
//! Layered: built-in defaults, then an optional YAML file, then `.env` and
//! process environment, then CLI flags (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::router::DEFAULT_HEAVY_KEYWORDS;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "prism.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Chat-completions endpoint
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Inference server base URL
    pub base_url: String,
    /// Per-request HTTP timeout; generation can be slow
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub heavy_keywords: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            heavy_keywords: DEFAULT_HEAVY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub light: usize,
    pub heavy: usize,
    /// Jobs allowed to wait per lane before submission is refused
    pub queue_capacity: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            light: 4,
            heavy: 1,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound for a single tool call; unbounded when unset
    pub step_timeout_secs: Option<u64>,
}

impl ExecutorConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub poll_interval_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
        }
    }
}

impl ObserverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root for job files and uploaded images
    pub data_dir: PathBuf,
    /// How long finished jobs stay observable
    pub retention_secs: u64,
    pub max_jobs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            data_dir: PathBuf::from("./data"),
            // 1 hour
            retention_secs: 3600,
            max_jobs: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub planner: PlannerConfig,
    pub tools: ToolsConfig,
    pub router: RouterConfig,
    pub workers: WorkersConfig,
    pub executor: ExecutorConfig,
    pub observer: ObserverConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Load defaults, then YAML, then `.env` and environment
    ///
    /// With no explicit path, `prism.yaml` is read only if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        config.apply_env(|key| std::env::var(key).ok())?;

        config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PRISM_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PRISM_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PRISM_PORT is not a port number: {}", port))?;
        }
        if let Some(dir) = lookup("PRISM_DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("PLANNER_URL") {
            self.planner.endpoint = url;
        }
        if let Some(model) = lookup("PLANNER_MODEL") {
            self.planner.model = model;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.planner.api_key = Some(key);
        }
        if let Some(url) = lookup("PRISM_TOOLS_URL") {
            self.tools.base_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers.light == 0 || self.workers.heavy == 0 {
            return Err("each lane needs at least one worker".to_string());
        }
        if self.workers.queue_capacity == 0 {
            return Err("workers.queue_capacity must be greater than 0".to_string());
        }
        if self.observer.poll_interval_ms == 0 {
            return Err("observer.poll_interval_ms must be greater than 0".to_string());
        }
        if self.router.heavy_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err("router.heavy_keywords must not be empty".to_string());
        }
        if self.store.max_jobs == 0 {
            return Err("store.max_jobs must be greater than 0".to_string());
        }
        if self.executor.step_timeout_secs == Some(0) {
            return Err("executor.step_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
