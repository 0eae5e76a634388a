//! Configuration for capturekit.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CAPTUREKIT_HOME, CAPTUREKIT_SERVICE_URL, CAPTUREKIT_SERVICE_TOKEN)
//! 2. Config file (.capturekit/config.yaml)
//! 3. Defaults (~/.capturekit)
//!
//! Config file discovery:
//! - Searches current directory and parents for .capturekit/config.yaml
//! - `home` in the config file is relative to the .capturekit/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{OrchestratorSettings, DEFAULT_REQUESTS_PER_WINDOW};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_SERVICE_URL: &str = "http://localhost:8080";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    /// State directory (relative to .capturekit/)
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub credits: Option<CreditsConfig>,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
    #[serde(default)]
    pub service: Option<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditsConfig {
    pub initial_balance: Option<u64>,
    pub cost_per_request: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub requests_per_window: Option<u32>,
    pub window_seconds: Option<u64>,
    pub error_freshness_seconds: Option<u64>,
    pub call_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to capturekit home (balance, journal)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub credits: CreditSettings,
    pub limits: LimitSettings,
    pub service: ServiceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditSettings {
    /// Balance used when no durable balance exists yet
    pub initial_balance: u64,
    pub cost_per_request: u64,
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            initial_balance: 10,
            cost_per_request: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitSettings {
    pub requests_per_window: u32,
    pub window_seconds: u64,
    pub error_freshness_seconds: u64,
    pub call_timeout_seconds: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            requests_per_window: DEFAULT_REQUESTS_PER_WINDOW,
            window_seconds: 3600,
            error_freshness_seconds: 3600,
            call_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub poll_interval_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.to_string(),
            token: None,
            poll_interval_ms: 3000,
        }
    }
}

impl ResolvedConfig {
    /// Orchestrator tunables derived from `credits` and `limits`
    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings> {
        Ok(OrchestratorSettings {
            cost_per_request: self.credits.cost_per_request,
            call_timeout: Duration::from_secs(self.limits.call_timeout_seconds),
            error_freshness: seconds(
                "limits.error_freshness_seconds",
                self.limits.error_freshness_seconds,
            )?,
            ..OrchestratorSettings::default()
        })
    }

    /// Length of one rate-limit window
    pub fn rate_window(&self) -> Result<chrono::Duration> {
        seconds("limits.window_seconds", self.limits.window_seconds)
    }

    /// Get the durable balance path ($CAPTUREKIT_HOME/credits.json)
    pub fn balance_path(&self) -> PathBuf {
        self.home.join("credits.json")
    }

    /// Get the journal path ($CAPTUREKIT_HOME/journal.jsonl)
    pub fn journal_path(&self) -> PathBuf {
        self.home.join("journal.jsonl")
    }
}

/// Convert a configured number of seconds, rejecting values chrono cannot represent
fn seconds(name: &str, value: u64) -> Result<chrono::Duration> {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .with_context(|| format!("{} is out of range: {}", name, value))
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".capturekit").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults
fn resolve(config: Option<(&Path, ConfigFile)>, default_home: PathBuf) -> ResolvedConfig {
    let Some((config_path, file)) = config else {
        return ResolvedConfig {
            home: default_home,
            config_file: None,
            credits: CreditSettings::default(),
            limits: LimitSettings::default(),
            service: ServiceSettings::default(),
        };
    };

    let capturekit_dir = config_path.parent().unwrap_or(Path::new("."));
    let home = file
        .home
        .as_deref()
        .map(|h| resolve_path(capturekit_dir, h))
        .unwrap_or(default_home);

    let credit_defaults = CreditSettings::default();
    let credits = match file.credits {
        Some(c) => CreditSettings {
            initial_balance: c.initial_balance.unwrap_or(credit_defaults.initial_balance),
            cost_per_request: c.cost_per_request.unwrap_or(credit_defaults.cost_per_request),
        },
        None => credit_defaults,
    };

    let limit_defaults = LimitSettings::default();
    let limits = match file.limits {
        Some(l) => LimitSettings {
            requests_per_window: l
                .requests_per_window
                .unwrap_or(limit_defaults.requests_per_window),
            window_seconds: l.window_seconds.unwrap_or(limit_defaults.window_seconds),
            error_freshness_seconds: l
                .error_freshness_seconds
                .unwrap_or(limit_defaults.error_freshness_seconds),
            call_timeout_seconds: l
                .call_timeout_seconds
                .unwrap_or(limit_defaults.call_timeout_seconds),
        },
        None => limit_defaults,
    };

    let service_defaults = ServiceSettings::default();
    let service = match file.service {
        Some(s) => ServiceSettings {
            base_url: s.base_url.unwrap_or(service_defaults.base_url),
            token: s.token,
            poll_interval_ms: s.poll_interval_ms.unwrap_or(service_defaults.poll_interval_ms),
        },
        None => service_defaults,
    };

    ResolvedConfig {
        home,
        config_file: Some(config_path.to_path_buf()),
        credits,
        limits,
        service,
    }
}

/// Environment variables win over everything else
fn apply_env_overrides(config: &mut ResolvedConfig) {
    if let Ok(home) = std::env::var("CAPTUREKIT_HOME") {
        config.home = PathBuf::from(home);
    }
    if let Ok(url) = std::env::var("CAPTUREKIT_SERVICE_URL") {
        config.service.base_url = url;
    }
    if let Ok(token) = std::env::var("CAPTUREKIT_SERVICE_TOKEN") {
        config.service.token = Some(token);
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".capturekit");

    let mut config = match find_config_file() {
        Some(config_path) => {
            let file = load_config_file(&config_path)?;
            resolve(Some((&config_path, file)), default_home)
        }
        None => resolve(None, default_home),
    };
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the capturekit home directory
pub fn capturekit_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}
