//! Settings layered from defaults, `levitate-env/config.toml` files and
//! `LEVITATE_ENV_*` environment variables (later layers win).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::constraint::{DEFAULT_PROBE_MAX, ProbeRange};
use crate::error::{Error, Result};
use crate::provider::RetryPolicy;

const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LOCK_STALE_SECS: u64 = 24 * 60 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const MIN_HTTP_TIMEOUT_SECS: u64 = 5;
const MAX_HTTP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const MAX_PARALLELISM: usize = 8;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Effective settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub envs_root: PathBuf,
    pub index_url: Option<String>,
    pub probe_max_component: u64,
    pub lock_timeout: Duration,
    pub lock_stale_after: Duration,
    pub http_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub parallelism: usize,
    pub cache_ttl: Duration,
    pub interpreters: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    envs_root: Option<PathBuf>,
    index_url: Option<String>,
    probe_max_component: Option<u64>,
    lock_timeout_secs: Option<u64>,
    lock_stale_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    parallelism: Option<usize>,
    cache_ttl_secs: Option<u64>,
    interpreters: Option<Vec<String>>,
}

impl SettingsToml {
    fn merge(&mut self, other: SettingsToml) {
        if other.envs_root.is_some() {
            self.envs_root = other.envs_root;
        }
        if other.index_url.is_some() {
            self.index_url = other.index_url;
        }
        if other.probe_max_component.is_some() {
            self.probe_max_component = other.probe_max_component;
        }
        if other.lock_timeout_secs.is_some() {
            self.lock_timeout_secs = other.lock_timeout_secs;
        }
        if other.lock_stale_secs.is_some() {
            self.lock_stale_secs = other.lock_stale_secs;
        }
        if other.http_timeout_secs.is_some() {
            self.http_timeout_secs = other.http_timeout_secs;
        }
        if other.retries.is_some() {
            self.retries = other.retries;
        }
        if other.retry_backoff_ms.is_some() {
            self.retry_backoff_ms = other.retry_backoff_ms;
        }
        if other.parallelism.is_some() {
            self.parallelism = other.parallelism;
        }
        if other.cache_ttl_secs.is_some() {
            self.cache_ttl_secs = other.cache_ttl_secs;
        }
        if other.interpreters.is_some() {
            self.interpreters = other.interpreters;
        }
    }

    /// Apply `LEVITATE_ENV_*` overrides read through `var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = var("LEVITATE_ENV_ROOT") {
            self.envs_root = Some(PathBuf::from(root));
        }
        if let Some(url) = var("LEVITATE_ENV_INDEX") {
            self.index_url = Some(url);
        }
        if let Some(raw) = var("LEVITATE_ENV_PROBE_MAX") {
            self.probe_max_component = Some(parse_env("LEVITATE_ENV_PROBE_MAX", &raw)?);
        }
        if let Some(raw) = var("LEVITATE_ENV_LOCK_TIMEOUT") {
            self.lock_timeout_secs = Some(parse_env("LEVITATE_ENV_LOCK_TIMEOUT", &raw)?);
        }
        if let Some(raw) = var("LEVITATE_ENV_HTTP_TIMEOUT") {
            self.http_timeout_secs = Some(parse_env("LEVITATE_ENV_HTTP_TIMEOUT", &raw)?);
        }
        Ok(())
    }

    fn build(self) -> Settings {
        Settings {
            envs_root: self.envs_root.unwrap_or_else(default_envs_root),
            index_url: self.index_url.filter(|url| !url.trim().is_empty()),
            probe_max_component: self.probe_max_component.unwrap_or(DEFAULT_PROBE_MAX),
            lock_timeout: Duration::from_secs(self.lock_timeout_secs.unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS)),
            lock_stale_after: Duration::from_secs(self.lock_stale_secs.unwrap_or(DEFAULT_LOCK_STALE_SECS)),
            http_timeout: Duration::from_secs(
                self.http_timeout_secs
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS)
                    .clamp(MIN_HTTP_TIMEOUT_SECS, MAX_HTTP_TIMEOUT_SECS),
            ),
            retries: self.retries.unwrap_or(DEFAULT_RETRIES).max(1),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS)),
            parallelism: self
                .parallelism
                .unwrap_or_else(num_cpus::get)
                .clamp(1, MAX_PARALLELISM),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            interpreters: self
                .interpreters
                .filter(|list| !list.is_empty())
                .unwrap_or_else(|| vec!["python3".to_string()]),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        SettingsToml::default().build()
    }
}

impl Settings {
    /// Load settings: system and user config files, then `explicit` (which
    /// must exist when given), then environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut merged = SettingsToml::default();
        for path in find_config_files() {
            if path.exists() {
                merged.merge(read_toml(&path)?);
            }
        }
        if let Some(path) = explicit {
            merged.merge(read_toml(path)?);
        }
        merged.apply_env(|name| std::env::var(name).ok())?;
        Ok(merged.build())
    }

    /// Parse a single TOML document on top of the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let parsed: SettingsToml = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        Ok(parsed.build())
    }

    pub fn probe_range(&self) -> ProbeRange {
        ProbeRange {
            max_component: self.probe_max_component,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retries,
            backoff: self.retry_backoff,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name}={raw:?} is not a valid number")))
}

fn read_toml(path: &Path) -> Result<SettingsToml> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    toml::from_str(&text).map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display())))
}

fn split_xdg_config_dirs() -> Vec<PathBuf> {
    let raw = std::env::var("XDG_CONFIG_DIRS").unwrap_or_else(|_| "/etc/xdg".to_owned());
    raw.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn find_config_files() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = split_xdg_config_dirs()
        .into_iter()
        .map(|dir| dir.join("levitate-env").join("config.toml"))
        .collect();
    if let Some(home) = dirs::config_dir() {
        paths.push(home.join("levitate-env").join("config.toml"));
    }
    paths
}

fn default_envs_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".").join(".local").join("share"))
        .join("levitate-env")
        .join("envs")
}
