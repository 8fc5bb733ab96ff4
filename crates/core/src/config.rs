use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Slot count used when nothing is configured.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 10;

/// Upper bound on partitions for a single distributed fan-out.
pub const DEFAULT_MAX_PARTITIONS: usize = 128;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

/// Parse a profiled env var. Unset keys yield `default`; set but malformed
/// keys are a [`ConfigError`] rather than a silent fallback.
fn profiled_env_parse<T>(profile: &str, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match profiled_env_opt(profile, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, &raw, e)),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub tiles: TilesConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TILESTAT_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = env_or("TILESTAT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, ConfigError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let config = Self {
            profile: p.to_string(),
            jobs: JobsConfig::from_env_profiled(p)?,
            tiles: TilesConfig::from_env_profiled(p),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(ConfigError::invalid(
                "MAX_CONCURRENT_JOBS",
                0,
                "must be a positive integer",
            ));
        }
        if self.jobs.max_partitions == 0 {
            return Err(ConfigError::invalid(
                "MAX_PARTITIONS",
                0,
                "must be a positive integer",
            ));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  jobs:   max_concurrent={}, worker_threads={}, max_partitions={}",
            self.jobs.max_concurrent_jobs,
            self.jobs.resolved_worker_threads(),
            self.jobs.max_partitions
        );
        tracing::info!(
            "  tiles:  dump={}",
            self.tiles
                .dump_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
    }
}

// ── Jobs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Number of job slots, i.e. distributed jobs allowed in flight at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Engine worker threads. 0 = available parallelism.
    #[serde(default)]
    pub worker_threads: usize,
    /// Cap on partitions per fan-out.
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,
}

fn default_max_concurrent_jobs() -> usize { DEFAULT_MAX_CONCURRENT_JOBS }
fn default_max_partitions() -> usize { DEFAULT_MAX_PARTITIONS }

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            worker_threads: 0,
            max_partitions: default_max_partitions(),
        }
    }
}

impl JobsConfig {
    fn from_env_profiled(p: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            max_concurrent_jobs: profiled_env_parse(
                p,
                "MAX_CONCURRENT_JOBS",
                DEFAULT_MAX_CONCURRENT_JOBS,
            )?,
            worker_threads: profiled_env_parse(p, "WORKER_THREADS", 0)?,
            max_partitions: profiled_env_parse(p, "MAX_PARTITIONS", DEFAULT_MAX_PARTITIONS)?,
        })
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}

// ── Tiles ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TilesConfig {
    /// JSON tile dump loaded into the in-memory tile store.
    #[serde(default)]
    pub dump_path: Option<PathBuf>,
}

impl TilesConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            dump_path: profiled_env_opt(p, "TILE_DUMP").map(PathBuf::from),
        }
    }
}
