//! Configuration file management for drover.
//!
//! Provides a TOML-based config file at `~/.config/drover/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use drover_core::engine::{ClaudeCodeEngine, EngineConfig};
use drover_core::looping::RetryPolicy;

/// Engine used when nothing else names one.
pub const DEFAULT_ENGINE: &str = ClaudeCodeEngine::NAME;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default, rename = "loop")]
    pub looping: LoopSection,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Total attempts per iteration, including the first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_max_delay_secs: Option<u64>,
}

impl ConfigFile {
    /// What `drover init` writes: every built-in default spelled out.
    pub fn starter() -> Self {
        let retry = RetryPolicy::default();
        Self {
            engine: EngineSection {
                name: Some(DEFAULT_ENGINE.to_string()),
                model: None,
                provider: None,
                timeout_secs: Some(drover_core::engine::DEFAULT_TIMEOUT.as_secs()),
            },
            looping: LoopSection {
                max_iterations: None,
                retry_attempts: Some(retry.max_attempts),
                retry_base_delay_ms: Some(retry.base_delay.as_millis() as u64),
                retry_max_delay_secs: Some(retry.max_delay.as_secs()),
            },
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the drover config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/drover` or `~/.config/drover`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("drover");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("drover")
}

/// Return the path to the drover config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. A missing file is `None`; a broken one is
/// an error.
pub fn load_config(path: &Path) -> Result<Option<ConfigFile>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write a config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub engine: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_iterations: Option<u32>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone, PartialEq)]
pub struct DroverConfig {
    pub engine_name: String,
    pub engine: EngineConfig,
    pub max_iterations: Option<u32>,
    pub retry: RetryPolicy,
}

impl DroverConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    pub fn resolve(flags: &Overrides) -> Result<Self> {
        let file = load_config(&config_path())?.unwrap_or_default();
        Self::resolve_from(flags, |key| std::env::var(key).ok(), &file)
    }

    /// Resolution with the environment supplied as a lookup function.
    ///
    /// - engine: `--engine` > `DROVER_ENGINE` > `engine.name` > `claude`
    /// - model / provider: flag > `DROVER_MODEL` / `DROVER_PROVIDER` > file
    /// - timeout: `--timeout` > `DROVER_TIMEOUT_SECS` > `engine.timeout_secs`
    /// - max iterations: flag > `DROVER_MAX_ITERATIONS` > `loop.max_iterations`
    pub fn resolve_from<F>(flags: &Overrides, lookup: F, file: &ConfigFile) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let engine_name = flags
            .engine
            .clone()
            .or_else(|| env("DROVER_ENGINE"))
            .or_else(|| file.engine.name.clone())
            .unwrap_or_else(|| DEFAULT_ENGINE.to_string());

        let model = flags
            .model
            .clone()
            .or_else(|| env("DROVER_MODEL"))
            .or_else(|| file.engine.model.clone());

        let provider = flags
            .provider
            .clone()
            .or_else(|| env("DROVER_PROVIDER"))
            .or_else(|| file.engine.provider.clone());

        let timeout_secs = match flags.timeout_secs {
            Some(secs) => Some(secs),
            None => match env("DROVER_TIMEOUT_SECS") {
                Some(raw) => Some(parse_env::<u64>("DROVER_TIMEOUT_SECS", &raw)?),
                None => file.engine.timeout_secs,
            },
        };

        let max_iterations = match flags.max_iterations {
            Some(n) => Some(n),
            None => match env("DROVER_MAX_ITERATIONS") {
                Some(raw) => Some(parse_env::<u32>("DROVER_MAX_ITERATIONS", &raw)?),
                None => file.looping.max_iterations,
            },
        };
        // Zero means unbounded, the same as leaving it unset.
        let max_iterations = max_iterations.filter(|n| *n > 0);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: file
                .looping
                .retry_attempts
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            base_delay: file
                .looping
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: file
                .looping
                .retry_max_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_delay),
        };

        Ok(Self {
            engine_name,
            engine: EngineConfig {
                model,
                provider,
                timeout: timeout_secs.map(Duration::from_secs),
            },
            max_iterations,
            retry,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}"))
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
