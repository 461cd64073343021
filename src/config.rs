//! taskgate configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::ExecutorKind;

/// Main taskgate configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Executor selection and bound
    pub dispatch: DispatchConfig,

    /// Synthetic load for `taskgate run`
    pub load: LoadConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.parallelism == 0 {
            return Err(eyre::eyre!("dispatch.parallelism must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskgate.yml
        let local_config = PathBuf::from(".taskgate.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskgate/taskgate.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskgate").join("taskgate.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Executor selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Executor variant
    pub variant: ExecutorKind,

    /// Maximum concurrently running tasks
    pub parallelism: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            variant: ExecutorKind::Queued,
            parallelism: 4,
        }
    }
}

/// Synthetic load parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Number of tasks to submit
    pub tasks: usize,

    /// Simulated duration of each task in milliseconds
    #[serde(rename = "task-ms")]
    pub task_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { tasks: 20, task_ms: 50 }
    }
}

impl LoadConfig {
    /// Get the task duration as a Duration
    pub fn task_duration(&self) -> Duration {
        Duration::from_millis(self.task_ms)
    }
}
