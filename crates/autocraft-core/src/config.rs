//! Crafting manager configuration.
//!
//! Configuration can be loaded from and saved to a TOML file. Missing or
//! invalid files fall back to defaults.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "autocraft.toml";

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Failure threshold would fire before the warning
    #[error("stall_failure_ticks ({failure}) is lower than stall_warning_ticks ({warning})")]
    StallThresholds {
        /// Warning threshold
        warning: u32,
        /// Failure threshold
        failure: u32,
    },
    /// Event channel cannot hold anything
    #[error("event_capacity must be at least 1")]
    ZeroEventCapacity,
}

/// What happens to active tasks whose pattern disappears in a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPolicy {
    /// Tasks keep running with the pattern they were bound to
    #[default]
    KeepBound,
    /// Tasks fail and return their gathered ingredients
    CancelOrphaned,
}

/// Crafting manager configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Ticks without progress before a stall warning (None = never)
    pub stall_warning_ticks: Option<u32>,
    /// Ticks without progress before a task fails (None = wait forever)
    pub stall_failure_ticks: Option<u32>,
    /// Handling of tasks orphaned by a rebuild
    pub rebuild_policy: RebuildPolicy,
    /// Schedule sub-tasks for missing ingredients
    pub spawn_subtasks: bool,
    /// Upper bound on active tasks for `schedule` (None = unbounded)
    pub max_active_tasks: Option<usize>,
    /// Event channel capacity
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stall_warning_ticks: Some(1200), // one minute at 20 ticks/s
            stall_failure_ticks: None,
            rebuild_policy: RebuildPolicy::KeepBound,
            spawn_subtasks: true,
            max_active_tasks: None,
            event_capacity: 1024,
        }
    }
}

impl ManagerConfig {
    /// Checks value combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(warning), Some(failure)) = (self.stall_warning_ticks, self.stall_failure_ticks)
        {
            if failure < warning {
                return Err(ConfigError::StallThresholds { warning, failure });
            }
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }

    /// Load configuration from a specific path.
    /// Returns default config if the file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read config file: {e}");
                return Self::default();
            },
        };

        match toml::from_str::<Self>(&contents) {
            Ok(config) => match config.validate() {
                Ok(()) => {
                    info!("Loaded config from {}", path.display());
                    config
                },
                Err(e) => {
                    warn!("Invalid config in {}: {e}", path.display());
                    Self::default()
                },
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }
}
