//! Runtime configuration for the stage pipeline.
//!
//! This module locates the external tools and holds the monitor cadence.
//! Scientific parameters live in [`crate::params`]; nothing here changes
//! what is simulated, only how the tools are reached and supervised.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::runner::ToolCommand;

/// Default environment variable used to pin the engine to one device.
pub const DEFAULT_DEVICE_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Commands for every external program the pipeline drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Simulation engine (`pmemd.cuda`).
    pub engine: ToolCommand,
    /// Structure builder (`tleap`).
    pub tleap: ToolCommand,
    /// Hydrogen mass repartitioner (`parmed.py`).
    pub parmed: ToolCommand,
    /// Topology/coordinates to PDB converter (`ambpdb`).
    pub ambpdb: ToolCommand,
    /// Trajectory reimaging tool (`cpptraj`).
    pub cpptraj: ToolCommand,
    /// Frame dumper (`vmd` in text mode).
    pub vmd: ToolCommand,
}

impl Toolchain {
    /// Standard AMBER layout: engine, cpptraj and ambpdb under `$AMBERHOME/bin`,
    /// everything else resolved through `PATH`.
    pub fn amber(amber_home: Option<&Path>) -> Self {
        let in_home = |name: &str| match amber_home {
            Some(home) => ToolCommand::new(home.join("bin").join(name)),
            None => ToolCommand::new(name),
        };
        Self {
            engine: in_home("pmemd.cuda"),
            tleap: ToolCommand::new("tleap"),
            parmed: ToolCommand::new("parmed.py"),
            ambpdb: in_home("ambpdb"),
            cpptraj: in_home("cpptraj"),
            vmd: ToolCommand::new("vmd"),
        }
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::amber(None)
    }
}

/// Configuration for the pipeline orchestrator and production monitor.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// External programs.
    pub toolchain: Toolchain,
    /// Time between two monitor ticks.
    pub poll_interval: Duration,
    /// Run an incremental frame dump every this many ticks.
    pub snapshot_every: u64,
    /// Consecutive ticks without readable progress before a warning is logged.
    pub stale_warn_ticks: u64,
    /// Environment variable carrying the device identifier to the engine.
    pub device_env: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            toolchain: Toolchain::default(),
            poll_interval: Duration::from_secs(30),
            snapshot_every: 100,
            stale_warn_ticks: 20,
            device_env: DEFAULT_DEVICE_ENV.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `AMBERHOME`: AMBER installation root (engine, cpptraj, ambpdb)
    /// - `MDFORGE_ENGINE`, `MDFORGE_TLEAP`, `MDFORGE_PARMED`, `MDFORGE_AMBPDB`,
    ///   `MDFORGE_CPPTRAJ`, `MDFORGE_VMD`: per-tool command lines
    /// - `MDFORGE_POLL_INTERVAL_SECS`: monitor tick interval (default: 30)
    /// - `MDFORGE_SNAPSHOT_EVERY`: ticks between incremental dumps (default: 100)
    /// - `MDFORGE_STALE_WARN_TICKS`: ticks without progress before warning (default: 20)
    /// - `MDFORGE_DEVICE_ENV`: device variable name (default: CUDA_VISIBLE_DEVICES)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`PipelineConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let amber_home = lookup("AMBERHOME").map(PathBuf::from);
        let mut config = Self {
            toolchain: Toolchain::amber(amber_home.as_deref()),
            ..Self::default()
        };

        let tools: [(&str, &mut ToolCommand); 6] = [
            ("MDFORGE_ENGINE", &mut config.toolchain.engine),
            ("MDFORGE_TLEAP", &mut config.toolchain.tleap),
            ("MDFORGE_PARMED", &mut config.toolchain.parmed),
            ("MDFORGE_AMBPDB", &mut config.toolchain.ambpdb),
            ("MDFORGE_CPPTRAJ", &mut config.toolchain.cpptraj),
            ("MDFORGE_VMD", &mut config.toolchain.vmd),
        ];
        for (key, slot) in tools {
            if let Some(val) = lookup(key) {
                *slot = parse_tool_command(&val, key)?;
            }
        }

        if let Some(val) = lookup("MDFORGE_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "MDFORGE_POLL_INTERVAL_SECS")?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("MDFORGE_SNAPSHOT_EVERY") {
            config.snapshot_every = parse_env_value(&val, "MDFORGE_SNAPSHOT_EVERY")?;
        }

        if let Some(val) = lookup("MDFORGE_STALE_WARN_TICKS") {
            config.stale_warn_ticks = parse_env_value(&val, "MDFORGE_STALE_WARN_TICKS")?;
        }

        if let Some(val) = lookup("MDFORGE_DEVICE_ENV") {
            config.device_env = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.snapshot_every == 0 {
            return Err(ConfigError::ValidationFailed(
                "snapshot_every must be greater than 0".to_string(),
            ));
        }

        if self.stale_warn_ticks == 0 {
            return Err(ConfigError::ValidationFailed(
                "stale_warn_ticks must be greater than 0".to_string(),
            ));
        }

        if self.device_env.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "device_env cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the toolchain.
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// Builder method to set the monitor tick interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the incremental dump cadence.
    pub fn with_snapshot_every(mut self, ticks: u64) -> Self {
        self.snapshot_every = ticks;
        self
    }

    /// Builder method to set the stale-progress warning threshold.
    pub fn with_stale_warn_ticks(mut self, ticks: u64) -> Self {
        self.stale_warn_ticks = ticks;
        self
    }

    /// Builder method to set the device environment variable.
    pub fn with_device_env(mut self, name: impl Into<String>) -> Self {
        self.device_env = name.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse a whitespace-separated command line into a tool command.
fn parse_tool_command(value: &str, key: &str) -> Result<ToolCommand, ConfigError> {
    let mut parts = value.split_whitespace();
    let program = parts.next().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        message: "command cannot be empty".to_string(),
    })?;
    Ok(ToolCommand::new(program).with_args(parts))
}
