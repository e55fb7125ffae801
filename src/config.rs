//! # Coordinator and Proxy Configuration
//!
//! Tuning for the segment scheduler, the stepper proxies and the simulated
//! controllers used by the harness and tests.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [coordinator]
//! remote_window = 30
//! queue_start_delay_ms = 500
//! default_velocity = 100.0
//! default_accel = 100.0
//! ack_timeout_ms = 10000
//!
//! [actuator]
//! poll_interval_ms = 10
//! motion_end_epsilon = 0.001
//!
//! [[simulator.axes]]
//! name = "x"
//! spu = 20.0
//! abs_max_velocity = 200.0
//! abs_max_accel = 10000.0
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Slots in the firmware's segment ring buffer.
pub const REMOTE_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Segment queue and modal defaults for one coordinator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    /// Segments the host may have outstanding per actuator, at most the
    /// firmware ring buffer size. One slot is always kept free.
    #[serde(default = "default_remote_window")]
    pub remote_window: usize,
    /// Buffering delay between the first enqueue and the first transmission.
    #[serde(default = "default_queue_start_delay_ms")]
    pub queue_start_delay_ms: u64,
    #[serde(default = "default_velocity")]
    pub default_velocity: f64,
    #[serde(default = "default_accel")]
    pub default_accel: f64,
    /// Entry and exit velocity of a queued segment as a fraction of its vmax.
    #[serde(default = "default_vi_fraction")]
    pub vi_fraction: f64,
    /// How long an in-flight segment may wait for all completions before the
    /// queue halts. `None` waits forever.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            remote_window: default_remote_window(),
            queue_start_delay_ms: default_queue_start_delay_ms(),
            default_velocity: default_velocity(),
            default_accel: default_accel(),
            vi_fraction: default_vi_fraction(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn queue_start_delay(&self) -> Duration {
        Duration::from_millis(self.queue_start_delay_ms)
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_window < 2 || self.remote_window > REMOTE_QUEUE_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "remote_window must be within 2..={}, got {}",
                REMOTE_QUEUE_CAPACITY, self.remote_window
            )));
        }
        if !(self.default_velocity > 0.0 && self.default_velocity.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "default_velocity must be positive, got {}",
                self.default_velocity
            )));
        }
        if !(self.default_accel > 0.0 && self.default_accel.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "default_accel must be positive, got {}",
                self.default_accel
            )));
        }
        if !(0.0..=1.0).contains(&self.vi_fraction) {
            return Err(ConfigError::Invalid(format!(
                "vi_fraction must be within 0..=1, got {}",
                self.vi_fraction
            )));
        }
        Ok(())
    }
}

/// Behaviour shared by every stepper proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Velocity magnitude below which an axis counts as stopped.
    #[serde(default = "default_motion_end_epsilon")]
    pub motion_end_epsilon: f64,
    #[serde(default)]
    pub motion_timeout_ms: Option<u64>,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            motion_end_epsilon: default_motion_end_epsilon(),
            motion_timeout_ms: None,
        }
    }
}

impl ActuatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn motion_timeout(&self) -> Option<Duration> {
        self.motion_timeout_ms.map(Duration::from_millis)
    }
}

/// Simulated controllers for the harness.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorConfig {
    /// Integration period of each simulated controller.
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,
    #[serde(default = "default_axes")]
    pub axes: Vec<SimAxisConfig>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_us: default_tick_us(),
            axes: default_axes(),
        }
    }
}

impl SimulatorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_micros(self.tick_us)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimAxisConfig {
    pub name: String,
    #[serde(default = "default_spu")]
    pub spu: f64,
    #[serde(default = "default_sim_max_velocity")]
    pub abs_max_velocity: f64,
    #[serde(default = "default_sim_max_accel")]
    pub abs_max_accel: f64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordinator.validate()?;
        if self.actuator.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be non-zero".into()));
        }
        if self.actuator.motion_end_epsilon <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "motion_end_epsilon must be positive, got {}",
                self.actuator.motion_end_epsilon
            )));
        }
        if self.simulator.tick_us == 0 {
            return Err(ConfigError::Invalid("tick_us must be non-zero".into()));
        }
        for axis in &self.simulator.axes {
            let limits = [
                ("spu", axis.spu),
                ("abs_max_velocity", axis.abs_max_velocity),
                ("abs_max_accel", axis.abs_max_accel),
            ];
            for (field, value) in limits {
                if !(value > 0.0 && value.is_finite()) {
                    return Err(ConfigError::Invalid(format!(
                        "axis '{}' needs a positive {}, got {}",
                        axis.name, field, value
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_remote_window() -> usize { 30 }
fn default_queue_start_delay_ms() -> u64 { 500 }
fn default_velocity() -> f64 { 100.0 }
fn default_accel() -> f64 { 100.0 }
fn default_vi_fraction() -> f64 { 0.25 }
fn default_ack_timeout_ms() -> Option<u64> { Some(10_000) }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_motion_end_epsilon() -> f64 { 0.001 }
fn default_tick_us() -> u64 { 1_000 }
fn default_spu() -> f64 { 20.0 }
fn default_sim_max_velocity() -> f64 { 200.0 }
fn default_sim_max_accel() -> f64 { 10_000.0 }

fn default_axes() -> Vec<SimAxisConfig> {
    ["x", "y", "z"]
        .iter()
        .map(|name| SimAxisConfig {
            name: name.to_string(),
            spu: default_spu(),
            abs_max_velocity: default_sim_max_velocity(),
            abs_max_accel: default_sim_max_accel(),
        })
        .collect()
}

/// Loads and validates a configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
