//! Runtime selection values handed to the library by the composition root.
//! Nothing in this crate reads files or arguments.

use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which main link to drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConfig {
    Hardware {
        #[serde(default = "default_spi_device")]
        device: String,
        #[serde(default = "default_spi_speed")]
        speed_hz: u32,
    },
    Simulated {
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig::Simulated { seed: None }
    }
}

fn default_spi_device() -> String {
    SPI_DEFAULT_DEVICE.to_string()
}

fn default_spi_speed() -> u32 {
    SPI_DEFAULT_SPEED_HZ
}

/// Serial port carrying the physical start button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    BUTTON_BAUD_RATE
}

/// Simulated link settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub period: Duration,
    /// Fixed RNG seed for reproducible telemetry
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            period: SIM_PERIOD,
            seed: None,
        }
    }
}

/// Session controller timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Countdown resolution
    pub tick: Duration,
    /// Stop a running session when no status packet arrives for this long
    pub status_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick: SESSION_TICK,
            status_timeout: Some(DEFAULT_STATUS_TIMEOUT),
        }
    }
}
