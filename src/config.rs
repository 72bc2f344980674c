use anyhow::{Context, Result};
use estim_lib::config::{ControllerConfig, LinkConfig, TriggerConfig};
use estim_lib::param::{PidParam, StimulationParam};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Contents of the optional `--config` TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub trigger: Option<TriggerConfig>,
    pub session: SessionSettings,
    pub parameters: StimulationParam,
    /// Sent once at startup when present
    pub pid: Option<PidParam>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            trigger: None,
            session: SessionSettings::default(),
            parameters: StimulationParam {
                frequency_hz: 100,
                positive_width_us: 200,
                negative_width_us: 200,
                dead_time_us: 50,
                positive_amp_ma: 1.0,
                negative_amp_ma: 1.0,
            },
            pid: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    /// Used by `start` without an argument and by the start button
    pub default_duration_secs: u32,
    pub tick_ms: u64,
    /// 0 disables the status watchdog
    pub status_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_duration_secs: 20 * 60,
            tick_ms: 1000,
            status_timeout_ms: 3000,
        }
    }
}

impl SessionSettings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            tick: Duration::from_millis(self.tick_ms),
            status_timeout: (self.status_timeout_ms > 0)
                .then(|| Duration::from_millis(self.status_timeout_ms)),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&text).with_context(|| format!("Invalid config file: {:?}", path))
    }
}
