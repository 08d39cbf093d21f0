use crate::consts::*;
use crate::errors::*;
use crate::method::ControlMethod;
use crate::util::*;

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use smart_default::SmartDefault;

make_log_macro!(debug, "config");

#[derive(Deserialize, Clone, Debug, PartialEq, SmartDefault)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Method to start with, when the hardware supports it.
    pub method: Option<ControlMethod>,

    /// Pause between two gamma writes while converging on a new level.
    #[default(200)]
    #[serde(deserialize_with = "deserialize_gamma_interval")]
    pub gamma_interval_ms: u64,
}

impl MonitorConfig {
    pub fn gamma_interval(&self) -> Duration {
        Duration::from_millis(self.gamma_interval_ms)
    }
}

fn deserialize_gamma_interval<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let interval = Deserialize::deserialize(deserializer)?;
    debug!("{:?}", interval);

    if !GAMMA_INTERVAL_RANGE.contains(&interval) {
        return Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Unsigned(interval),
            &"number of milliseconds in the range of 10 to 2000",
        ));
    }

    Ok(interval)
}

fn deserialize_step<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let step = Deserialize::deserialize(deserializer)?;
    debug!("{:?}", step);

    if !STEP_RANGE.contains(&step) {
        return Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Float(step),
            &"number in the range of 0.001 to 1.0",
        ));
    }

    Ok(step)
}

#[derive(Deserialize, Clone, Debug, SmartDefault)]
#[serde(default)]
pub struct EngineConfig {
    /// Relative adjustment applied per wheel or key event.
    #[default(0.05)]
    #[serde(deserialize_with = "deserialize_step")]
    pub step: f64,
    global: MonitorConfig,
    #[serde(flatten)]
    overrides: HashMap<String, MonitorConfig>,
}

impl EngineConfig {
    /// Read the user's config file, or fall back to the defaults if there is none.
    pub async fn new() -> Result<Self> {
        if let Some(config_path) = find_file("config", None, Some("toml")) {
            debug!("reading {}", config_path.display());
            deserialize_toml_file(config_path).await
        } else {
            Ok(EngineConfig::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        deserialize_toml_str(contents)
    }

    pub(crate) fn monitor_config(&self, output_name: &str) -> &MonitorConfig {
        if let Some(monitor_config) = self.overrides.get(output_name) {
            debug!("{}: {:?}", output_name, monitor_config);
            monitor_config
        } else {
            &self.global
        }
    }
}
