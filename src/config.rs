//! Simulator configuration tree.
//!
//! One JSON document describes the shared `common` settings and every
//! simulator in the run. Each simulator section carries the framework-level
//! keys (`hardware-model.type`, `hardware-model.data-provider.type`,
//! `hostname`, `port`) plus device-specific extras, which are kept untyped.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bus::BusKind;
use crate::error::SimError;

const DEFAULT_ABSOLUTE_START_TIME: f64 = 552_110_400.0;
const DEFAULT_MICROSECONDS_PER_TICK: i64 = 1_000_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimConfig {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub simulators: Vec<SimulatorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommonConfig {
    #[serde(default = "default_absolute_start_time")]
    pub absolute_start_time: f64,
    #[serde(default = "default_microseconds_per_tick")]
    pub sim_microseconds_per_tick: i64,
    #[serde(default = "default_microseconds_per_tick")]
    pub real_microseconds_per_tick: i64,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            absolute_start_time: DEFAULT_ABSOLUTE_START_TIME,
            sim_microseconds_per_tick: DEFAULT_MICROSECONDS_PER_TICK,
            real_microseconds_per_tick: DEFAULT_MICROSECONDS_PER_TICK,
        }
    }
}

impl CommonConfig {
    /// Absolute simulation time in seconds for a tick count.
    pub fn ticks_to_time(&self, ticks: u64) -> f64 {
        self.absolute_start_time + (ticks as f64 * self.sim_microseconds_per_tick as f64) / 1_000_000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimulatorConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub hardware_model: HardwareModelConfig,
}

impl SimulatorConfig {
    pub fn new(name: &str, model_type: &str) -> Self {
        Self {
            name: name.to_string(),
            active: true,
            hardware_model: HardwareModelConfig {
                model_type: model_type.to_string(),
                data_provider: None,
                connections: Vec::new(),
                default_streams: Vec::new(),
                schedule_policy: None,
                extra: Map::new(),
            },
        }
    }

    /// First connection of the given kind, if the simulator declares one.
    pub fn connection(&self, kind: ConnectionKind) -> Option<&ConnectionConfig> {
        self.hardware_model.connections.iter().find(|c| c.kind == kind)
    }

    /// Data provider section, or an empty one when the model did not declare it.
    pub fn data_provider(&self) -> DataProviderConfig {
        self.hardware_model.data_provider.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HardwareModelConfig {
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default)]
    pub data_provider: Option<DataProviderConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub default_streams: Vec<StreamConfig>,
    #[serde(default)]
    pub schedule_policy: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataProviderConfig {
    #[serde(rename = "type", default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub spacecraft: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataProviderConfig {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Usart,
    I2c,
    Spi,
    Command,
    Time,
}

impl ConnectionKind {
    pub fn bus_kind(self) -> Option<BusKind> {
        match self {
            ConnectionKind::Usart => Some(BusKind::Uart),
            ConnectionKind::I2c => Some(BusKind::I2c),
            ConnectionKind::Spi => Some(BusKind::Spi),
            ConnectionKind::Command => Some(BusKind::Command),
            ConnectionKind::Time => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectionConfig {
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    pub bus_name: String,
    #[serde(default)]
    pub node_port: Option<u16>,
    #[serde(default)]
    pub address: Option<u8>,
    #[serde(default)]
    pub chip_select: Option<u8>,
    #[serde(default)]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamConfig {
    pub name: String,
    /// Seconds after the absolute start time before the first period begins.
    #[serde(default = "default_initial_stream_time")]
    pub initial_stream_time: f64,
    #[serde(default = "default_stream_period_ms")]
    pub stream_period_ms: u32,
}

impl SimConfig {
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn simulator(&self, name: &str) -> Option<&SimulatorConfig> {
        self.simulators.iter().find(|s| s.name == name)
    }

    pub fn active_simulators(&self) -> impl Iterator<Item = &SimulatorConfig> {
        self.simulators.iter().filter(|s| s.active)
    }

    fn validate(&self) -> Result<(), SimError> {
        if self.common.sim_microseconds_per_tick <= 0 || self.common.real_microseconds_per_tick <= 0 {
            return Err(SimError::Config("microseconds-per-tick must be positive".to_string()));
        }
        for (index, simulator) in self.simulators.iter().enumerate() {
            if self.simulators[..index].iter().any(|s| s.name == simulator.name) {
                return Err(SimError::Config(format!("duplicate simulator name {}", simulator.name)));
            }
        }
        Ok(())
    }
}

fn default_absolute_start_time() -> f64 {
    DEFAULT_ABSOLUTE_START_TIME
}

fn default_microseconds_per_tick() -> i64 {
    DEFAULT_MICROSECONDS_PER_TICK
}

fn default_true() -> bool {
    true
}

fn default_initial_stream_time() -> f64 {
    1.0
}

fn default_stream_period_ms() -> u32 {
    1
}
