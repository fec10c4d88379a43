//! Hardware models: one simulated device bound to its buses.

pub mod devices;
pub mod sensor;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::BusHub;
use crate::config::{CommonConfig, SimulatorConfig};
use crate::error::SimError;
use crate::plugins::DataProviderRegistry;
use crate::telemetry::FrameCapture;

pub use devices::{DeviceDescriptor, StreamKind};
pub use sensor::{ModelStats, SensorModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Buses attached, provider created, streams loaded. Callbacks are ignored.
    Constructed,
    Running,
    /// Buses detached. There is no way back.
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Constructed => "constructed",
            Lifecycle::Running => "running",
            Lifecycle::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Everything a model factory needs to build and wire one simulator.
#[derive(Clone)]
pub struct ModelContext {
    pub config: SimulatorConfig,
    pub common: CommonConfig,
    pub providers: Arc<DataProviderRegistry>,
    pub hub: Arc<BusHub>,
    pub capture: Option<Arc<FrameCapture>>,
}

pub trait HardwareModel: Send + Sync {
    fn name(&self) -> &str;

    fn model_type(&self) -> &str;

    fn lifecycle(&self) -> Lifecycle;

    /// # Errors
    ///
    /// [`SimError::Stopped`] once the model has been stopped.
    fn start(&self) -> Result<(), SimError>;

    /// Detach from every bus. Idempotent.
    fn stop(&self);

    /// Handle an out-of-band text command and produce the reply.
    fn on_command(&self, message: &str) -> String;

    /// Advance to absolute simulation time `time` (seconds).
    fn on_tick(&self, time: f64);
}
