//! The two plugin registries and the startup routine that fills them.
//!
//! Registration happens once, in [`register_builtin_plugins`], before any
//! lookup. [`global`] runs it on first use; tests and embedders can build
//! their own [`Plugins`] instead.

use std::sync::{Arc, OnceLock};

use tracing::{error, info, warn};

use crate::bus::BusHub;
use crate::config::{CommonConfig, SimConfig, SimulatorConfig};
use crate::error::SimError;
use crate::model::{devices, HardwareModel, ModelContext, SensorModel};
use crate::provider::truth_socket::SocketSettings;
use crate::provider::{point_descriptor, DataProvider, SyntheticProvider, TruthFileProvider, TruthSocketProvider};
use crate::registry::Registry;
use crate::telemetry::FrameCapture;

pub type DataProviderRegistry = Registry<SimulatorConfig, Box<dyn DataProvider>>;
pub type HardwareModelRegistry = Registry<ModelContext, Arc<dyn HardwareModel>>;

pub struct Plugins {
    providers: Arc<DataProviderRegistry>,
    models: HardwareModelRegistry,
}

impl Plugins {
    pub fn new(providers: DataProviderRegistry, models: HardwareModelRegistry) -> Self {
        Self {
            providers: Arc::new(providers),
            models,
        }
    }

    /// Registries holding every built-in provider and model.
    pub fn builtin() -> Self {
        let mut providers = DataProviderRegistry::new("data provider");
        let mut models = HardwareModelRegistry::new("hardware model");
        register_builtin_plugins(&mut providers, &mut models);
        Self::new(providers, models)
    }

    pub fn providers(&self) -> Arc<DataProviderRegistry> {
        Arc::clone(&self.providers)
    }

    pub fn models(&self) -> &HardwareModelRegistry {
        &self.models
    }

    /// Build the simulator described by `config` using the model registered
    /// under its `hardware-model.type`.
    pub fn create_model(
        &self,
        config: &SimulatorConfig,
        common: &CommonConfig,
        hub: &Arc<BusHub>,
        capture: Option<Arc<FrameCapture>>,
    ) -> Result<Arc<dyn HardwareModel>, SimError> {
        let ctx = ModelContext {
            config: config.clone(),
            common: common.clone(),
            providers: self.providers(),
            hub: Arc::clone(hub),
            capture,
        };
        self.models.create(&config.hardware_model.model_type, &ctx)
    }

    /// Create and start every active simulator in `config`, in file order.
    ///
    /// A simulator that fails to build or start is logged and skipped; the
    /// rest still run.
    pub fn start_simulators(
        &self,
        config: &SimConfig,
        hub: &Arc<BusHub>,
        capture: Option<&Arc<FrameCapture>>,
    ) -> Vec<Arc<dyn HardwareModel>> {
        let mut models = Vec::new();
        for simulator in &config.simulators {
            if !simulator.active {
                warn!("{} is not active, skipping", simulator.name);
                continue;
            }
            let started = self
                .create_model(simulator, &config.common, hub, capture.cloned())
                .and_then(|model| model.start().map(|()| model));
            match started {
                Ok(model) => models.push(model),
                Err(e) => error!("{}: failed to start: {}", simulator.name, e),
            }
        }
        models
    }
}

impl Default for Plugins {
    fn default() -> Self {
        Self::builtin()
    }
}

fn create_truth_file(config: &SimulatorConfig) -> Result<Box<dyn DataProvider>, SimError> {
    let provider = config.data_provider();
    let path = provider
        .get_str("path")
        .ok_or_else(|| SimError::Config(format!("{}: TRUTHFILE provider needs a path", config.name)))?;
    Ok(Box::new(TruthFileProvider::load(path, point_descriptor(config)?)?))
}

fn create_truth_socket(config: &SimulatorConfig) -> Result<Box<dyn DataProvider>, SimError> {
    let settings = SocketSettings::from_config(&config.data_provider());
    Ok(Box::new(TruthSocketProvider::connect(settings, point_descriptor(config)?)?))
}

/// Register the built-in providers, then one model per device table entry.
pub fn register_builtin_plugins(providers: &mut DataProviderRegistry, models: &mut HardwareModelRegistry) {
    providers.register("SYNTHETIC", |config: &SimulatorConfig| {
        let provider: Box<dyn DataProvider> = Box::new(SyntheticProvider::new(point_descriptor(config)?));
        Ok(provider)
    });
    providers.register("TRUTHFILE", create_truth_file);
    providers.register("42SOCKET", create_truth_socket);

    for device in devices::DEVICES {
        models.register(device.model_type, move |ctx: &ModelContext| {
            let model: Arc<dyn HardwareModel> = SensorModel::create(device, ctx)?;
            Ok(model)
        });
    }
    info!(
        "{} data providers and {} hardware models registered",
        providers.len(),
        models.len()
    );
}

static GLOBAL: OnceLock<Plugins> = OnceLock::new();

/// Process-wide registries, filled with the built-ins on first use.
pub fn global() -> &'static Plugins {
    GLOBAL.get_or_init(Plugins::builtin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Lifecycle;

    #[test]
    fn test_builtin_keys() {
        let plugins = Plugins::builtin();
        assert_eq!(plugins.providers().keys(), vec!["42SOCKET", "SYNTHETIC", "TRUTHFILE"]);
        assert_eq!(plugins.models().keys(), vec!["CAMERA", "GENERIC_MAG", "SAMPLE"]);
    }

    #[test]
    fn test_create_model_by_type() {
        let hub = Arc::new(BusHub::default());
        let config = SimulatorConfig::new("cam", "CAMERA");
        let model = global().create_model(&config, &CommonConfig::default(), &hub, None).unwrap();
        assert_eq!(model.model_type(), "CAMERA");
        assert_eq!(model.lifecycle(), Lifecycle::Constructed);
    }

    #[test]
    fn test_unknown_model_type() {
        let hub = Arc::new(BusHub::default());
        let config = SimulatorConfig::new("x", "FLUX_CAPACITOR");
        let err = global().create_model(&config, &CommonConfig::default(), &hub, None).err().unwrap();
        assert!(matches!(err, SimError::UnknownPlugin { .. }));
    }

    #[test]
    fn test_failed_simulator_does_not_block_others() {
        let hub = Arc::new(BusHub::default());
        let config = SimConfig {
            common: CommonConfig::default(),
            simulators: vec![SimulatorConfig::new("flux", "FLUX"), SimulatorConfig::new("sample", "SAMPLE")],
        };
        let models = global().start_simulators(&config, &hub, None);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name(), "sample");
        assert_eq!(models[0].lifecycle(), Lifecycle::Running);
    }

    #[test]
    fn test_truth_file_needs_path() {
        let mut config = SimulatorConfig::new("mag", "GENERIC_MAG");
        config.hardware_model.data_provider = Some(crate::config::DataProviderConfig {
            provider_type: Some("TRUTHFILE".to_string()),
            ..Default::default()
        });
        assert!(matches!(global().providers().create("TRUTHFILE", &config), Err(SimError::Config(_))));
    }
}
