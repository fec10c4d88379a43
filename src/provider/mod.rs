//! Data providers: where a hardware model gets its truth values from.

pub mod synthetic;
pub mod truth_file;
pub mod truth_socket;

use std::fmt::Write as _;

use crate::config::SimulatorConfig;
use crate::data_point::{PointDescriptor, SensorPoint, MAX_FIELDS};
use crate::error::{ProviderError, SimError};
use crate::model::devices;

pub use synthetic::SyntheticProvider;
pub use truth_file::TruthFileProvider;
pub use truth_socket::TruthSocketProvider;

const DEFAULT_FIELD: &str = "svb";
const DEFAULT_FIELD_COUNT: usize = 3;

pub trait DataProvider: Send {
    /// Produce the current data point. Each call bumps the request counter.
    fn data_point(&mut self) -> Result<SensorPoint, ProviderError>;

    /// How many points have been requested so far.
    fn request_count(&self) -> u64;

    /// Forward an attitude command to the truth source. Providers without a
    /// command channel ignore every command.
    fn forward_command(&mut self, command: &TruthCommand) {
        let _ = command;
    }
}

/// Attitude commands understood by the truth source.
///
/// Vectors are in the body frame of body 0, the primary vector of the
/// commanding spacecraft.
#[derive(Debug, Clone, PartialEq)]
pub enum TruthCommand {
    QuaternionQrn([f64; 4]),
    QuaternionQrl([f64; 4]),
    Angles([f64; 3]),
    AnglesWrtFrame { angles: [f64; 3], sequence: u16, frame: char },
    VectorRaDec { vector: [f64; 3], ra: f64, dec: f64 },
    VectorWorld { vector: [f64; 3], world: u32 },
    VectorWorldLngLatAlt { vector: [f64; 3], world: u32, lng: f64, lat: f64, alt: f64 },
    VectorGroundStation { vector: [f64; 3], station: u32 },
    VectorSc { vector: [f64; 3], spacecraft: u32 },
    VectorScPoint { vector: [f64; 3], spacecraft: u32, body: u32, point: [f64; 3] },
    VectorPointAt { vector: [f64; 3], target: String },
    Align { vector: [f64; 3], spacecraft: u32, body: u32, target: [f64; 3] },
    AlignFrame { vector: [f64; 3], frame: char, target: [f64; 3] },
}

fn triple(v: &[f64; 3]) -> String {
    format!("[{:.6} {:.6} {:.6}]", v[0], v[1], v[2])
}

impl TruthCommand {
    /// Command script line, stamped with seconds elapsed since the start time.
    pub fn to_script_line(&self, elapsed: f64, spacecraft: u16) -> String {
        let mut line = format!("{elapsed:.6} ");
        let sc = spacecraft;
        let _ = match self {
            TruthCommand::QuaternionQrn(q) => {
                write!(line, "SC[{sc}] qrn = [{:.6} {:.6} {:.6} {:.6}]", q[0], q[1], q[2], q[3])
            }
            TruthCommand::QuaternionQrl(q) => {
                write!(line, "SC[{sc}] qrl = [{:.6} {:.6} {:.6} {:.6}]", q[0], q[1], q[2], q[3])
            }
            TruthCommand::Angles(a) => write!(line, "SC[{sc}].G[0] Cmd Angles = {}", triple(a)),
            TruthCommand::AnglesWrtFrame { angles, sequence, frame } => {
                write!(line, "SC[{sc}] Cmd Angles = {} Seq = {sequence} wrt {frame} Frame", triple(angles))
            }
            TruthCommand::VectorRaDec { vector, ra, dec } => write!(
                line,
                "Point SC[{sc}].B[0] Primary Vector {} at RA = {ra:.6} Dec = {dec:.6}",
                triple(vector)
            ),
            TruthCommand::VectorWorld { vector, world } => {
                write!(line, "Point SC[{sc}].B[0] Primary Vector {} at World[{world}]", triple(vector))
            }
            TruthCommand::VectorWorldLngLatAlt { vector, world, lng, lat, alt } => write!(
                line,
                "Point SC[{sc}].B[0] Primary Vector {} at World[{world}] Lng = {lng:.6} Lat = {lat:.6} Alt = {alt:.6}",
                triple(vector)
            ),
            TruthCommand::VectorGroundStation { vector, station } => {
                write!(line, "Point SC[{sc}].B[0] Primary Vector {} at GroundStation[{station}]", triple(vector))
            }
            TruthCommand::VectorScPoint { vector, spacecraft, body, point } => write!(
                line,
                "Point SC[{sc}].B[0] Primary Vector {} at SC[{spacecraft}].B[{body}] point {}",
                triple(vector),
                triple(point)
            ),
            TruthCommand::VectorSc { vector, spacecraft } => {
                write!(line, "Point SC[{sc}].B[0] Primary Vector {} at SC[{spacecraft}]", triple(vector))
            }
            TruthCommand::VectorPointAt { vector, target } => {
                write!(line, "Point SC[{sc}].B[0] Primary Vector {} at {target}", triple(vector))
            }
            TruthCommand::Align { vector, spacecraft, body, target } => write!(
                line,
                "Align SC[{sc}].B[0] Primary Vector {} with SC[{spacecraft}].B[{body}] vector {}",
                triple(vector),
                triple(target)
            ),
            TruthCommand::AlignFrame { vector, frame, target } => write!(
                line,
                "Align SC[{sc}].B[0] Primary Vector {} with {frame}-frame Vector {}",
                triple(vector),
                triple(target)
            ),
        };
        line
    }
}

/// Which truth field a simulator's provider reads.
///
/// `data-provider.field` and `data-provider.field-count` win, then the device
/// table entry for the model type, then `svb` with three values. A configured
/// count outside `1..=MAX_FIELDS` is a configuration error.
pub fn point_descriptor(config: &SimulatorConfig) -> Result<PointDescriptor, SimError> {
    let provider = config.data_provider();
    let device = devices::lookup(&config.hardware_model.model_type);
    let field = provider
        .get_str("field")
        .map(str::to_string)
        .or_else(|| device.map(|d| d.truth_field.to_string()))
        .unwrap_or_else(|| DEFAULT_FIELD.to_string());
    let field_count = match provider.get_u64("field-count") {
        Some(n) => usize::try_from(n)
            .ok()
            .filter(|n| (1..=MAX_FIELDS).contains(n))
            .ok_or_else(|| {
                SimError::Config(format!("{}: field-count {} outside 1..={}", config.name, n, MAX_FIELDS))
            })?,
        None => device.map_or(DEFAULT_FIELD_COUNT, |d| d.field_count),
    };
    Ok(PointDescriptor::new(provider.spacecraft.unwrap_or(0), &field, field_count))
}
