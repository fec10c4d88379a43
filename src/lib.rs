//! # Hardware-in-the-loop Peripheral Simulator
//!
//! Simulated spacecraft peripherals that flight software talks to over
//! emulated I2C, SPI and UART buses, fed with truth data from a dynamics
//! engine, a recording or a synthetic source.
//!
//! ## Features
//!
//! - **Plugin registries**: hardware models and data providers created by key
//! - **Lazy truth parsing**: data points decode their raw block on first access
//! - **Bus emulation**: addressed I2C/SPI buses, UART ports, a command bus and a shared clock
//! - **Streaming**: per-model periodic frames driven by simulation time
//! - **Operator terminal**: hex or ASCII transactions against any bus target
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use hilsim::bus::BusHub;
//! use hilsim::config::{CommonConfig, SimulatorConfig};
//! use hilsim::model::HardwareModel;
//!
//! let hub = Arc::new(BusHub::default());
//! let config = SimulatorConfig::new("sample", "SAMPLE");
//! let model = hilsim::plugins::global()
//!     .create_model(&config, &CommonConfig::default(), &hub, None)
//!     .unwrap();
//! model.start().unwrap();
//! assert_eq!(model.on_command("ENABLE"), "ENABLED");
//! ```
//!
//! ## Architecture
//!
//! - [`registry`] / [`plugins`] - Key-to-factory registries and the built-in plugins
//! - [`data_point`] / [`provider`] - Truth data and where it comes from
//! - [`bus`] - In-process transports
//! - [`model`] - The device table and the generic sensor model
//! - [`protocol`] - Register files and the UART frame codec
//! - [`scheduler`] - Stream timing
//! - [`terminal`] - Operator console

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]

pub mod bus;
pub mod config;
pub mod data_point;
pub mod error;
pub mod fault;
pub mod hex;
pub mod model;
pub mod plugins;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod telemetry;
pub mod terminal;

pub use config::SimConfig;
pub use data_point::{DataPoint, SensorPoint};
pub use error::SimError;
pub use model::{HardwareModel, Lifecycle};
pub use plugins::Plugins;
pub use provider::DataProvider;
pub use terminal::Terminal;
