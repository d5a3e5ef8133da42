//! # Chamber
//!
//! Supervisory climate control for a sealed growing chamber: temperature,
//! relative humidity, CO2 and a photoperiod lighting schedule, driven through
//! a thermoelectric stage, a humidifier, forced ventilation and addressable
//! lighting.
//!
//! ## Features
//!
//! - **Temperature**: PID with feed-forward bias, asymmetric heat/cool
//!   authority, deadband, and a hard thermal cutoff re-checked every cycle
//! - **Humidity**: humidifier for dry air; ventilate, condense, then cool
//!   down for humid air, gated on temperature stability
//! - **CO2**: hysteresis venting that yields the vents to humidity control
//! - **Lighting**: first-match time-of-day schedule with a timed photo override
//! - **Fail-safe**: last-known-good readings, a sensor health counter that
//!   latches the system into `Error`, bounded error log
//! - **Thread-safe surface**: status and commands from any thread, a single
//!   background loop on tokio drives the hardware
//!
//! ## Quick Start
//!
//! ```rust
//! use chamber::sim::{RecordingDriver, SensorHandle};
//! use chamber::{ActuatorBank, ClimateController, ControlConfig};
//! use std::time::Instant;
//!
//! let sensors = SensorHandle::new();
//! let controller = ClimateController::new(
//!     ControlConfig::default(),
//!     sensors.sensors(),
//!     ActuatorBank::chamber(RecordingDriver::default()),
//! )?;
//!
//! controller.set_temperature(21.0)?;
//! controller.set_system_state("active")?;
//!
//! let report = controller.run_iteration(Instant::now(), chrono::Local::now().time());
//! assert!(report.regulated);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`controller`] - public API and the loop body
//! - [`control_loop`] - background task, start/stop
//! - [`state`] - guarded store shared by callers and the loop
//! - [`regulators`] - temperature, humidity, CO2 and lighting regulators
//! - [`safety`] - thermal limit gate
//! - [`sensors`] / [`actuators`] - hardware-facing interfaces
//! - [`telemetry`] - periodic log rows
//! - [`sim`] - simulated sensors and a recording output driver

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]

pub mod actuators;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod error;
pub mod error_log;
pub mod regulators;
pub mod safety;
pub mod schedule;
pub mod sensors;
pub mod sim;
pub mod state;
pub mod telemetry;

pub use actuators::{ActuatorBank, ActuatorFacade, ActuatorMirror, OutputDriver, ThermalMode};
pub use config::{ControlConfig, PidGains};
pub use controller::{ClimateController, IterationReport};
pub use error::{ActuatorError, ConfigError, ControlError, ControlResult, SensorError};
pub use schedule::{LightColor, LightSchedule, LightScheduleEntry, LightSetting, ScheduleRequest};
pub use sensors::{SensorAggregator, SensorSnapshot};
pub use state::{StatusSnapshot, SystemState};
