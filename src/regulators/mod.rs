pub mod co2;
pub mod humidity;
pub mod lighting;
pub mod pid;
pub mod temperature;

pub use co2::{Co2Regulator, Co2State};
pub use humidity::{HumidityPhase, HumidityRegulator, HumidityState};
pub use lighting::{LightingRegulator, LightingState};
pub use pid::PidController;
pub use temperature::{TemperatureRegulator, TemperatureState};

use crate::actuators::{labels, ActuatorFacade};
use crate::config::PidGains;
use crate::error::ActuatorError;
use crate::safety::SafetyVerdict;
use crate::sensors::SensorSnapshot;
use crate::state::Setpoints;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Everything a regulator may look at during one control cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    pub now: Instant,
    pub time_of_day: NaiveTime,
    pub readings: &'a SensorSnapshot,
    pub setpoints: &'a Setpoints,
    pub gains: PidGains,
    pub safety: SafetyVerdict,
    /// Outputs the humidity regulator is driving right now.
    pub claims: ActuatorClaims,
    pub photo_mode: bool,
}

/// Shared outputs currently owned by the humidity regulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorClaims {
    pub thermal: bool,
    pub ventilation: bool,
}

pub trait Regulator {
    type State: Clone + Serialize;

    fn name(&self) -> &'static str;

    /// Runs one control step. An error means some command failed; outputs
    /// already written stay written and the rest are retried next cycle.
    fn regulate(&mut self, ctx: &CycleContext<'_>, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError>;

    /// Forgets everything the regulator believes about the outputs. Called
    /// after the outputs were forced off behind its back.
    fn reset(&mut self);

    fn state(&self) -> Self::State;
}

/// Intake/outflow ventilation: servo opening plus both fans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VentCommand {
    pub angle: f64,
    pub fan_speed: f64,
}

impl VentCommand {
    pub fn closed() -> Self {
        Self { angle: 0.0, fan_speed: 0.0 }
    }

    /// `ratio` is the fraction of full opening; fans never run slower than
    /// `min_fan_speed` while the vents are open.
    pub fn open(ratio: f64, min_fan_speed: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        Self { angle: (180.0 * ratio).round(), fan_speed: ratio.max(min_fan_speed) }
    }

    pub fn is_closed(&self) -> bool {
        self.angle == 0.0 && self.fan_speed == 0.0
    }

    pub fn apply(&self, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        actuators.set_angle(self.angle)?;
        actuators.set_level(labels::INTAKE_FAN, self.fan_speed)?;
        actuators.set_level(labels::OUTFLOW_FAN, self.fan_speed)
    }
}

/// Last value successfully written to an output, so unchanged commands are
/// not re-sent every cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied<T> {
    last: Option<T>,
}

impl<T> Default for Applied<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: Copy + PartialEq> Applied<T> {
    pub fn get(&self) -> Option<T> {
        self.last
    }

    pub fn invalidate(&mut self) {
        self.last = None;
    }

    /// Writes `want` through `write` unless it was the last value applied.
    pub fn set<E>(&mut self, want: T, write: impl FnOnce(T) -> Result<(), E>) -> Result<(), E> {
        if self.last == Some(want) {
            return Ok(());
        }
        write(want)?;
        self.last = Some(want);
        Ok(())
    }
}

pub(crate) fn switch(actuators: &mut dyn ActuatorFacade, label: &str, on: bool) -> Result<(), ActuatorError> {
    if on {
        actuators.turn_on(label)
    } else {
        actuators.turn_off(label)
    }
}
