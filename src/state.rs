//! Shared State Store.
//!
//! One mutex guards everything external callers and the control loop both
//! touch. Every accessor copies in or out under the lock and returns; no
//! actuator or sensor I/O ever happens while it is held.

use crate::actuators::ActuatorMirror;
use crate::config::PidGains;
use crate::error::{ControlError, ControlResult};
use crate::error_log::{ErrorLog, ErrorRecord};
use crate::safety::SafetyStatus;
use crate::schedule::{LightSchedule, LightScheduleEntry};
use crate::sensors::SensorSnapshot;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    /// Outputs off, no regulation.
    Standby,
    Active,
    /// Regulation suspended until a caller moves the system out of it.
    Error,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Standby => "standby",
            SystemState::Active => "active",
            SystemState::Error => "error",
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemState {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standby" => Ok(SystemState::Standby),
            "active" => Ok(SystemState::Active),
            "error" => Ok(SystemState::Error),
            _ => Err(ControlError::InvalidState(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setpoints {
    /// °C
    pub temperature: f64,
    /// %RH
    pub humidity: f64,
    /// ppm
    pub co2_max: f64,
    pub schedule: LightSchedule,
}

impl Default for Setpoints {
    fn default() -> Self {
        Self {
            temperature: 20.0,
            humidity: 85.0,
            co2_max: 800.0,
            schedule: LightSchedule::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetpointField {
    Temperature,
    Humidity,
    Co2Max,
}

impl SetpointField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetpointField::Temperature => "temperature",
            SetpointField::Humidity => "humidity",
            SetpointField::Co2Max => "co2_max",
        }
    }
}

/// Regulator facts surfaced in status; written by the loop each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegulatorSummary {
    pub temperature_output: f64,
    pub safety: SafetyStatus,
    pub humidity_phase: String,
    pub temperature_stable: bool,
    pub co2_reducing: bool,
    pub active_light_entry: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct PhotoWindow {
    until: Instant,
    until_wall: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSetpoints {
    pub temperature: f64,
    pub humidity: f64,
    pub co2_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: SystemState,
    pub uptime_secs: u64,
    pub setpoints: StatusSetpoints,
    pub schedule: Vec<LightScheduleEntry>,
    pub readings: SensorSnapshot,
    pub actuators: ActuatorMirror,
    pub photo_mode: bool,
    pub photo_mode_until: Option<DateTime<Local>>,
    pub sensor_failures: u32,
    pub regulators: RegulatorSummary,
    pub error_count: usize,
}

#[derive(Debug)]
struct Inner {
    state: SystemState,
    setpoints: Setpoints,
    gains: PidGains,
    readings: SensorSnapshot,
    mirror: ActuatorMirror,
    photo: Option<PhotoWindow>,
    errors: ErrorLog,
    sensor_failures: u32,
    summary: RegulatorSummary,
}

/// Everything the loop needs for one control cycle, copied in one lock.
#[derive(Debug, Clone)]
pub struct CycleInputs {
    pub state: SystemState,
    pub setpoints: Setpoints,
    pub gains: PidGains,
    pub readings: SensorSnapshot,
    pub photo_mode: bool,
}

#[derive(Debug)]
pub struct SharedState {
    inner: Mutex<Inner>,
    started: Instant,
}

impl SharedState {
    pub fn new(setpoints: Setpoints, gains: PidGains) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SystemState::Standby,
                setpoints,
                gains,
                readings: SensorSnapshot::default(),
                mirror: ActuatorMirror::default(),
                photo: None,
                errors: ErrorLog::new(),
                sensor_failures: 0,
                summary: RegulatorSummary::default(),
            }),
            started: Instant::now(),
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock();
        StatusSnapshot {
            state: inner.state,
            uptime_secs: self.started.elapsed().as_secs(),
            setpoints: StatusSetpoints {
                temperature: inner.setpoints.temperature,
                humidity: inner.setpoints.humidity,
                co2_max: inner.setpoints.co2_max,
            },
            schedule: inner.setpoints.schedule.entries().to_vec(),
            readings: inner.readings,
            actuators: inner.mirror.clone(),
            photo_mode: inner.photo.is_some(),
            photo_mode_until: inner.photo.map(|p| p.until_wall),
            sensor_failures: inner.sensor_failures,
            regulators: inner.summary.clone(),
            error_count: inner.errors.len(),
        }
    }

    pub fn system_state(&self) -> SystemState {
        self.inner.lock().state
    }

    /// Returns the state that was replaced.
    pub fn set_system_state(&self, state: SystemState) -> SystemState {
        let mut inner = self.inner.lock();
        let previous = std::mem::replace(&mut inner.state, state);
        if previous != state {
            info!(from = previous.as_str(), to = state.as_str(), "system state changed");
        }
        previous
    }

    /// Moves to `to` only if the current state is `from`.
    pub fn transition(&self, from: SystemState, to: SystemState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != from {
            return false;
        }
        inner.state = to;
        info!(from = from.as_str(), to = to.as_str(), "system state changed");
        true
    }

    pub fn set_setpoint(&self, field: SetpointField, value: f64) -> ControlResult<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ControlError::InvalidParameter { field: field.as_str(), value });
        }
        let mut inner = self.inner.lock();
        let slot = match field {
            SetpointField::Temperature => &mut inner.setpoints.temperature,
            SetpointField::Humidity => &mut inner.setpoints.humidity,
            SetpointField::Co2Max => &mut inner.setpoints.co2_max,
        };
        let previous = std::mem::replace(slot, value);
        info!(field = field.as_str(), previous, value, "setpoint updated");
        Ok(())
    }

    pub fn setpoints(&self) -> Setpoints {
        self.inner.lock().setpoints.clone()
    }

    /// Replaces the whole schedule in one step.
    pub fn set_schedule(&self, schedule: LightSchedule) {
        let entries = schedule.len();
        self.inner.lock().setpoints.schedule = schedule;
        info!(entries, "light schedule replaced");
    }

    pub fn pid_gains(&self) -> PidGains {
        self.inner.lock().gains
    }

    pub fn set_pid_gains(&self, gains: PidGains) {
        self.inner.lock().gains = gains;
        info!(kp = gains.kp, ki = gains.ki, kd = gains.kd, "PID gains updated");
    }

    pub fn readings(&self) -> SensorSnapshot {
        self.inner.lock().readings
    }

    pub fn store_readings(&self, readings: SensorSnapshot, sensor_failures: u32) {
        let mut inner = self.inner.lock();
        inner.readings = readings;
        inner.sensor_failures = sensor_failures;
    }

    pub fn cycle_inputs(&self) -> CycleInputs {
        let inner = self.inner.lock();
        CycleInputs {
            state: inner.state,
            setpoints: inner.setpoints.clone(),
            gains: inner.gains,
            readings: inner.readings,
            photo_mode: inner.photo.is_some(),
        }
    }

    pub fn store_outputs(&self, mirror: ActuatorMirror, summary: Option<RegulatorSummary>) {
        let mut inner = self.inner.lock();
        inner.mirror = mirror;
        if let Some(summary) = summary {
            inner.summary = summary;
        }
    }

    pub fn mirror(&self) -> ActuatorMirror {
        self.inner.lock().mirror.clone()
    }

    /// Fails without touching photo mode if `duration` runs past what either
    /// clock can represent.
    pub fn start_photo_mode(&self, now: Instant, duration: Duration) -> ControlResult<()> {
        let out_of_range = || ControlError::InvalidParameter { field: "photo_duration", value: duration.as_secs_f64() };
        let until = now.checked_add(duration).ok_or_else(out_of_range)?;
        let until_wall = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| Local::now().checked_add_signed(d))
            .ok_or_else(out_of_range)?;
        self.inner.lock().photo = Some(PhotoWindow { until, until_wall });
        Ok(())
    }

    pub fn photo_mode(&self) -> bool {
        self.inner.lock().photo.is_some()
    }

    /// Clears photo mode if it has run out by `now`. True only on the call
    /// that clears it.
    pub fn expire_photo_mode(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.photo {
            Some(p) if now >= p.until => {
                inner.photo = None;
                true
            }
            _ => false,
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.inner.lock().errors.record(message);
    }

    /// Error log, oldest first.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.inner.lock().errors.records()
    }
}
