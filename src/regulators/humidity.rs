//! Humidity regulation.
//!
//! Only runs while the interior temperature has held near its setpoint. Too
//! dry runs the humidifier with the circulation fan. Too humid walks the
//! reduction phases:
//!
//! ```text
//! Idle -> Ventilating -> EvapCooling -> Cooldown -> (Ventilating | Idle)
//! ```
//!
//! Ventilating and EvapCooling each re-arm while the humidity trend keeps
//! falling and move on once it stops. Cooldown releases everything for a long
//! hold so an ineffective reduction does not short-cycle.

use super::{switch, Applied, ActuatorClaims, CycleContext, Regulator, VentCommand};
use crate::actuators::{labels, ActuatorFacade, ThermalMode};
use crate::config::ControlConfig;
use crate::error::ActuatorError;
use heapless::Deque;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const HISTORY_LEN: usize = 12;
const MIN_TREND_SAMPLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumidityPhase {
    Idle,
    Ventilating { since: Instant },
    EvapCooling { since: Instant },
    Cooldown { since: Instant },
}

impl HumidityPhase {
    pub fn name(&self) -> &'static str {
        match self {
            HumidityPhase::Idle => "idle",
            HumidityPhase::Ventilating { .. } => "ventilating",
            HumidityPhase::EvapCooling { .. } => "evap_cooling",
            HumidityPhase::Cooldown { .. } => "cooldown",
        }
    }

    pub fn is_reducing(&self) -> bool {
        matches!(self, HumidityPhase::Ventilating { .. } | HumidityPhase::EvapCooling { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Humidifier {
    Off,
    On { since: Instant },
    Resting { since: Instant },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HumidityState {
    pub phase: &'static str,
    pub temperature_stable: bool,
    pub suspended: bool,
    pub humidifying: bool,
    pub humidifier_on: bool,
    pub trend_samples: usize,
}

#[derive(Debug)]
pub struct HumidityRegulator {
    // Tuning
    stability_band: f64,
    stability_hold: Duration,
    dry_threshold: f64,
    wet_threshold: f64,
    vent_scale: f64,
    vent_min_opening: f64,
    vent_min_fan: f64,
    trend_interval: Duration,
    trend_sample_every: Duration,
    trend_min_drop: f64,
    evap_duration: Duration,
    cooldown: Duration,
    humidifier_max_on: Duration,
    humidifier_rest: Duration,
    max_cool: f64,

    // State
    phase: HumidityPhase,
    stable_since: Option<Instant>,
    stable: bool,
    suspended: bool,
    humidifying: bool,
    humidifier: Humidifier,
    history: Deque<f64, HISTORY_LEN>,
    last_sample: Option<Instant>,

    // Outputs last written by this regulator
    circulation: Applied<bool>,
    vents: Applied<VentCommand>,
    /// Thermal stage and its fan/pump, while condensing.
    condensing: Applied<bool>,
}

impl HumidityRegulator {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            stability_band: config.stability_band_c,
            stability_hold: Duration::from_secs(config.stability_hold_secs),
            dry_threshold: config.humidity_dry_threshold,
            wet_threshold: config.humidity_wet_threshold,
            vent_scale: config.humidity_vent_scale,
            vent_min_opening: config.vent_min_opening,
            vent_min_fan: config.vent_min_fan_speed,
            trend_interval: Duration::from_secs(config.trend_interval_secs),
            trend_sample_every: Duration::from_secs(config.trend_sample_secs),
            trend_min_drop: config.trend_min_drop,
            evap_duration: Duration::from_secs(config.evap_cooling_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
            humidifier_max_on: Duration::from_secs(config.humidifier_max_on_secs),
            humidifier_rest: Duration::from_secs(config.humidifier_rest_secs),
            max_cool: config.max_cool_output,

            phase: HumidityPhase::Idle,
            stable_since: None,
            stable: false,
            suspended: false,
            humidifying: false,
            humidifier: Humidifier::Off,
            history: Deque::new(),
            last_sample: None,

            circulation: Applied::default(),
            vents: Applied::default(),
            condensing: Applied::default(),
        }
    }

    pub fn phase(&self) -> HumidityPhase {
        self.phase
    }

    /// Shared outputs this regulator is driving. CO2 and temperature control
    /// stay off them while claimed.
    pub fn claims(&self) -> ActuatorClaims {
        let active = !self.suspended;
        ActuatorClaims {
            thermal: active && matches!(self.phase, HumidityPhase::EvapCooling { .. }),
            ventilation: active && self.phase.is_reducing(),
        }
    }

    /// True when the trailing half of the sample window averages lower than
    /// the leading half by at least the configured margin.
    pub fn trend_decreasing(&self) -> bool {
        let n = self.history.len();
        if n < MIN_TREND_SAMPLES {
            return false;
        }
        let half = n / 2;
        let older: f64 = self.history.iter().take(half).sum::<f64>() / half as f64;
        let newer: f64 = self.history.iter().skip(n - half).sum::<f64>() / half as f64;
        older - newer >= self.trend_min_drop
    }

    fn sample(&mut self, humidity: f64, now: Instant) {
        let due = self
            .last_sample
            .map_or(true, |t| now.saturating_duration_since(t) >= self.trend_sample_every);
        if !due {
            return;
        }
        if self.history.is_full() {
            self.history.pop_front();
        }
        let _ = self.history.push_back(humidity);
        self.last_sample = Some(now);
    }

    fn update_stability(&mut self, interior: Option<f64>, setpoint: f64, now: Instant) -> bool {
        match interior {
            Some(t) if (t - setpoint).abs() <= self.stability_band => {
                let since = *self.stable_since.get_or_insert(now);
                now.saturating_duration_since(since) >= self.stability_hold
            }
            _ => {
                self.stable_since = None;
                false
            }
        }
    }

    fn enter(&mut self, phase: HumidityPhase, humidity: f64) {
        if phase.name() != self.phase.name() {
            info!(from = self.phase.name(), to = phase.name(), humidity, "humidity phase change");
        }
        self.phase = phase;
    }

    /// Moves the phase machine for a too-humid reading.
    fn advance_reduction(&mut self, humidity: f64, now: Instant) {
        let elapsed = |since: Instant| now.saturating_duration_since(since);
        match self.phase {
            HumidityPhase::Idle => self.enter(HumidityPhase::Ventilating { since: now }, humidity),
            HumidityPhase::Cooldown { since } => {
                if elapsed(since) >= self.cooldown {
                    self.enter(HumidityPhase::Ventilating { since: now }, humidity);
                }
            }
            HumidityPhase::Ventilating { since } => {
                if elapsed(since) >= self.trend_interval {
                    if self.trend_decreasing() {
                        debug!(humidity, "humidity falling; ventilation continues");
                        self.phase = HumidityPhase::Ventilating { since: now };
                    } else {
                        self.enter(HumidityPhase::EvapCooling { since: now }, humidity);
                    }
                }
            }
            HumidityPhase::EvapCooling { since } => {
                if elapsed(since) >= self.evap_duration {
                    if self.trend_decreasing() {
                        debug!(humidity, "humidity falling; evaporative cooling continues");
                        self.phase = HumidityPhase::EvapCooling { since: now };
                    } else {
                        self.enter(HumidityPhase::Cooldown { since: now }, humidity);
                    }
                }
            }
        }
    }

    fn drive_humidifier(
        &mut self,
        actuators: &mut dyn ActuatorFacade,
        want: bool,
        now: Instant,
    ) -> Result<(), ActuatorError> {
        let elapsed = |since: Instant| now.saturating_duration_since(since);
        match (self.humidifier, want) {
            (Humidifier::Off, true) => {
                actuators.turn_on(labels::HUMIDIFIER)?;
                self.humidifier = Humidifier::On { since: now };
            }
            (Humidifier::On { since }, true) if elapsed(since) >= self.humidifier_max_on => {
                info!("humidifier hit its continuous-run limit; resting");
                actuators.turn_off(labels::HUMIDIFIER)?;
                self.humidifier = Humidifier::Resting { since: now };
            }
            (Humidifier::Resting { since }, true) if elapsed(since) >= self.humidifier_rest => {
                actuators.turn_on(labels::HUMIDIFIER)?;
                self.humidifier = Humidifier::On { since: now };
            }
            (Humidifier::On { .. }, false) => {
                actuators.turn_off(labels::HUMIDIFIER)?;
                self.humidifier = Humidifier::Off;
            }
            (Humidifier::Resting { .. }, false) => self.humidifier = Humidifier::Off,
            _ => {}
        }
        Ok(())
    }

    fn drive_vents(&mut self, actuators: &mut dyn ActuatorFacade, want: Option<VentCommand>) -> Result<(), ActuatorError> {
        match want {
            Some(cmd) => self.vents.set(cmd, |c| c.apply(actuators)),
            None => {
                // Close what we opened, then hand the vents back.
                if self.vents.get().is_some_and(|c| !c.is_closed()) {
                    VentCommand::closed().apply(actuators)?;
                }
                self.vents.invalidate();
                Ok(())
            }
        }
    }

    fn drive_condensing(
        &mut self,
        actuators: &mut dyn ActuatorFacade,
        want: bool,
        tripped: bool,
    ) -> Result<(), ActuatorError> {
        if want && tripped {
            // Stage is off while tripped; keep the fan and pump running.
            actuators.set_thermal_power(0.0, ThermalMode::Off)?;
            actuators.thermal_disable()?;
            self.condensing.invalidate();
            return Ok(());
        }
        let max_cool = self.max_cool;
        self.condensing.set(want, |on| {
            if on {
                actuators.thermal_enable(true, true)?;
                actuators.set_thermal_power(max_cool, ThermalMode::Cool)?;
            } else {
                actuators.set_thermal_power(0.0, ThermalMode::Off)?;
                actuators.thermal_disable()?;
            }
            switch(actuators, labels::PELTIER_FAN, on)?;
            switch(actuators, labels::WATER_PUMP, on)
        })
    }

    /// Turns off everything this regulator is responsible for.
    fn release_all(&mut self, actuators: &mut dyn ActuatorFacade, now: Instant) -> Result<(), ActuatorError> {
        self.drive_humidifier(actuators, false, now)?;
        self.circulation.set(false, |on| switch(actuators, labels::INTERNAL_FAN, on))?;
        self.drive_vents(actuators, None)?;
        if self.condensing.get() == Some(true) {
            self.drive_condensing(actuators, false, false)?;
        }
        self.condensing.invalidate();
        Ok(())
    }
}

impl Regulator for HumidityRegulator {
    type State = HumidityState;

    fn name(&self) -> &'static str {
        "humidity"
    }

    fn regulate(&mut self, ctx: &CycleContext<'_>, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        let now = ctx.now;
        let Some(humidity) = ctx.readings.humidity else {
            return Ok(());
        };
        self.sample(humidity, now);

        let interior = ctx.readings.interior_temperature();
        self.stable = self.update_stability(interior, ctx.setpoints.temperature, now);
        if !self.stable {
            if !self.suspended {
                info!(phase = self.phase.name(), "temperature not stable; humidity control suspended");
                self.suspended = true;
            }
            self.humidifying = false;
            return self.release_all(actuators, now);
        }
        if self.suspended {
            info!(phase = self.phase.name(), "temperature stable; humidity control resumed");
            self.suspended = false;
            // Running phases restart their timers; the cooldown keeps counting.
            self.phase = match self.phase {
                HumidityPhase::Ventilating { .. } => HumidityPhase::Ventilating { since: now },
                HumidityPhase::EvapCooling { .. } => HumidityPhase::EvapCooling { since: now },
                other => other,
            };
        }

        let gap = humidity - ctx.setpoints.humidity;
        if gap < -self.dry_threshold {
            if self.phase != HumidityPhase::Idle {
                self.enter(HumidityPhase::Idle, humidity);
            }
            if !self.humidifying {
                info!(humidity, target = ctx.setpoints.humidity, "too dry; humidifying");
            }
            self.humidifying = true;
        } else if gap > self.wet_threshold {
            self.humidifying = false;
            self.advance_reduction(humidity, now);
        } else {
            if self.humidifying {
                info!(humidity, "humidity recovered; humidifier off");
                self.humidifying = false;
            }
            match self.phase {
                HumidityPhase::Ventilating { .. } | HumidityPhase::EvapCooling { .. } => {
                    self.enter(HumidityPhase::Idle, humidity);
                }
                HumidityPhase::Cooldown { since } if now.saturating_duration_since(since) >= self.cooldown => {
                    self.enter(HumidityPhase::Idle, humidity);
                }
                _ => {}
            }
        }

        let condensing = matches!(self.phase, HumidityPhase::EvapCooling { .. });
        let vents = match self.phase {
            HumidityPhase::Ventilating { .. } => {
                let ratio = (gap / self.vent_scale).clamp(self.vent_min_opening, 1.0);
                Some(VentCommand::open(ratio, self.vent_min_fan))
            }
            HumidityPhase::EvapCooling { .. } => Some(VentCommand::closed()),
            _ => None,
        };

        self.drive_humidifier(actuators, self.humidifying && !condensing, now)?;
        let circulate = self.humidifying || condensing;
        self.circulation.set(circulate, |on| switch(actuators, labels::INTERNAL_FAN, on))?;
        self.drive_vents(actuators, vents)?;
        if condensing || self.condensing.get() == Some(true) {
            self.drive_condensing(actuators, condensing, ctx.safety.is_tripped())?;
        }
        if !condensing {
            self.condensing.invalidate();
        }
        Ok(())
    }

    fn reset(&mut self) {
        // The cooldown hold outlives a shutdown; anything else restarts idle.
        if !matches!(self.phase, HumidityPhase::Cooldown { .. }) {
            self.phase = HumidityPhase::Idle;
        }
        self.stable_since = None;
        self.stable = false;
        self.suspended = false;
        self.humidifying = false;
        self.humidifier = Humidifier::Off;
        self.circulation.invalidate();
        self.vents.invalidate();
        self.condensing.invalidate();
    }

    fn state(&self) -> HumidityState {
        HumidityState {
            phase: self.phase.name(),
            temperature_stable: self.stable,
            suspended: self.suspended,
            humidifying: self.humidifying,
            humidifier_on: matches!(self.humidifier, Humidifier::On { .. }),
            trend_samples: self.history.len(),
        }
    }
}
