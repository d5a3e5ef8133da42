use crate::actuators::{self, ActuatorFacade};
use crate::config::{ControlConfig, PidGains};
use crate::error::{ActuatorError, ConfigError, ControlError, ControlResult};
use crate::error_log::ErrorRecord;
use crate::regulators::{
    Co2Regulator, CycleContext, HumidityRegulator, LightingRegulator, Regulator, TemperatureRegulator,
};
use crate::safety::{SafetyMonitor, SafetyVerdict};
use crate::schedule::{LightColor, LightSchedule, LightScheduleEntry, LightSetting, ScheduleRequest};
use crate::sensors::{self, SensorAggregator, SensorHealth, SensorSnapshot};
use crate::state::{RegulatorSummary, SetpointField, SharedState, StatusSnapshot, SystemState};
use crate::telemetry::{LogRecord, LogSink};
use chrono::{Local, NaiveTime};
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const OVERRIDE_DURATION: Duration = Duration::from_secs(3600);

/// What one pass of the loop body did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub sensors_read: bool,
    pub regulated: bool,
    pub logged: bool,
    pub photo_expired: bool,
    /// A regulator failed this pass; the loop backs off before the next one.
    pub faulted: bool,
}

/// Everything only the control loop touches: hardware handles, regulator
/// state and cadence bookkeeping.
pub(crate) struct ControlCore {
    sensors: Box<dyn SensorAggregator>,
    actuators: Box<dyn ActuatorFacade>,
    sink: Option<Box<dyn LogSink>>,
    health: SensorHealth,
    safety: SafetyMonitor,
    temperature: TemperatureRegulator,
    humidity: HumidityRegulator,
    co2: Co2Regulator,
    lighting: LightingRegulator,
    last_sensor_read: Option<Instant>,
    last_control: Option<Instant>,
    last_log: Option<Instant>,
}

impl ControlCore {
    fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
        last.map_or(true, |t| now.saturating_duration_since(t) >= interval)
    }

    fn summary(&self) -> RegulatorSummary {
        let temperature = self.temperature.state();
        let humidity = self.humidity.state();
        RegulatorSummary {
            temperature_output: temperature.output,
            safety: self.safety.status(),
            humidity_phase: humidity.phase.to_string(),
            temperature_stable: humidity.temperature_stable,
            co2_reducing: self.co2.is_reducing(),
            active_light_entry: self.lighting.active_entry().map(str::to_string),
        }
    }

    fn reset_regulators(&mut self) {
        self.temperature.reset();
        self.humidity.reset();
        self.co2.reset();
        self.lighting.reset();
    }
}

/// Supervisory climate controller for one chamber.
///
/// External callers use the status and command methods from any thread; the
/// background loop started by [`ClimateController::start`] is the only
/// place actuators are driven from, apart from the synchronous shutdown and
/// photo-mode paths.
pub struct ClimateController {
    pub(crate) config: ControlConfig,
    pub(crate) shared: SharedState,
    pub(crate) core: Mutex<ControlCore>,
    pub(crate) running: AtomicBool,
    pub(crate) task: Mutex<Option<JoinHandle<()>>>,
}

impl ClimateController {
    pub fn new<S, A>(config: ControlConfig, sensors: S, actuators: A) -> Result<Self, ConfigError>
    where
        S: SensorAggregator + 'static,
        A: ActuatorFacade + 'static,
    {
        config.validate()?;
        let core = ControlCore {
            sensors: Box::new(sensors),
            actuators: Box::new(actuators),
            sink: None,
            health: SensorHealth::new(config.max_sensor_errors),
            safety: SafetyMonitor::new(config.thermal_limit_c),
            temperature: TemperatureRegulator::new(&config),
            humidity: HumidityRegulator::new(&config),
            co2: Co2Regulator::new(&config),
            lighting: LightingRegulator::new(config.photo_light),
            last_sensor_read: None,
            last_control: None,
            last_log: None,
        };
        let controller = Self {
            shared: SharedState::new(Default::default(), config.pid),
            config,
            core: Mutex::new(core),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        };
        controller.shutdown_outputs();
        Ok(controller)
    }

    pub fn with_log_sink(self, sink: impl LogSink + 'static) -> Self {
        self.core.lock().sink = Some(Box::new(sink));
        self
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    // --- Status ---

    pub fn status(&self) -> StatusSnapshot {
        self.shared.status()
    }

    pub fn system_state(&self) -> SystemState {
        self.shared.system_state()
    }

    pub fn sensor_data(&self) -> SensorSnapshot {
        self.shared.readings()
    }

    /// Error log, oldest first.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.shared.errors()
    }

    // --- Setpoints ---

    pub fn set_temperature(&self, celsius: f64) -> ControlResult<()> {
        self.shared.set_setpoint(SetpointField::Temperature, celsius)
    }

    pub fn set_humidity(&self, percent: f64) -> ControlResult<()> {
        self.shared.set_setpoint(SetpointField::Humidity, percent)
    }

    pub fn set_co2_max(&self, ppm: f64) -> ControlResult<()> {
        self.shared.set_setpoint(SetpointField::Co2Max, ppm)
    }

    /// Replaces the whole schedule. Nothing changes if any entry is invalid.
    pub fn set_schedule(&self, entries: &[ScheduleRequest]) -> ControlResult<()> {
        let schedule = LightSchedule::from_requests(entries)?;
        self.shared.set_schedule(schedule);
        Ok(())
    }

    /// Replaces the schedule with a single entry running from now for an hour.
    pub fn set_light_override(&self, color: &str, brightness: f64, white: f64, uv: f64) -> ControlResult<()> {
        let color: LightColor = color
            .parse()
            .map_err(|e: crate::schedule::UnknownColor| ActuatorError::UnknownColor(e.0))?;
        for (field, value) in [("brightness", brightness), ("white", white), ("uv", uv)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ControlError::InvalidParameter { field, value });
            }
        }
        let start = Local::now().time();
        let end = start + chrono::Duration::from_std(OVERRIDE_DURATION).unwrap_or(chrono::Duration::zero());
        let entry = LightScheduleEntry::new(start, end, LightSetting { color, brightness, white, uv })?;
        info!(color = color.as_str(), brightness, white, uv, "manual light override for one hour");
        self.shared.set_schedule(LightSchedule::from_entries([entry])?);
        Ok(())
    }

    // --- PID tuning ---

    pub fn pid_parameters(&self) -> PidGains {
        self.shared.pid_gains()
    }

    /// Updates any subset of the gains; the loop picks them up next cycle.
    pub fn update_pid_parameters(&self, kp: Option<f64>, ki: Option<f64>, kd: Option<f64>) -> ControlResult<()> {
        for (field, value) in [("kp", kp), ("ki", ki), ("kd", kd)] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(ControlError::InvalidParameter { field, value: v });
                }
            }
        }
        let current = self.shared.pid_gains();
        self.shared.set_pid_gains(PidGains {
            kp: kp.unwrap_or(current.kp),
            ki: ki.unwrap_or(current.ki),
            kd: kd.unwrap_or(current.kd),
        });
        Ok(())
    }

    // --- Photo mode ---

    /// Forces the photo lighting now and keeps it until `duration` has passed.
    pub fn trigger_photo_mode(&self, duration: Duration) -> ControlResult<()> {
        if duration.is_zero() {
            return Err(ControlError::InvalidParameter { field: "photo_duration", value: 0.0 });
        }
        if self.shared.system_state() == SystemState::Error {
            return Err(ControlError::InvalidState(SystemState::Error.to_string()));
        }
        self.shared.start_photo_mode(Instant::now(), duration)?;
        info!(duration_s = duration.as_secs_f64(), "photo mode on");

        let mut core = self.core.lock();
        let core = &mut *core;
        let result = core.lighting.apply_photo(core.actuators.as_mut());
        self.shared.store_outputs(core.actuators.mirror(), None);
        result.map_err(ControlError::from)
    }

    pub fn photo_mode(&self) -> bool {
        self.shared.photo_mode()
    }

    // --- System state ---

    /// Caller-driven transition by name. `error` cannot be requested; the
    /// controller only enters it on its own.
    pub fn set_system_state(&self, name: &str) -> ControlResult<()> {
        let state: SystemState = name.parse()?;
        match state {
            SystemState::Error => Err(ControlError::InvalidState(name.to_string())),
            SystemState::Active => {
                let previous = self.shared.set_system_state(SystemState::Active);
                if previous != SystemState::Active {
                    // Leaving standby or error starts regulation from scratch.
                    let mut core = self.core.lock();
                    core.health.record_success();
                    core.reset_regulators();
                    core.last_control = None;
                }
                Ok(())
            }
            SystemState::Standby => {
                self.shared.set_system_state(SystemState::Standby);
                self.shutdown_outputs();
                Ok(())
            }
        }
    }

    /// Drops to standby with every output off, right now.
    pub fn emergency_stop(&self) {
        warn!("emergency stop");
        self.shared.set_system_state(SystemState::Standby);
        self.shared.record_error("Emergency stop requested");
        self.shutdown_outputs();
    }

    /// Forces every output to its safe state and forgets regulator output
    /// caches.
    pub fn shutdown_outputs(&self) {
        let mut core = self.core.lock();
        self.shutdown_locked(&mut core);
    }

    fn shutdown_locked(&self, core: &mut ControlCore) {
        let failures = actuators::safe_shutdown(core.actuators.as_mut());
        for e in failures {
            self.shared.record_error(format!("Safe shutdown: {e}"));
        }
        core.reset_regulators();
        self.shared.store_outputs(core.actuators.mirror(), None);
        debug!("outputs in safe state");
    }

    // --- Loop body ---

    /// One pass of the control loop at `now` / `time_of_day`. The background
    /// task calls this every poll interval; tests call it directly.
    pub fn run_iteration(&self, now: Instant, time_of_day: NaiveTime) -> IterationReport {
        let mut report = IterationReport::default();
        let mut guard = self.core.lock();
        let core = &mut *guard;

        if ControlCore::due(core.last_sensor_read, self.config.sensor_interval(), now) {
            core.last_sensor_read = Some(now);
            report.sensors_read = true;
            self.read_sensors(core);
        }

        if ControlCore::due(core.last_control, self.config.control_interval(), now) {
            core.last_control = Some(now);
            let faulted = self.control_cycle(core, now, time_of_day, &mut report);
            report.faulted |= faulted;
        }

        if ControlCore::due(core.last_log, self.config.log_interval(), now) {
            core.last_log = Some(now);
            report.logged = self.write_log_row(core);
        }

        if self.shared.expire_photo_mode(now) {
            report.photo_expired = true;
            info!("photo mode expired");
            let result = if self.shared.system_state() == SystemState::Active {
                let schedule = self.shared.setpoints().schedule;
                core.lighting.apply_schedule(&schedule, time_of_day, core.actuators.as_mut())
            } else {
                core.lighting.apply_off(core.actuators.as_mut())
            };
            if let Err(e) = result {
                error!(error = %e, "restoring lights after photo mode failed");
                self.shared.record_error(format!("Lighting restore failed: {e}"));
                report.faulted = true;
            }
            self.shared.store_outputs(core.actuators.mirror(), None);
        }

        report
    }

    fn read_sensors(&self, core: &mut ControlCore) {
        let mut snapshot = self.shared.readings();
        match sensors::read_all(core.sensors.as_mut(), &mut snapshot) {
            Ok(()) => core.health.record_success(),
            Err(e) => {
                let exceeded = core.health.record_failure();
                let failures = core.health.consecutive_failures();
                warn!(error = %e, failures, "sensor pass failed");
                if exceeded {
                    self.escalate_sensor_health(core, failures);
                }
            }
        }
        self.shared.store_readings(snapshot, core.health.consecutive_failures());
    }

    fn escalate_sensor_health(&self, core: &mut ControlCore, failures: u32) {
        if self.shared.transition(SystemState::Active, SystemState::Error) {
            let err = ControlError::SensorHealthExceeded { failures };
            error!(failures, "too many sensor errors; regulation suspended");
            self.shared.record_error(format!("Critical: too many sensor errors ({err})"));
            self.shutdown_locked(core);
        } else {
            warn!(
                failures,
                state = self.shared.system_state().as_str(),
                "sensor failures over threshold outside active regulation"
            );
        }
    }

    /// Returns true if any regulator failed.
    fn control_cycle(
        &self,
        core: &mut ControlCore,
        now: Instant,
        time_of_day: NaiveTime,
        report: &mut IterationReport,
    ) -> bool {
        let inputs = self.shared.cycle_inputs();
        let verdict = core.safety.check(&inputs.readings, now);
        if let SafetyVerdict::Tripped(trip) = verdict {
            if trip.first {
                self.shared.record_error(trip.to_error().to_string());
            }
        }

        if inputs.state != SystemState::Active {
            return false;
        }
        report.regulated = true;

        let mut ctx = CycleContext {
            now,
            time_of_day,
            readings: &inputs.readings,
            setpoints: &inputs.setpoints,
            gains: inputs.gains,
            safety: verdict,
            claims: core.humidity.claims(),
            photo_mode: inputs.photo_mode,
        };

        let mut faulted = false;
        let mut note = |name: &str, result: Result<(), ActuatorError>| {
            if let Err(e) = result {
                error!(regulator = name, error = %e, "regulator failed");
                self.shared.record_error(format!("{name} regulator: {}", ControlError::from(e)));
                faulted = true;
            }
        };

        let actuators = core.actuators.as_mut();
        note(core.temperature.name(), core.temperature.regulate(&ctx, actuators));
        note(core.humidity.name(), core.humidity.regulate(&ctx, actuators));
        ctx.claims = core.humidity.claims();
        note(core.co2.name(), core.co2.regulate(&ctx, actuators));
        note(core.lighting.name(), core.lighting.regulate(&ctx, actuators));

        let summary = core.summary();
        self.shared.store_outputs(core.actuators.mirror(), Some(summary));
        faulted
    }

    fn write_log_row(&self, core: &mut ControlCore) -> bool {
        let Some(sink) = core.sink.as_mut() else {
            return false;
        };
        let status = self.shared.status();
        let setpoints = self.shared.setpoints();
        let record = LogRecord::capture(
            Local::now(),
            status.state,
            &setpoints,
            &status.readings,
            &status.actuators,
            status.regulators.active_light_entry.clone(),
            status.photo_mode,
        );
        match sink.write(&record) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "log row not written");
                false
            }
        }
    }
}
