use chamber::actuators::labels;
use chamber::regulators::{ActuatorClaims, CycleContext, HumidityPhase, HumidityRegulator, Regulator};
use chamber::safety::{SafetyVerdict, Trip};
use chamber::sim::RecordingDriver;
use chamber::state::Setpoints;
use chamber::*;
use chrono::NaiveTime;
use std::time::{Duration, Instant};

fn readings(interior: f64, humidity: f64) -> SensorSnapshot {
    SensorSnapshot {
        probe1: Some(interior + 5.0),
        probe2: Some(interior),
        probe3: Some(22.0),
        humidity_sensor_temp: Some(interior),
        co2_sensor_temp: Some(interior),
        humidity: Some(humidity),
        co2: Some(600.0),
    }
}

fn context<'a>(now: Instant, readings: &'a SensorSnapshot, setpoints: &'a Setpoints) -> CycleContext<'a> {
    CycleContext {
        now,
        time_of_day: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        readings,
        setpoints,
        gains: PidGains::default(),
        safety: SafetyVerdict::Clear,
        claims: ActuatorClaims::default(),
        photo_mode: false,
    }
}

/// Stable as soon as the temperature is in band.
fn immediate_config() -> ControlConfig {
    ControlConfig { stability_hold_secs: 0, ..ControlConfig::default() }
}

struct Rig {
    regulator: HumidityRegulator,
    bank: ActuatorBank<RecordingDriver>,
    setpoints: Setpoints,
    t0: Instant,
}

impl Rig {
    fn new(config: &ControlConfig) -> Self {
        Self {
            regulator: HumidityRegulator::new(config),
            bank: ActuatorBank::chamber(RecordingDriver::default()),
            setpoints: Setpoints::default(),
            t0: Instant::now(),
        }
    }

    fn step(&mut self, secs: u64, interior: f64, humidity: f64) {
        let r = readings(interior, humidity);
        let ctx = context(self.t0 + Duration::from_secs(secs), &r, &self.setpoints);
        self.regulator.regulate(&ctx, &mut self.bank).unwrap();
    }

    fn step_tripped(&mut self, secs: u64, interior: f64, humidity: f64) {
        let r = readings(interior, humidity);
        let mut ctx = context(self.t0 + Duration::from_secs(secs), &r, &self.setpoints);
        ctx.safety = SafetyVerdict::Tripped(Trip { probe: "Probe1", value: 65.0, limit: 60.0, first: false });
        self.regulator.regulate(&ctx, &mut self.bank).unwrap();
    }

    /// Walks a flat too-humid reading into evaporative cooling.
    fn into_evap_cooling(&mut self, config: &ControlConfig) -> u64 {
        self.step(0, 20.0, 95.0);
        self.step(config.trend_interval_secs, 20.0, 95.0);
        assert!(matches!(self.regulator.phase(), HumidityPhase::EvapCooling { .. }));
        config.trend_interval_secs
    }
}

#[test]
fn test_too_dry_runs_humidifier_and_fan_until_recovered() {
    let mut rig = Rig::new(&immediate_config());

    rig.step(0, 20.0, 70.0);
    let mirror = rig.bank.mirror();
    assert!(mirror.is_on(labels::HUMIDIFIER));
    assert!(mirror.is_on(labels::INTERNAL_FAN));
    assert!(rig.regulator.state().humidifying);

    // Back inside the neutral band, though still under the setpoint.
    rig.step(2, 20.0, 81.0);
    let mirror = rig.bank.mirror();
    assert!(!mirror.is_on(labels::HUMIDIFIER));
    assert!(!mirror.is_on(labels::INTERNAL_FAN));
    assert!(!rig.regulator.state().humidifying);
    assert_eq!(rig.regulator.phase(), HumidityPhase::Idle);
}

#[test]
fn test_waits_for_temperature_stability() {
    let config = ControlConfig::default();
    let mut rig = Rig::new(&config);
    let hold = config.stability_hold_secs;

    rig.step(0, 20.0, 70.0);
    assert!(!rig.bank.mirror().is_on(labels::HUMIDIFIER));
    assert!(rig.regulator.state().suspended);

    rig.step(hold - 1, 20.5, 70.0);
    assert!(!rig.bank.mirror().is_on(labels::HUMIDIFIER));

    rig.step(hold, 20.5, 70.0);
    assert!(rig.bank.mirror().is_on(labels::HUMIDIFIER));
    assert!(rig.regulator.state().temperature_stable);

    // Leaving the band restarts the hold.
    rig.step(hold + 2, 23.0, 70.0);
    assert!(!rig.bank.mirror().is_on(labels::HUMIDIFIER));
    rig.step(hold + 4, 20.0, 70.0);
    assert!(!rig.bank.mirror().is_on(labels::HUMIDIFIER));
}

#[test]
fn test_ventilation_opens_in_proportion_to_excess() {
    let mut rig = Rig::new(&immediate_config());

    rig.step(0, 20.0, 95.0);
    let mirror = rig.bank.mirror();
    assert!(matches!(rig.regulator.phase(), HumidityPhase::Ventilating { .. }));
    assert_eq!(mirror.vent_angle, 90.0);
    assert!((mirror.value(labels::INTAKE_FAN) - 0.5).abs() < 1e-9);
    assert!((mirror.value(labels::OUTFLOW_FAN) - 0.5).abs() < 1e-9);
    assert_eq!(rig.regulator.claims(), ActuatorClaims { thermal: false, ventilation: true });
}

#[test]
fn test_losing_stability_releases_every_output() {
    let mut rig = Rig::new(&immediate_config());

    rig.step(0, 20.0, 95.0);
    assert!(rig.bank.mirror().vent_angle > 0.0);

    rig.step(2, 25.0, 95.0);
    let mirror = rig.bank.mirror();
    assert_eq!(mirror.vent_angle, 0.0);
    assert_eq!(mirror.value(labels::INTAKE_FAN), 0.0);
    assert!(!mirror.is_on(labels::HUMIDIFIER));
    assert!(!mirror.is_on(labels::INTERNAL_FAN));
    assert_eq!(rig.regulator.claims(), ActuatorClaims::default());

    let state = rig.regulator.state();
    assert!(state.suspended);
    assert_eq!(state.phase, "ventilating");
}

#[test]
fn test_reduction_phases_advance_without_progress() {
    let config = immediate_config();
    let mut rig = Rig::new(&config);
    let vent = config.trend_interval_secs;
    let evap = config.evap_cooling_secs;
    let cooldown = config.cooldown_secs;

    rig.step(0, 20.0, 95.0);
    assert!(matches!(rig.regulator.phase(), HumidityPhase::Ventilating { .. }));

    // Flat humidity: ventilation gives way to evaporative cooling.
    rig.step(vent, 20.0, 95.0);
    assert!(matches!(rig.regulator.phase(), HumidityPhase::EvapCooling { .. }));
    let mirror = rig.bank.mirror();
    assert_eq!(mirror.thermal.mode, ThermalMode::Cool);
    assert!(mirror.thermal.enabled);
    assert!((mirror.thermal.duty - config.max_cool_output).abs() < 1e-9);
    assert!(mirror.is_on(labels::PELTIER_FAN));
    assert!(mirror.is_on(labels::WATER_PUMP));
    assert!(mirror.is_on(labels::INTERNAL_FAN));
    assert_eq!(mirror.vent_angle, 0.0);
    assert!(rig.regulator.claims().thermal);

    rig.step(vent + evap, 20.0, 95.0);
    assert!(matches!(rig.regulator.phase(), HumidityPhase::Cooldown { .. }));
    let mirror = rig.bank.mirror();
    assert_eq!(mirror.thermal.mode, ThermalMode::Off);
    assert!(!mirror.thermal.enabled);
    assert!(!mirror.is_on(labels::PELTIER_FAN));
    assert!(!mirror.is_on(labels::INTERNAL_FAN));
    assert_eq!(rig.regulator.claims(), ActuatorClaims::default());

    rig.step(vent + evap + cooldown - 1, 20.0, 95.0);
    assert!(matches!(rig.regulator.phase(), HumidityPhase::Cooldown { .. }));

    rig.step(vent + evap + cooldown, 20.0, 95.0);
    assert!(matches!(rig.regulator.phase(), HumidityPhase::Ventilating { .. }));
}

#[test]
fn test_falling_trend_keeps_ventilating() {
    let config = immediate_config();
    let mut rig = Rig::new(&config);
    let sample = config.trend_sample_secs;
    let vent = config.trend_interval_secs;

    let mut t = 0;
    let mut rh = 100.0;
    while t <= vent {
        rig.step(t, 20.0, rh);
        t += sample;
        rh -= 0.5;
    }

    assert!(rig.regulator.trend_decreasing());
    assert_eq!(
        rig.regulator.phase(),
        HumidityPhase::Ventilating { since: rig.t0 + Duration::from_secs(vent) }
    );
}

#[test]
fn test_humid_reading_back_in_band_returns_to_idle() {
    let mut rig = Rig::new(&immediate_config());

    rig.step(0, 20.0, 95.0);
    rig.step(2, 20.0, 89.0);
    assert_eq!(rig.regulator.phase(), HumidityPhase::Idle);
    let mirror = rig.bank.mirror();
    assert_eq!(mirror.vent_angle, 0.0);
    assert_eq!(mirror.value(labels::INTAKE_FAN), 0.0);
    assert_eq!(rig.regulator.claims(), ActuatorClaims::default());

    // Staying in band keeps everything released.
    for secs in (4..3600).step_by(60) {
        rig.step(secs, 20.0, 89.0);
    }
    assert_eq!(rig.regulator.phase(), HumidityPhase::Idle);
    assert_eq!(rig.bank.mirror().vent_angle, 0.0);
}

#[test]
fn test_evap_cooling_released_when_back_in_band() {
    let config = immediate_config();
    let mut rig = Rig::new(&config);
    let t = rig.into_evap_cooling(&config);

    rig.step(t + 2, 20.0, 89.0);
    assert_eq!(rig.regulator.phase(), HumidityPhase::Idle);
    let mirror = rig.bank.mirror();
    assert_eq!(mirror.thermal.mode, ThermalMode::Off);
    assert!(!mirror.thermal.enabled);
    assert!(!mirror.is_on(labels::PELTIER_FAN));
    assert!(!mirror.is_on(labels::WATER_PUMP));
    assert!(!mirror.is_on(labels::INTERNAL_FAN));
    assert_eq!(rig.regulator.claims(), ActuatorClaims::default());
}

#[test]
fn test_safety_trip_holds_stage_off_during_evap_cooling() {
    let config = immediate_config();
    let mut rig = Rig::new(&config);
    let t = rig.into_evap_cooling(&config);

    for secs in [t + 2, t + 4, t + 6] {
        rig.step_tripped(secs, 20.0, 95.0);
        let mirror = rig.bank.mirror();
        assert_eq!(mirror.thermal.mode, ThermalMode::Off);
        assert_eq!(mirror.thermal.duty, 0.0);
        assert!(!mirror.thermal.enabled);
        assert!(matches!(rig.regulator.phase(), HumidityPhase::EvapCooling { .. }));
    }

    // Cleared: condensing picks up again on the next cycle.
    rig.step(t + 8, 20.0, 95.0);
    let mirror = rig.bank.mirror();
    assert_eq!(mirror.thermal.mode, ThermalMode::Cool);
    assert!(mirror.thermal.enabled);
}

#[test]
fn test_losing_stability_mid_evap_cooling_releases_stage() {
    let config = immediate_config();
    let mut rig = Rig::new(&config);
    let t = rig.into_evap_cooling(&config);
    assert!(rig.regulator.claims().thermal);

    rig.step(t + 2, 25.0, 95.0);
    let mirror = rig.bank.mirror();
    assert_eq!(mirror.thermal.mode, ThermalMode::Off);
    assert!(!mirror.thermal.enabled);
    assert!(!mirror.is_on(labels::PELTIER_FAN));
    assert!(!mirror.is_on(labels::WATER_PUMP));
    assert!(!mirror.is_on(labels::INTERNAL_FAN));
    assert!(!rig.regulator.claims().thermal);
    assert!(rig.regulator.state().suspended);
}

#[test]
fn test_humidifier_rests_after_long_run() {
    let config = immediate_config();
    let mut rig = Rig::new(&config);
    let max_on = config.humidifier_max_on_secs;
    let rest = config.humidifier_rest_secs;

    rig.step(0, 20.0, 70.0);
    assert!(rig.bank.mirror().is_on(labels::HUMIDIFIER));

    rig.step(max_on, 20.0, 70.0);
    assert!(!rig.bank.mirror().is_on(labels::HUMIDIFIER));
    assert!(!rig.regulator.state().humidifier_on);

    rig.step(max_on + rest - 1, 20.0, 70.0);
    assert!(!rig.bank.mirror().is_on(labels::HUMIDIFIER));

    rig.step(max_on + rest, 20.0, 70.0);
    assert!(rig.bank.mirror().is_on(labels::HUMIDIFIER));
}

#[test]
fn test_reset_keeps_cooldown_only() {
    let config = immediate_config();
    let mut rig = Rig::new(&config);

    rig.step(0, 20.0, 95.0);
    rig.regulator.reset();
    assert_eq!(rig.regulator.phase(), HumidityPhase::Idle);

    rig.step(10, 20.0, 95.0);
    rig.step(10 + config.trend_interval_secs, 20.0, 95.0);
    rig.step(10 + config.trend_interval_secs + config.evap_cooling_secs, 20.0, 95.0);
    assert!(matches!(rig.regulator.phase(), HumidityPhase::Cooldown { .. }));
    rig.regulator.reset();
    assert!(matches!(rig.regulator.phase(), HumidityPhase::Cooldown { .. }));
}
