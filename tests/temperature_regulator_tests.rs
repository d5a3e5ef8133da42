use chamber::actuators::labels;
use chamber::regulators::{ActuatorClaims, CycleContext, Regulator, TemperatureRegulator};
use chamber::safety::{SafetyVerdict, Trip};
use chamber::sim::RecordingDriver;
use chamber::state::Setpoints;
use chamber::*;
use chrono::NaiveTime;
use std::time::{Duration, Instant};

fn readings(interior: f64, ambient: f64) -> SensorSnapshot {
    SensorSnapshot {
        probe1: Some(interior + 5.0),
        probe2: Some(interior),
        probe3: Some(ambient),
        humidity_sensor_temp: Some(interior),
        co2_sensor_temp: Some(interior),
        humidity: Some(85.0),
        co2: Some(600.0),
    }
}

fn setpoints(temperature: f64) -> Setpoints {
    Setpoints { temperature, ..Setpoints::default() }
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

fn tripped() -> SafetyVerdict {
    SafetyVerdict::Tripped(Trip { probe: "Probe1", value: 65.0, limit: 60.0, first: true })
}

#[test]
fn test_idle_inside_deadband() {
    let config = ControlConfig::default();
    let mut regulator = TemperatureRegulator::new(&config);
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());
    let r = readings(20.0, 20.0);
    let sp = setpoints(20.0);

    regulator.regulate(&context(Instant::now(), &r, &sp), &mut bank).unwrap();

    let mirror = bank.mirror();
    assert_eq!(mirror.thermal.mode, ThermalMode::Off);
    assert!(!mirror.thermal.enabled);
    assert!(!mirror.is_on(labels::PELTIER_FAN));
    assert!(!mirror.is_on(labels::WATER_PUMP));
    assert!(!regulator.state().stage_active);
    assert_eq!(regulator.state().output, 0.0);
}

#[test]
fn test_heating_is_capped_below_cooling_authority() {
    let config = ControlConfig::default();
    let mut regulator = TemperatureRegulator::new(&config);
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());
    let r = readings(15.0, 15.0);
    let sp = setpoints(25.0);

    regulator.regulate(&context(Instant::now(), &r, &sp), &mut bank).unwrap();

    let mirror = bank.mirror();
    assert_eq!(mirror.thermal.mode, ThermalMode::Heat);
    assert!(mirror.thermal.enabled);
    assert!((mirror.thermal.duty - config.max_heat_output).abs() < 1e-9);
    assert!(mirror.is_on(labels::PELTIER_FAN));
    assert!(mirror.is_on(labels::WATER_PUMP));
}

#[test]
fn test_cooling_uses_full_authority() {
    let config = ControlConfig::default();
    let mut regulator = TemperatureRegulator::new(&config);
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());
    let r = readings(25.0, 25.0);
    let sp = setpoints(20.0);

    regulator.regulate(&context(Instant::now(), &r, &sp), &mut bank).unwrap();

    let mirror = bank.mirror();
    assert_eq!(mirror.thermal.mode, ThermalMode::Cool);
    assert!((mirror.thermal.duty - 1.0).abs() < 1e-9);
    assert!(regulator.state().output < 0.0);
}

#[test]
fn test_ambient_bias_is_bounded() {
    let config = ControlConfig::default();
    let mut regulator = TemperatureRegulator::new(&config);
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());
    // Interior on target, outside very cold: only the bias acts.
    let r = readings(20.0, 0.0);
    let sp = setpoints(20.0);

    regulator.regulate(&context(Instant::now(), &r, &sp), &mut bank).unwrap();

    let state = regulator.state();
    assert!((state.bias - config.bias_limit).abs() < 1e-9);
    assert!((state.output - config.bias_limit).abs() < 1e-9);
    assert_eq!(bank.mirror().thermal.mode, ThermalMode::Heat);
}

#[test]
fn test_aux_outputs_switch_only_on_change() {
    let config = ControlConfig::default();
    let mut regulator = TemperatureRegulator::new(&config);
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());
    let r = readings(15.0, 15.0);
    let sp = setpoints(25.0);
    let t0 = Instant::now();

    regulator.regulate(&context(t0, &r, &sp), &mut bank).unwrap();
    let writes = bank.driver().write_count();

    regulator.regulate(&context(t0 + Duration::from_secs(2), &r, &sp), &mut bank).unwrap();
    // Only the two bridge legs are rewritten.
    assert_eq!(bank.driver().write_count() - writes, 2);
}

#[test]
fn test_safety_trip_forces_stage_off_every_cycle() {
    let config = ControlConfig::default();
    let mut regulator = TemperatureRegulator::new(&config);
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());
    let r = readings(19.5, 20.0);
    let sp = setpoints(20.0);
    let t0 = Instant::now();

    regulator.regulate(&context(t0, &r, &sp), &mut bank).unwrap();
    regulator.regulate(&context(t0 + Duration::from_secs(2), &r, &sp), &mut bank).unwrap();
    let integral = regulator.state().integral;
    assert!((integral - 0.1).abs() < 1e-9);
    assert_eq!(bank.mirror().thermal.mode, ThermalMode::Heat);

    for step in [4, 6, 8] {
        // Something else turned the stage back on in between.
        bank.thermal_enable(true, true).unwrap();
        bank.set_thermal_power(0.5, ThermalMode::Heat).unwrap();

        let mut ctx = context(t0 + Duration::from_secs(step), &r, &sp);
        ctx.safety = tripped();
        regulator.regulate(&ctx, &mut bank).unwrap();

        let mirror = bank.mirror();
        assert_eq!(mirror.thermal.mode, ThermalMode::Off);
        assert!(!mirror.thermal.enabled);
        assert!(regulator.state().safety_hold);
        assert!((regulator.state().integral - integral).abs() < 1e-12);
    }

    // Cleared: regulation resumes without integrating the tripped period.
    regulator.regulate(&context(t0 + Duration::from_secs(10), &r, &sp), &mut bank).unwrap();
    assert!(!regulator.state().safety_hold);
    assert!((regulator.state().integral - integral).abs() < 1e-12);
    assert_eq!(bank.mirror().thermal.mode, ThermalMode::Heat);
}

#[test]
fn test_yields_stage_to_humidity_reduction() {
    let config = ControlConfig::default();
    let mut regulator = TemperatureRegulator::new(&config);
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());
    let r = readings(15.0, 15.0);
    let sp = setpoints(25.0);

    let mut ctx = context(Instant::now(), &r, &sp);
    ctx.claims = ActuatorClaims { thermal: true, ventilation: false };
    regulator.regulate(&ctx, &mut bank).unwrap();

    assert_eq!(bank.driver().write_count(), 0);
    assert!(regulator.state().yielded_to_humidity);
}

#[test]
fn test_missing_interior_reading_skips_cycle() {
    let config = ControlConfig::default();
    let mut regulator = TemperatureRegulator::new(&config);
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());
    let r = SensorSnapshot { probe3: Some(20.0), ..Default::default() };
    let sp = setpoints(25.0);

    regulator.regulate(&context(Instant::now(), &r, &sp), &mut bank).unwrap();
    assert_eq!(bank.driver().write_count(), 0);
}
