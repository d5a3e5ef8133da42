use chamber::actuators::labels;
use chamber::regulators::{ActuatorClaims, CycleContext, LightingRegulator, Regulator};
use chamber::safety::{SafetyMonitor, SafetyVerdict};
use chamber::sim::RecordingDriver;
use chamber::state::Setpoints;
use chamber::*;
use chrono::NaiveTime;
use std::time::{Duration, Instant};

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn day_schedule() -> LightSchedule {
    let entry = LightScheduleEntry::new(
        hm(8, 0),
        hm(17, 0),
        LightSetting { color: LightColor::Blue, brightness: 0.5, white: 0.4, uv: 0.1 },
    )
    .unwrap();
    LightSchedule::from_entries([entry]).unwrap()
}

fn run_lighting(
    regulator: &mut LightingRegulator,
    bank: &mut ActuatorBank<RecordingDriver>,
    time_of_day: NaiveTime,
    photo_mode: bool,
) {
    let readings = SensorSnapshot::default();
    let setpoints = Setpoints { schedule: day_schedule(), ..Setpoints::default() };
    let ctx = CycleContext {
        now: Instant::now(),
        time_of_day,
        readings: &readings,
        setpoints: &setpoints,
        gains: PidGains::default(),
        safety: SafetyVerdict::Clear,
        claims: ActuatorClaims::default(),
        photo_mode,
    };
    regulator.regulate(&ctx, bank).unwrap();
}

#[test]
fn test_schedule_entry_drives_lights() {
    let mut regulator = LightingRegulator::new(LightSetting::photo());
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());

    run_lighting(&mut regulator, &mut bank, hm(12, 0), false);

    let mirror = bank.mirror();
    assert_eq!(mirror.light.color, LightColor::Blue);
    assert!((mirror.light.brightness - 0.5).abs() < 1e-9);
    assert!((mirror.value(labels::WHITE_LEDS) - 40.0).abs() < 1e-9);
    assert!((mirror.value(labels::UV_LEDS) - 10.0).abs() < 1e-9);
    assert!(mirror.light.pixels.iter().all(|p| *p == LightColor::Blue.rgb()));
    assert_eq!(regulator.active_entry(), Some("08:00-17:00"));
}

#[test]
fn test_lights_off_outside_schedule() {
    let mut regulator = LightingRegulator::new(LightSetting::photo());
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());

    run_lighting(&mut regulator, &mut bank, hm(12, 0), false);
    run_lighting(&mut regulator, &mut bank, hm(17, 1), false);

    let mirror = bank.mirror();
    assert_eq!(mirror.light.color, LightColor::Off);
    assert_eq!(mirror.light.brightness, 0.0);
    assert_eq!(mirror.value(labels::WHITE_LEDS), 0.0);
    assert_eq!(regulator.active_entry(), None);
}

#[test]
fn test_unchanged_setting_is_not_rewritten() {
    let mut regulator = LightingRegulator::new(LightSetting::photo());
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());

    run_lighting(&mut regulator, &mut bank, hm(9, 0), false);
    let writes = bank.driver().write_count();
    run_lighting(&mut regulator, &mut bank, hm(9, 30), false);
    assert_eq!(bank.driver().write_count(), writes);
}

#[test]
fn test_photo_mode_overrides_schedule() {
    let mut regulator = LightingRegulator::new(LightSetting::photo());
    let mut bank = ActuatorBank::chamber(RecordingDriver::default());

    run_lighting(&mut regulator, &mut bank, hm(12, 0), true);

    let mirror = bank.mirror();
    assert_eq!(mirror.light.color, LightColor::White);
    assert_eq!(mirror.light.brightness, 1.0);
    assert!((mirror.value(labels::WHITE_LEDS) - 100.0).abs() < 1e-9);
    assert!(regulator.state().photo_mode);
}

#[test]
fn test_safety_monitor_trips_above_limit_only() {
    let mut monitor = SafetyMonitor::new(60.0);
    let now = Instant::now();

    let at_limit = SensorSnapshot { probe1: Some(60.0), probe2: Some(20.0), ..Default::default() };
    assert_eq!(monitor.check(&at_limit, now), SafetyVerdict::Clear);

    let over = SensorSnapshot { probe1: Some(61.0), probe2: Some(20.0), ..Default::default() };
    match monitor.check(&over, now) {
        SafetyVerdict::Tripped(trip) => {
            assert_eq!(trip.probe, "Probe1");
            assert_eq!(trip.value, 61.0);
            assert!(trip.first);
        }
        SafetyVerdict::Clear => panic!("expected a trip"),
    }
    assert!(monitor.is_tripped());
}

#[test]
fn test_safety_trip_reports_first_cycle_once() {
    let mut monitor = SafetyMonitor::new(60.0);
    let t0 = Instant::now();
    let over = SensorSnapshot { probe1: Some(65.0), probe2: Some(70.0), ..Default::default() };

    let first = monitor.check(&over, t0);
    let second = monitor.check(&over, t0 + Duration::from_secs(2));
    match (first, second) {
        (SafetyVerdict::Tripped(a), SafetyVerdict::Tripped(b)) => {
            assert!(a.first);
            assert!(!b.first);
            // The hottest probe is reported.
            assert_eq!(b.probe, "Probe2");
        }
        other => panic!("expected two trips, got {other:?}"),
    }

    let cool = SensorSnapshot { probe1: Some(40.0), probe2: Some(20.0), ..Default::default() };
    assert_eq!(monitor.check(&cool, t0 + Duration::from_secs(4)), SafetyVerdict::Clear);
    assert!(!monitor.is_tripped());

    let status = monitor.status();
    assert_eq!(status.trip_count, 1);
    assert_eq!(status.worst_reading, Some(70.0));
    assert!(!status.tripped);
}

#[test]
fn test_safety_ignores_missing_probes() {
    let mut monitor = SafetyMonitor::new(60.0);
    let readings = SensorSnapshot { probe3: Some(90.0), ..Default::default() };
    assert_eq!(monitor.check(&readings, Instant::now()), SafetyVerdict::Clear);
}
