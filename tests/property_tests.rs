//! Property tests for the control surface and the pure pieces of regulation.

use chamber::regulators::{Co2Regulator, PidController};
use chamber::sim::{RecordingDriver, SensorHandle};
use chamber::*;
use chrono::NaiveTime;
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn controller() -> ClimateController {
    ClimateController::new(
        ControlConfig::default(),
        SensorHandle::new().sensors(),
        ActuatorBank::chamber(RecordingDriver::default()),
    )
    .unwrap()
}

fn minute_of_day() -> impl Strategy<Value = NaiveTime> {
    (0u32..24, 0u32..60).prop_map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

proptest! {
    /// Any positive finite setpoint is stored exactly as given.
    #[test]
    fn setpoints_round_trip(
        temperature in 0.1f64..60.0,
        humidity in 0.1f64..100.0,
        co2 in 1.0f64..5000.0,
    ) {
        let controller = controller();
        controller.set_temperature(temperature).unwrap();
        controller.set_humidity(humidity).unwrap();
        controller.set_co2_max(co2).unwrap();

        let sp = controller.status().setpoints;
        prop_assert_eq!(sp.temperature, temperature);
        prop_assert_eq!(sp.humidity, humidity);
        prop_assert_eq!(sp.co2_max, co2);
    }

    #[test]
    fn non_positive_setpoints_never_stored(bad in -1000.0f64..=0.0) {
        let controller = controller();
        prop_assert!(controller.set_temperature(bad).is_err());
        prop_assert_eq!(controller.status().setpoints.temperature, 20.0);
    }

    /// Entries that do not wrap contain exactly the minutes between their
    /// bounds, inclusive.
    #[test]
    fn schedule_bounds_inclusive(a in minute_of_day(), b in minute_of_day(), t in minute_of_day()) {
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        let entry = LightScheduleEntry::new(start, end, LightSetting::off()).unwrap();
        prop_assert_eq!(entry.contains(t), start <= t && t <= end);
    }

    /// A wrapping entry covers exactly what its non-wrapping complement
    /// leaves out, plus both bounds.
    #[test]
    fn wrapping_entry_complements(a in minute_of_day(), b in minute_of_day(), t in minute_of_day()) {
        prop_assume!(a < b);
        let wrapping = LightScheduleEntry::new(b, a, LightSetting::off()).unwrap();
        let inside = a < t && t < b;
        prop_assert_eq!(wrapping.contains(t), !inside);
    }

    #[test]
    fn co2_opening_monotonic(low in 550.0f64..3000.0, extra in 0.0f64..3000.0) {
        let regulator = Co2Regulator::new(&ControlConfig::default());
        let a = regulator.vent_for(low);
        let b = regulator.vent_for(low + extra);
        prop_assert!(b.angle >= a.angle);
        prop_assert!(b.fan_speed >= a.fan_speed);
        prop_assert!((0.0..=180.0).contains(&b.angle));
    }

    /// The PID output never leaves its configured range, whatever the
    /// readings and timing.
    #[test]
    fn pid_output_bounded(
        inputs in proptest::collection::vec(-40.0f64..90.0, 1..50),
        step_ms in 1u64..10_000,
    ) {
        let config = ControlConfig::default();
        let mut pid = PidController::new(config.pid, -config.max_cool_output, config.max_heat_output);
        let t0 = Instant::now();
        for (i, input) in inputs.into_iter().enumerate() {
            let out = pid.update(20.0, input, t0 + Duration::from_millis(step_ms * i as u64));
            prop_assert!(out >= -config.max_cool_output && out <= config.max_heat_output);
            prop_assert!(pid.integral() >= -config.max_cool_output && pid.integral() <= config.max_heat_output);
        }
    }
}
