//! Pull interface to the sensor drivers and the last-known-good snapshot.

use crate::error::SensorError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Thermoelectric hot side.
pub const PROBE_HOT_SIDE: &str = "Probe1";
/// Chamber interior.
pub const PROBE_INTERIOR: &str = "Probe2";
/// Outside the chamber.
pub const PROBE_AMBIENT: &str = "Probe3";

/// Decoded readings from the chamber's sensors. Implementations may retry
/// internally but must return within a bounded time.
pub trait SensorAggregator: Send {
    /// Probe name to °C; `None` for a probe that failed this round.
    fn read_temperatures(&mut self) -> Result<BTreeMap<String, Option<f64>>, SensorError>;

    /// (%RH, °C) from the combined humidity/temperature sensor.
    fn read_humidity_temperature(&mut self) -> Result<(f64, f64), SensorError>;

    /// (ppm, °C) from the CO2 analyzer.
    fn read_co2(&mut self) -> Result<(f64, f64), SensorError>;
}

/// Latest readings. A field stays `None` until its first good read and
/// afterwards always holds the last good value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub probe1: Option<f64>,
    pub probe2: Option<f64>,
    pub probe3: Option<f64>,
    pub humidity_sensor_temp: Option<f64>,
    pub co2_sensor_temp: Option<f64>,
    pub humidity: Option<f64>,
    pub co2: Option<f64>,
}

impl SensorSnapshot {
    /// Best interior temperature: the humidity sensor sits in the chamber
    /// air, the interior probe is the fallback.
    pub fn interior_temperature(&self) -> Option<f64> {
        self.humidity_sensor_temp.or(self.probe2)
    }

    pub fn ambient_temperature(&self) -> Option<f64> {
        self.probe3
    }

    pub fn temperatures(&self) -> BTreeMap<&'static str, Option<f64>> {
        BTreeMap::from([
            (PROBE_HOT_SIDE, self.probe1),
            (PROBE_INTERIOR, self.probe2),
            (PROBE_AMBIENT, self.probe3),
            ("DHT_Sensor", self.humidity_sensor_temp),
            ("CO2_Sensor", self.co2_sensor_temp),
        ])
    }

    fn merge_probes(&mut self, probes: &BTreeMap<String, Option<f64>>) {
        for (name, value) in probes {
            let Some(v) = value.filter(|v| v.is_finite()) else {
                continue;
            };
            match name.as_str() {
                PROBE_HOT_SIDE => self.probe1 = Some(v),
                PROBE_INTERIOR => self.probe2 = Some(v),
                PROBE_AMBIENT => self.probe3 = Some(v),
                other => debug!(probe = other, "ignoring unknown temperature probe"),
            }
        }
    }
}

/// Consecutive failed sensor passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorHealth {
    consecutive_failures: u32,
    threshold: u32,
}

impl SensorHealth {
    pub fn new(threshold: u32) -> Self {
        Self { consecutive_failures: 0, threshold }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true once the failure count reaches the threshold.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.is_exceeded()
    }

    pub fn is_exceeded(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Reads every sensor once and folds the results into `snapshot`.
///
/// The returned error is the first failure that counts against sensor
/// health (humidity/temperature sensor or the probe bus). CO2 analyzer
/// failures only keep the previous reading.
pub fn read_all(
    aggregator: &mut dyn SensorAggregator,
    snapshot: &mut SensorSnapshot,
) -> Result<(), SensorError> {
    let mut counted: Option<SensorError> = None;

    match aggregator.read_temperatures() {
        Ok(probes) => snapshot.merge_probes(&probes),
        Err(e) => {
            warn!(error = %e, "temperature probe read failed; keeping last values");
            counted.get_or_insert(e);
        }
    }

    match aggregator.read_humidity_temperature() {
        Ok((rh, temp)) if rh.is_finite() && temp.is_finite() => {
            snapshot.humidity = Some(rh);
            snapshot.humidity_sensor_temp = Some(temp);
        }
        Ok((rh, temp)) => {
            let e = SensorError::BadFrame {
                sensor: "humidity",
                detail: format!("non-finite reading ({rh}, {temp})"),
            };
            warn!(error = %e, "humidity read rejected; keeping last values");
            counted.get_or_insert(e);
        }
        Err(e) => {
            warn!(error = %e, "humidity read failed; keeping last values");
            counted.get_or_insert(e);
        }
    }

    match aggregator.read_co2() {
        Ok((ppm, temp)) if ppm.is_finite() => {
            snapshot.co2 = Some(ppm);
            if temp.is_finite() {
                snapshot.co2_sensor_temp = Some(temp);
            }
        }
        Ok((ppm, _)) => warn!(ppm, "CO2 reading rejected; keeping last value"),
        Err(e) => warn!(error = %e, "CO2 read failed; keeping last value"),
    }

    match counted {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
