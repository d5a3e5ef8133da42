//! Simulated sensors and a recording output driver.
//!
//! Used by the `chamber-sim` binary and by the test suite. Sensor values are
//! held behind a shared handle so a test (or the simulator's plant model)
//! can move them while the controller owns the aggregator.

use crate::actuators::{OutputDriver, Rgb};
use crate::error::{ActuatorError, SensorError};
use crate::sensors::{SensorAggregator, PROBE_AMBIENT, PROBE_HOT_SIDE, PROBE_INTERIOR};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Random read dropouts for the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropoutConfig {
    pub enabled: bool,
    pub probe_rate_percent: f32,
    pub humidity_rate_percent: f32,
    pub co2_rate_percent: f32,
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probe_rate_percent: 1.0,
            humidity_rate_percent: 2.0,
            co2_rate_percent: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorScript {
    pub probes: BTreeMap<String, Option<f64>>,
    pub humidity: f64,
    pub humidity_temp: f64,
    pub co2: f64,
    pub co2_temp: f64,
    pub fail_probes: bool,
    pub fail_humidity: bool,
    pub fail_co2: bool,
    pub dropout: DropoutConfig,
    pub reads: u64,
    rng_state: u64,
}

impl Default for SensorScript {
    fn default() -> Self {
        Self {
            probes: BTreeMap::from([
                (PROBE_HOT_SIDE.to_string(), Some(25.0)),
                (PROBE_INTERIOR.to_string(), Some(20.0)),
                (PROBE_AMBIENT.to_string(), Some(22.0)),
            ]),
            humidity: 85.0,
            humidity_temp: 20.0,
            co2: 600.0,
            co2_temp: 20.0,
            fail_probes: false,
            fail_humidity: false,
            fail_co2: false,
            dropout: DropoutConfig::default(),
            reads: 0,
            rng_state: 0x1234_5678_9ABC_DEF0,
        }
    }
}

impl SensorScript {
    // Linear congruential generator; fixed seed keeps runs reproducible.
    fn random_percent(&mut self) -> f32 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.rng_state >> 33) % 10_000) as f32 / 100.0
    }

    fn drops(&mut self, rate_percent: f32) -> bool {
        self.dropout.enabled && self.random_percent() < rate_percent
    }
}

/// Shared handle to a [`SensorScript`].
#[derive(Debug, Clone, Default)]
pub struct SensorHandle {
    script: Arc<Mutex<SensorScript>>,
}

impl SensorHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensors(&self) -> SimulatedSensors {
        SimulatedSensors { script: Arc::clone(&self.script) }
    }

    /// Moves every interior reading (probe and humidity sensor) together.
    pub fn set_interior_temperature(&self, celsius: f64) {
        let mut s = self.script.lock();
        s.probes.insert(PROBE_INTERIOR.to_string(), Some(celsius));
        s.humidity_temp = celsius;
    }

    pub fn set_probe(&self, name: &str, celsius: Option<f64>) {
        self.script.lock().probes.insert(name.to_string(), celsius);
    }

    pub fn set_humidity(&self, percent: f64) {
        self.script.lock().humidity = percent;
    }

    pub fn set_co2(&self, ppm: f64) {
        self.script.lock().co2 = ppm;
    }

    pub fn fail_probes(&self, fail: bool) {
        self.script.lock().fail_probes = fail;
    }

    pub fn fail_humidity(&self, fail: bool) {
        self.script.lock().fail_humidity = fail;
    }

    pub fn fail_co2(&self, fail: bool) {
        self.script.lock().fail_co2 = fail;
    }

    pub fn set_dropout(&self, dropout: DropoutConfig) {
        self.script.lock().dropout = dropout;
    }

    /// Runs `f` against the script under its lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut SensorScript) -> R) -> R {
        f(&mut self.script.lock())
    }

    pub fn snapshot(&self) -> SensorScript {
        self.script.lock().clone()
    }
}

pub struct SimulatedSensors {
    script: Arc<Mutex<SensorScript>>,
}

impl SensorAggregator for SimulatedSensors {
    fn read_temperatures(&mut self) -> Result<BTreeMap<String, Option<f64>>, SensorError> {
        let mut s = self.script.lock();
        s.reads += 1;
        let rate = s.dropout.probe_rate_percent;
        if s.fail_probes || s.drops(rate) {
            return Err(SensorError::Timeout("one-wire bus"));
        }
        Ok(s.probes.clone())
    }

    fn read_humidity_temperature(&mut self) -> Result<(f64, f64), SensorError> {
        let mut s = self.script.lock();
        let rate = s.dropout.humidity_rate_percent;
        if s.fail_humidity || s.drops(rate) {
            return Err(SensorError::Unavailable("humidity"));
        }
        Ok((s.humidity, s.humidity_temp))
    }

    fn read_co2(&mut self) -> Result<(f64, f64), SensorError> {
        let mut s = self.script.lock();
        let rate = s.dropout.co2_rate_percent;
        if s.fail_co2 || s.drops(rate) {
            return Err(SensorError::BadFrame { sensor: "co2", detail: "checksum mismatch".into() });
        }
        Ok((s.co2, s.co2_temp))
    }
}

/// Shared switchboard of output channels whose writes fail.
///
/// Cloned out of a [`RecordingDriver`] before the driver moves into a
/// controller, so faults can be injected and cleared mid-run.
#[derive(Debug, Clone, Default)]
pub struct ChannelFaults {
    failing: Arc<Mutex<BTreeSet<String>>>,
}

impl ChannelFaults {
    /// Makes every later write to `channel` fail.
    pub fn fail(&self, channel: &str) {
        self.failing.lock().insert(channel.to_string());
    }

    pub fn heal(&self, channel: &str) {
        self.failing.lock().remove(channel);
    }

    fn check(&self, channel: &str) -> Result<(), ActuatorError> {
        if self.failing.lock().contains(channel) {
            Err(ActuatorError::Driver { label: channel.to_string(), detail: "injected failure".into() })
        } else {
            Ok(())
        }
    }
}

/// Output driver that remembers the last value written to every channel.
#[derive(Debug, Default, Clone)]
pub struct RecordingDriver {
    digital: BTreeMap<String, bool>,
    duties: BTreeMap<String, f64>,
    pixels: Vec<Rgb>,
    brightness: f64,
    writes: u64,
    faults: ChannelFaults,
}

pub const PIXEL_CHANNEL: &str = "neopixel";

impl RecordingDriver {
    pub fn digital(&self, channel: &str) -> Option<bool> {
        self.digital.get(channel).copied()
    }

    pub fn duty(&self, channel: &str) -> Option<f64> {
        self.duties.get(channel).copied()
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn brightness(&self) -> f64 {
        self.brightness
    }

    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Handle on this driver's failure injection.
    pub fn faults(&self) -> ChannelFaults {
        self.faults.clone()
    }
}

impl OutputDriver for RecordingDriver {
    fn write_digital(&mut self, channel: &str, high: bool) -> Result<(), ActuatorError> {
        self.faults.check(channel)?;
        self.digital.insert(channel.to_string(), high);
        self.writes += 1;
        Ok(())
    }

    fn write_duty(&mut self, channel: &str, duty: f64) -> Result<(), ActuatorError> {
        self.faults.check(channel)?;
        self.duties.insert(channel.to_string(), duty);
        self.writes += 1;
        Ok(())
    }

    fn write_pixels(&mut self, pixels: &[Rgb], brightness: f64) -> Result<(), ActuatorError> {
        self.faults.check(PIXEL_CHANNEL)?;
        self.pixels = pixels.to_vec();
        self.brightness = brightness;
        self.writes += 1;
        Ok(())
    }
}
