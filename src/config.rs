//! Tunable parameters for the control loop and every regulator.
//!
//! Defaults match the chamber hardware this loop was tuned on. A deployment
//! can override any field from a JSON document; missing fields keep their
//! defaults.

use crate::error::ConfigError;
use crate::schedule::LightSetting;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Proportional, integral and derivative gains for the temperature loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self { kp: 2.0, ki: 0.1, kd: 0.5 }
    }
}

impl PidGains {
    pub fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    // --- Loop cadence ---
    pub poll_interval_ms: u64,
    pub sensor_interval_ms: u64,
    pub control_interval_ms: u64,
    pub log_interval_ms: u64,
    /// Sleep after a cycle in which a regulator faulted.
    pub fault_backoff_ms: u64,
    /// Bound on how long `stop()` waits for the loop task.
    pub stop_timeout_ms: u64,

    // --- Temperature ---
    pub pid: PidGains,
    /// Heating authority of the thermoelectric stage (0..1 duty).
    pub max_heat_output: f64,
    /// Cooling authority of the thermoelectric stage (0..1 duty).
    pub max_cool_output: f64,
    /// Feed-forward duty per °C of (setpoint - ambient).
    pub bias_gain: f64,
    pub bias_limit: f64,
    pub deadband: f64,
    /// Absolute probe limit; above it the thermoelectric stage is forced off.
    pub thermal_limit_c: f64,

    // --- Humidity ---
    pub stability_band_c: f64,
    pub stability_hold_secs: u64,
    pub humidity_dry_threshold: f64,
    pub humidity_wet_threshold: f64,
    /// Excess %RH that opens the vents fully while ventilating.
    pub humidity_vent_scale: f64,
    pub trend_interval_secs: u64,
    pub trend_sample_secs: u64,
    /// Minimum drop in %RH between trailing halves that counts as decreasing.
    pub trend_min_drop: f64,
    pub evap_cooling_secs: u64,
    pub cooldown_secs: u64,
    pub humidifier_max_on_secs: u64,
    pub humidifier_rest_secs: u64,

    // --- CO2 ---
    /// Reduction keeps venting until the reading falls below this value.
    pub co2_target_ppm: f64,
    /// Excess ppm above the target that opens the vents fully.
    pub co2_vent_scale_ppm: f64,

    // --- Ventilation (shared) ---
    pub vent_min_opening: f64,
    pub vent_min_fan_speed: f64,

    // --- Health ---
    pub max_sensor_errors: u32,

    // --- Lighting ---
    pub photo_light: LightSetting,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            sensor_interval_ms: 2_000,
            control_interval_ms: 2_000,
            log_interval_ms: 5_000,
            fault_backoff_ms: 1_000,
            stop_timeout_ms: 5_000,

            pid: PidGains::default(),
            max_heat_output: 0.6,
            max_cool_output: 1.0,
            bias_gain: 0.02,
            bias_limit: 0.15,
            deadband: 0.1,
            thermal_limit_c: 60.0,

            stability_band_c: 1.0,
            stability_hold_secs: 300,
            humidity_dry_threshold: 5.0,
            humidity_wet_threshold: 5.0,
            humidity_vent_scale: 20.0,
            trend_interval_secs: 120,
            trend_sample_secs: 10,
            trend_min_drop: 0.5,
            evap_cooling_secs: 300,
            cooldown_secs: 4 * 3600,
            humidifier_max_on_secs: 1_800,
            humidifier_rest_secs: 5,

            co2_target_ppm: 550.0,
            co2_vent_scale_ppm: 500.0,

            vent_min_opening: 0.25,
            vent_min_fan_speed: 0.4,

            max_sensor_errors: 5,

            photo_light: LightSetting::photo(),
        }
    }
}

impl ControlConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
            ConfigError::Invalid { field, reason }
        }

        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be positive"));
        }
        if self.sensor_interval_ms < self.poll_interval_ms {
            return Err(invalid("sensor_interval_ms", "shorter than the poll interval"));
        }
        if self.control_interval_ms < self.poll_interval_ms {
            return Err(invalid("control_interval_ms", "shorter than the poll interval"));
        }
        if self.log_interval_ms == 0 {
            return Err(invalid("log_interval_ms", "must be positive"));
        }
        if !self.pid.is_finite() {
            return Err(invalid("pid", "gains must be finite"));
        }
        if !(self.max_heat_output > 0.0 && self.max_heat_output <= 1.0) {
            return Err(invalid("max_heat_output", "must be in (0, 1]"));
        }
        if !(self.max_cool_output > 0.0 && self.max_cool_output <= 1.0) {
            return Err(invalid("max_cool_output", "must be in (0, 1]"));
        }
        if !(self.bias_limit >= 0.0 && self.bias_limit < self.max_heat_output) {
            return Err(invalid("bias_limit", "must be below the heating authority"));
        }
        if !(self.deadband >= 0.0 && self.deadband < self.max_heat_output) {
            return Err(invalid("deadband", "must be below the heating authority"));
        }
        if !self.thermal_limit_c.is_finite() {
            return Err(invalid("thermal_limit_c", "must be finite"));
        }
        if !(self.humidity_dry_threshold > 0.0 && self.humidity_wet_threshold > 0.0) {
            return Err(invalid("humidity_threshold", "must be positive"));
        }
        if self.humidity_vent_scale <= 0.0 || self.co2_vent_scale_ppm <= 0.0 {
            return Err(invalid("vent_scale", "must be positive"));
        }
        if self.trend_sample_secs == 0 || self.trend_sample_secs > self.trend_interval_secs {
            return Err(invalid("trend_sample_secs", "must be positive and within the trend interval"));
        }
        if self.co2_target_ppm <= 0.0 {
            return Err(invalid("co2_target_ppm", "must be positive"));
        }
        if !(self.vent_min_opening > 0.0 && self.vent_min_opening <= 1.0) {
            return Err(invalid("vent_min_opening", "must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.vent_min_fan_speed) {
            return Err(invalid("vent_min_fan_speed", "must be in [0, 1]"));
        }
        if self.max_sensor_errors == 0 {
            return Err(invalid("max_sensor_errors", "must be at least 1"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sensor_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_interval_ms)
    }

    pub fn control_interval(&self) -> Duration {
        Duration::from_millis(self.control_interval_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
