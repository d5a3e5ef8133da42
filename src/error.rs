use thiserror::Error;

/// Failures reported by the sensor aggregator. The control loop never lets
/// these escape; it keeps the last good value and counts the failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor {0} unavailable")]
    Unavailable(&'static str),
    #[error("sensor {0} timed out")]
    Timeout(&'static str),
    #[error("sensor {sensor} returned a bad frame: {detail}")]
    BadFrame { sensor: &'static str, detail: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("unknown actuator label '{0}'")]
    UnknownLabel(String),
    #[error("actuator '{label}' does not support {operation}")]
    Unsupported { label: String, operation: &'static str },
    #[error("value {value} out of range for '{label}'")]
    OutOfRange { label: String, value: f64 },
    #[error("unknown light color '{0}'")]
    UnknownColor(String),
    #[error("driver failure on '{label}': {detail}")]
    Driver { label: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("invalid value {value} for {field}")]
    InvalidParameter { field: &'static str, value: f64 },
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("invalid system state '{0}'")]
    InvalidState(String),
    #[error("sensor read failed: {0}")]
    Sensor(#[from] SensorError),
    #[error("sensor health exceeded after {failures} consecutive failures")]
    SensorHealthExceeded { failures: u32 },
    #[error("actuator command failed: {0}")]
    Actuator(#[from] ActuatorError),
    #[error("safety limit tripped: {probe} at {value:.1}°C (limit {limit:.1}°C)")]
    SafetyLimitTripped { probe: &'static str, value: f64, limit: f64 },
    #[error("control loop already running")]
    AlreadyRunning,
    #[error("control loop not running")]
    NotRunning,
    #[error("no tokio runtime available to host the control loop")]
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("config field {field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
    #[error("config parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
