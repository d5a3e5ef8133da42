//! Hard thermal limit on the thermoelectric stage.
//!
//! Checked every control cycle before the temperature regulator runs. A trip
//! is a gate, not a latch: the stage is held off for as long as a probe is
//! over the limit and released as soon as both are back under it.

use crate::error::ControlError;
use crate::sensors::{SensorSnapshot, PROBE_HOT_SIDE, PROBE_INTERIOR};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trip {
    pub probe: &'static str,
    pub value: f64,
    pub limit: f64,
    /// True only on the cycle the trip began.
    pub first: bool,
}

impl Trip {
    pub fn to_error(&self) -> ControlError {
        ControlError::SafetyLimitTripped { probe: self.probe, value: self.value, limit: self.limit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SafetyVerdict {
    Clear,
    Tripped(Trip),
}

impl SafetyVerdict {
    pub fn is_tripped(&self) -> bool {
        matches!(self, SafetyVerdict::Tripped(_))
    }
}

/// Trip history surfaced in status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub tripped: bool,
    pub trip_count: u32,
    pub worst_reading: Option<f64>,
}

#[derive(Debug)]
pub struct SafetyMonitor {
    limit: f64,
    tripped_since: Option<Instant>,
    status: SafetyStatus,
}

impl SafetyMonitor {
    pub fn new(limit: f64) -> Self {
        Self { limit, tripped_since: None, status: SafetyStatus::default() }
    }

    pub fn check(&mut self, readings: &SensorSnapshot, now: Instant) -> SafetyVerdict {
        let over = [(PROBE_HOT_SIDE, readings.probe1), (PROBE_INTERIOR, readings.probe2)]
            .into_iter()
            .filter_map(|(probe, value)| value.map(|v| (probe, v)))
            .filter(|(_, v)| *v > self.limit)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match over {
            Some((probe, value)) => {
                let first = self.tripped_since.is_none();
                if first {
                    self.tripped_since = Some(now);
                    self.status.trip_count = self.status.trip_count.saturating_add(1);
                    error!(probe, value, limit = self.limit, "thermal limit exceeded; thermoelectric stage forced off");
                }
                self.status.tripped = true;
                self.status.worst_reading = Some(self.status.worst_reading.map_or(value, |w| w.max(value)));
                SafetyVerdict::Tripped(Trip { probe, value, limit: self.limit, first })
            }
            None => {
                if let Some(since) = self.tripped_since.take() {
                    info!(
                        duration_s = now.saturating_duration_since(since).as_secs(),
                        "thermal limit cleared"
                    );
                }
                self.status.tripped = false;
                SafetyVerdict::Clear
            }
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped_since.is_some()
    }

    pub fn status(&self) -> SafetyStatus {
        self.status
    }
}
