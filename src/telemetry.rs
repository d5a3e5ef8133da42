//! Periodic log rows.
//!
//! The loop decides what goes into a row and when; where rows end up is the
//! business of a [`LogSink`].

use crate::actuators::{labels, ActuatorMirror};
use crate::sensors::SensorSnapshot;
use crate::state::{Setpoints, SystemState};
use chrono::{DateTime, Local};
use heapless::Deque;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io;

const MEMORY_SINK_CAPACITY: usize = 128;

pub const CSV_HEADER: &str = "timestamp,system_state,temp_setpoint,humidity_setpoint,co2_setpoint,\
temp_probe1,temp_probe2,temp_probe3,temp_dht,temp_co2,humidity,co2_ppm,\
peltier_mode,peltier_duty,peltier_enabled,humidifier,internal_fan,\
vent_angle,vent_fan_speed,active_light_schedule,neopixel_color,neopixel_intensity,\
white_intensity,uv_intensity,photo_mode";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub system_state: SystemState,
    pub temp_setpoint: f64,
    pub humidity_setpoint: f64,
    pub co2_setpoint: f64,
    pub readings: SensorSnapshot,
    pub peltier_mode: String,
    pub peltier_duty: f64,
    pub peltier_enabled: bool,
    pub humidifier: bool,
    pub internal_fan: bool,
    pub vent_angle: f64,
    pub vent_fan_speed: f64,
    pub active_light_schedule: Option<String>,
    pub neopixel_color: String,
    pub neopixel_intensity: f64,
    /// Duty percent.
    pub white_intensity: f64,
    /// Duty percent.
    pub uv_intensity: f64,
    pub photo_mode: bool,
}

impl LogRecord {
    pub fn capture(
        timestamp: DateTime<Local>,
        system_state: SystemState,
        setpoints: &Setpoints,
        readings: &SensorSnapshot,
        mirror: &ActuatorMirror,
        active_light_schedule: Option<String>,
        photo_mode: bool,
    ) -> Self {
        Self {
            timestamp,
            system_state,
            temp_setpoint: setpoints.temperature,
            humidity_setpoint: setpoints.humidity,
            co2_setpoint: setpoints.co2_max,
            readings: *readings,
            peltier_mode: mirror.thermal.mode.as_str().to_string(),
            peltier_duty: mirror.thermal.duty,
            peltier_enabled: mirror.thermal.enabled,
            humidifier: mirror.is_on(labels::HUMIDIFIER),
            internal_fan: mirror.is_on(labels::INTERNAL_FAN),
            vent_angle: mirror.vent_angle,
            vent_fan_speed: mirror.value(labels::INTAKE_FAN),
            active_light_schedule,
            neopixel_color: mirror.light.color.as_str().to_string(),
            neopixel_intensity: mirror.light.brightness,
            white_intensity: mirror.value(labels::WHITE_LEDS),
            uv_intensity: mirror.value(labels::UV_LEDS),
            photo_mode,
        }
    }

    pub fn csv_header() -> &'static str {
        CSV_HEADER
    }

    /// One CSV line without the trailing newline. Missing readings are empty
    /// fields.
    pub fn csv_row(&self) -> String {
        fn opt(v: Option<f64>) -> String {
            v.map(|v| format!("{v:.2}")).unwrap_or_default()
        }

        let r = &self.readings;
        let mut row = String::with_capacity(256);
        let _ = write!(
            row,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{:.3},{},{},{},{},{:.3},{},{},{:.3},{:.1},{:.1},{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.system_state,
            self.temp_setpoint,
            self.humidity_setpoint,
            self.co2_setpoint,
            opt(r.probe1),
            opt(r.probe2),
            opt(r.probe3),
            opt(r.humidity_sensor_temp),
            opt(r.co2_sensor_temp),
            opt(r.humidity),
            opt(r.co2),
            self.peltier_mode,
            self.peltier_duty,
            self.peltier_enabled,
            self.humidifier,
            self.internal_fan,
            self.vent_angle,
            self.vent_fan_speed,
            self.active_light_schedule.as_deref().unwrap_or("None"),
            self.neopixel_color,
            self.neopixel_intensity,
            self.white_intensity,
            self.uv_intensity,
            self.photo_mode,
        );
        row
    }
}

/// Destination for log rows.
pub trait LogSink: Send {
    fn write(&mut self, record: &LogRecord) -> io::Result<()>;
}

/// Keeps the most recent rows in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Deque<LogRecord, MEMORY_SINK_CAPACITY>,
    written: u64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    pub fn latest(&self) -> Option<&LogRecord> {
        self.records.back()
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        if self.records.is_full() {
            self.records.pop_front();
        }
        let _ = self.records.push_back(record.clone());
        self.written += 1;
        Ok(())
    }
}

/// Writes CSV to any `io::Write`, header first.
pub struct CsvSink<W: io::Write + Send> {
    out: W,
    header_written: bool,
}

impl<W: io::Write + Send> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, header_written: false }
    }

    /// For appending to a file that already has its header.
    pub fn without_header(out: W) -> Self {
        Self { out, header_written: true }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: io::Write + Send> LogSink for CsvSink<W> {
    fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{CSV_HEADER}")?;
            self.header_written = true;
        }
        writeln!(self.out, "{}", record.csv_row())?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LogRecord {
        let mut mirror = ActuatorMirror::default();
        mirror.outputs.insert(labels::HUMIDIFIER.into(), 1.0);
        mirror.outputs.insert(labels::WHITE_LEDS.into(), 40.0);
        let readings = SensorSnapshot { humidity: Some(81.5), co2: Some(640.0), ..Default::default() };
        LogRecord::capture(
            Local::now(),
            SystemState::Active,
            &Setpoints::default(),
            &readings,
            &mirror,
            Some("08:00-17:00".into()),
            false,
        )
    }

    #[test]
    fn test_row_matches_header_width() {
        let columns = CSV_HEADER.split(',').count();
        assert_eq!(columns, 25);
        assert_eq!(record().csv_row().split(',').count(), columns);
    }

    #[test]
    fn test_row_fields() {
        let row = record().csv_row();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[1], "active");
        assert_eq!(fields[5], "");
        assert_eq!(fields[10], "81.50");
        assert_eq!(fields[15], "true");
        assert_eq!(fields[19], "08:00-17:00");
        assert_eq!(fields[22], "40.0");
    }

    #[test]
    fn test_csv_sink_writes_header_once() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write(&record()).unwrap();
        sink.write(&record()).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
    }

    #[test]
    fn test_appending_sink_skips_header() {
        let mut sink = CsvSink::without_header(Vec::new());
        sink.write(&record()).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(!text.contains(CSV_HEADER));
    }

    #[test]
    fn test_memory_sink_is_bounded() {
        let mut sink = MemorySink::new();
        for _ in 0..(MEMORY_SINK_CAPACITY + 5) {
            sink.write(&record()).unwrap();
        }
        assert_eq!(sink.records().count(), MEMORY_SINK_CAPACITY);
        assert_eq!(sink.written(), (MEMORY_SINK_CAPACITY + 5) as u64);
    }
}
