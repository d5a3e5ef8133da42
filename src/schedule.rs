//! Photoperiod schedule: time-of-day windows mapped to light settings.

use crate::error::ControlError;
use chrono::{NaiveTime, Timelike};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_SCHEDULE_ENTRIES: usize = 16;

/// Palette understood by the addressable light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightColor {
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
    White,
    Orange,
    Purple,
    Off,
}

impl LightColor {
    pub const ALL: [LightColor; 10] = [
        LightColor::Red,
        LightColor::Green,
        LightColor::Blue,
        LightColor::Yellow,
        LightColor::Cyan,
        LightColor::Magenta,
        LightColor::White,
        LightColor::Orange,
        LightColor::Purple,
        LightColor::Off,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LightColor::Red => "red",
            LightColor::Green => "green",
            LightColor::Blue => "blue",
            LightColor::Yellow => "yellow",
            LightColor::Cyan => "cyan",
            LightColor::Magenta => "magenta",
            LightColor::White => "white",
            LightColor::Orange => "orange",
            LightColor::Purple => "purple",
            LightColor::Off => "off",
        }
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        match self {
            LightColor::Red => (255, 0, 0),
            LightColor::Green => (0, 255, 0),
            LightColor::Blue => (0, 0, 255),
            LightColor::Yellow => (255, 255, 0),
            LightColor::Cyan => (0, 255, 255),
            LightColor::Magenta => (255, 0, 255),
            LightColor::White => (255, 255, 255),
            LightColor::Orange => (255, 165, 0),
            LightColor::Purple => (128, 0, 128),
            LightColor::Off => (0, 0, 0),
        }
    }
}

impl fmt::Display for LightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownColor(pub String);

impl FromStr for LightColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        LightColor::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

/// What the lights should show. Intensities are fractions in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightSetting {
    pub color: LightColor,
    pub brightness: f64,
    pub white: f64,
    pub uv: f64,
}

impl LightSetting {
    pub fn off() -> Self {
        Self { color: LightColor::Off, brightness: 0.0, white: 0.0, uv: 0.0 }
    }

    /// Bright white fill used while photographing the chamber.
    pub fn photo() -> Self {
        Self { color: LightColor::White, brightness: 1.0, white: 1.0, uv: 0.0 }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        for (name, v) in [("brightness", self.brightness), ("white", self.white), ("uv", self.uv)] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(name);
            }
        }
        Ok(())
    }
}

/// A schedule entry as submitted by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub start: String,
    pub end: String,
    pub color: String,
    pub brightness: f64,
    pub white: f64,
    pub uv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightScheduleEntry {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(flatten)]
    pub setting: LightSetting,
}

impl LightScheduleEntry {
    pub fn new(start: NaiveTime, end: NaiveTime, setting: LightSetting) -> Result<Self, ControlError> {
        setting
            .validate()
            .map_err(|field| ControlError::InvalidSchedule(format!("{field} must be within [0, 1]")))?;
        Ok(Self { start: truncate_to_minute(start), end: truncate_to_minute(end), setting })
    }

    pub fn from_request(req: &ScheduleRequest) -> Result<Self, ControlError> {
        let start = parse_hhmm(&req.start)?;
        let end = parse_hhmm(&req.end)?;
        let color = req
            .color
            .parse::<LightColor>()
            .map_err(|e| ControlError::InvalidSchedule(format!("unknown color '{}'", e.0)))?;
        Self::new(
            start,
            end,
            LightSetting { color, brightness: req.brightness, white: req.white, uv: req.uv },
        )
    }

    /// Bounds are inclusive at minute resolution. A window whose end is
    /// earlier than its start runs across midnight.
    pub fn contains(&self, time_of_day: NaiveTime) -> bool {
        let t = truncate_to_minute(time_of_day);
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Ordered list of entries; the first one containing the current time wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSchedule {
    entries: Vec<LightScheduleEntry, MAX_SCHEDULE_ENTRIES>,
}

impl LightSchedule {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn from_entries<I>(entries: I) -> Result<Self, ControlError>
    where
        I: IntoIterator<Item = LightScheduleEntry>,
    {
        let mut out = Vec::new();
        for entry in entries {
            out.push(entry).map_err(|_| {
                ControlError::InvalidSchedule(format!("more than {MAX_SCHEDULE_ENTRIES} entries"))
            })?;
        }
        Ok(Self { entries: out })
    }

    /// Parses every request before building anything, so a bad entry
    /// anywhere rejects the whole list.
    pub fn from_requests(requests: &[ScheduleRequest]) -> Result<Self, ControlError> {
        let parsed = requests
            .iter()
            .map(LightScheduleEntry::from_request)
            .collect::<Result<std::vec::Vec<_>, _>>()?;
        Self::from_entries(parsed)
    }

    pub fn active_at(&self, time_of_day: NaiveTime) -> Option<&LightScheduleEntry> {
        self.entries.iter().find(|e| e.contains(time_of_day))
    }

    pub fn entries(&self) -> &[LightScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LightSchedule {
    fn default() -> Self {
        let mut entries = Vec::new();
        let _ = entries.push(LightScheduleEntry {
            start: hm(8, 0),
            end: hm(17, 0),
            setting: LightSetting::off(),
        });
        Self { entries }
    }
}

pub fn parse_hhmm(text: &str) -> Result<NaiveTime, ControlError> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M")
        .map_err(|_| ControlError::InvalidSchedule(format!("'{text}' is not a valid HH:MM time")))
}

fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    hm(t.hour(), t.minute())
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format("%H:%M"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveTime::parse_from_str(&text, "%H:%M").map_err(D::Error::custom)
    }
}
