use super::{Applied, CycleContext, Regulator};
use crate::actuators::{labels, ActuatorFacade};
use crate::error::ActuatorError;
use crate::schedule::{LightSchedule, LightSetting};
use chrono::NaiveTime;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightingState {
    /// `HH:MM-HH:MM` of the entry in effect, `None` when nothing matches.
    pub active_entry: Option<String>,
    pub photo_mode: bool,
    pub applied: Option<LightSetting>,
}

/// Applies the photoperiod schedule, or the photo fill while photo mode is on.
#[derive(Debug)]
pub struct LightingRegulator {
    photo_setting: LightSetting,
    applied: Applied<LightSetting>,
    active_entry: Option<String>,
    photo_mode: bool,
}

impl LightingRegulator {
    pub fn new(photo_setting: LightSetting) -> Self {
        Self { photo_setting, applied: Applied::default(), active_entry: None, photo_mode: false }
    }

    /// Applies the entry in effect at `time_of_day`, or turns the lights off.
    pub fn apply_schedule(
        &mut self,
        schedule: &LightSchedule,
        time_of_day: NaiveTime,
        actuators: &mut dyn ActuatorFacade,
    ) -> Result<(), ActuatorError> {
        self.photo_mode = false;
        let (label, setting) = match schedule.active_at(time_of_day) {
            Some(entry) => (Some(entry.label()), entry.setting),
            None => (None, LightSetting::off()),
        };
        if label != self.active_entry {
            info!(entry = label.as_deref().unwrap_or("none"), "light schedule entry changed");
        }
        self.active_entry = label;
        self.apply(setting, actuators)
    }

    pub fn apply_photo(&mut self, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        self.photo_mode = true;
        self.active_entry = None;
        let setting = self.photo_setting;
        self.apply(setting, actuators)
    }

    pub fn apply_off(&mut self, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        self.photo_mode = false;
        self.active_entry = None;
        self.apply(LightSetting::off(), actuators)
    }

    pub fn active_entry(&self) -> Option<&str> {
        self.active_entry.as_deref()
    }

    fn apply(&mut self, setting: LightSetting, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        self.applied.set(setting, |s| {
            actuators.set_color(s.color)?;
            actuators.set_brightness(s.brightness)?;
            actuators.set_level(labels::WHITE_LEDS, s.white)?;
            actuators.set_level(labels::UV_LEDS, s.uv)
        })
    }
}

impl Regulator for LightingRegulator {
    type State = LightingState;

    fn name(&self) -> &'static str {
        "lighting"
    }

    fn regulate(&mut self, ctx: &CycleContext<'_>, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        if ctx.photo_mode {
            return self.apply_photo(actuators);
        }
        self.apply_schedule(&ctx.setpoints.schedule, ctx.time_of_day, actuators)
    }

    fn reset(&mut self) {
        self.applied.invalidate();
        self.active_entry = None;
        self.photo_mode = false;
    }

    fn state(&self) -> LightingState {
        LightingState {
            active_entry: self.active_entry.clone(),
            photo_mode: self.photo_mode,
            applied: self.applied.get(),
        }
    }
}
