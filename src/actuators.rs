//! Capability-oriented actuator interface and the chamber's output bank.
//!
//! The control loop only talks to [`ActuatorFacade`]. [`ActuatorBank`] is the
//! stock implementation: a fixed set of output kinds, each with its own
//! scaling rule, writing through a low-level [`OutputDriver`].

use crate::error::ActuatorError;
use crate::schedule::LightColor;
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub mod labels {
    pub const WATER_PUMP: &str = "water_pump";
    pub const HUMIDIFIER: &str = "humidifier";
    pub const INTERNAL_FAN: &str = "internal_fan";
    pub const INTAKE_FAN: &str = "intake_fan";
    pub const OUTFLOW_FAN: &str = "outflow_fan";
    pub const PELTIER_FAN: &str = "peltier_fan";
    pub const WHITE_LEDS: &str = "white_leds";
    pub const UV_LEDS: &str = "uv_leds";

    pub const ALL: [&str; 8] = [
        WATER_PUMP,
        HUMIDIFIER,
        INTERNAL_FAN,
        INTAKE_FAN,
        OUTFLOW_FAN,
        PELTIER_FAN,
        WHITE_LEDS,
        UV_LEDS,
    ];
}

/// Driver channel names for the outputs that are not addressed by label.
pub mod channels {
    pub const VENT_SERVO: &str = "vent_servo";
    pub const THERMAL_LEFT_ENABLE: &str = "thermal_left_enable";
    pub const THERMAL_RIGHT_ENABLE: &str = "thermal_right_enable";
    pub const THERMAL_LEFT_PWM: &str = "thermal_left_pwm";
    pub const THERMAL_RIGHT_PWM: &str = "thermal_right_pwm";
}

pub const PIXEL_COUNT: usize = 12;
pub const SERVO_MIN_DUTY: f64 = 4.5;
pub const SERVO_MAX_DUTY: f64 = 10.0;
pub const MAX_VENT_ANGLE: f64 = 180.0;

pub type Rgb = (u8, u8, u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalMode {
    Heat,
    Cool,
    Off,
}

impl ThermalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThermalMode::Heat => "heat",
            ThermalMode::Cool => "cool",
            ThermalMode::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalState {
    pub mode: ThermalMode,
    pub duty: f64,
    pub enabled: bool,
}

impl Default for ThermalState {
    fn default() -> Self {
        Self { mode: ThermalMode::Off, duty: 0.0, enabled: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub color: LightColor,
    pub brightness: f64,
    pub pixels: ArrayVec<Rgb, PIXEL_COUNT>,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            color: LightColor::Off,
            brightness: 0.0,
            pixels: std::iter::repeat(LightColor::Off.rgb()).take(PIXEL_COUNT).collect(),
        }
    }
}

/// What the actuators were last successfully told to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActuatorMirror {
    /// Labelled outputs in their native scale: 0/1 for switches, 0..1 for
    /// fans, 0..100 for LED channels.
    pub outputs: BTreeMap<String, f64>,
    pub vent_angle: f64,
    pub thermal: ThermalState,
    pub light: LightState,
}

impl ActuatorMirror {
    pub fn value(&self, label: &str) -> f64 {
        self.outputs.get(label).copied().unwrap_or(0.0)
    }

    pub fn is_on(&self, label: &str) -> bool {
        self.value(label) > 0.0
    }
}

/// Commands the control loop issues. Levels are fractions in [0, 1]
/// regardless of how the underlying output is scaled.
pub trait ActuatorFacade: Send {
    fn turn_on(&mut self, label: &str) -> Result<(), ActuatorError>;
    fn turn_off(&mut self, label: &str) -> Result<(), ActuatorError>;
    fn set_level(&mut self, label: &str, level: f64) -> Result<(), ActuatorError>;
    /// Vent position in degrees, 0 (closed) to 180 (open).
    fn set_angle(&mut self, angle: f64) -> Result<(), ActuatorError>;
    fn thermal_enable(&mut self, left: bool, right: bool) -> Result<(), ActuatorError>;
    fn thermal_disable(&mut self) -> Result<(), ActuatorError>;
    fn set_thermal_power(&mut self, power: f64, mode: ThermalMode) -> Result<(), ActuatorError>;
    fn set_color(&mut self, color: LightColor) -> Result<(), ActuatorError>;
    fn set_brightness(&mut self, brightness: f64) -> Result<(), ActuatorError>;
    fn mirror(&self) -> ActuatorMirror;
}

/// Drives every output to its safe state. Keeps going after individual
/// failures and returns them all.
pub fn safe_shutdown(actuators: &mut dyn ActuatorFacade) -> Vec<ActuatorError> {
    let mut failures = Vec::new();
    let mut note = |r: Result<(), ActuatorError>| {
        if let Err(e) = r {
            failures.push(e);
        }
    };

    note(actuators.set_thermal_power(0.0, ThermalMode::Off));
    note(actuators.thermal_disable());
    for label in labels::ALL {
        note(actuators.turn_off(label));
    }
    note(actuators.set_angle(0.0));
    note(actuators.set_color(LightColor::Off));
    note(actuators.set_brightness(0.0));

    for e in &failures {
        warn!(error = %e, "output did not reach its safe state");
    }
    failures
}

/// Low-level writes in each output's native units.
pub trait OutputDriver: Send {
    fn write_digital(&mut self, channel: &str, high: bool) -> Result<(), ActuatorError>;
    fn write_duty(&mut self, channel: &str, duty: f64) -> Result<(), ActuatorError>;
    fn write_pixels(&mut self, pixels: &[Rgb], brightness: f64) -> Result<(), ActuatorError>;
}

/// Scaling rule for a labelled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// On/off line.
    Binary,
    /// PWM taking a 0..1 value.
    Proportional,
    /// PWM taking a 0..100 duty percentage.
    Percent,
}

impl OutputKind {
    fn native(&self, level: f64) -> f64 {
        match self {
            OutputKind::Binary => {
                if level > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            OutputKind::Proportional => level,
            OutputKind::Percent => level * 100.0,
        }
    }

    fn write<D: OutputDriver>(&self, driver: &mut D, channel: &str, native: f64) -> Result<(), ActuatorError> {
        match self {
            OutputKind::Binary => driver.write_digital(channel, native > 0.0),
            OutputKind::Proportional | OutputKind::Percent => driver.write_duty(channel, native),
        }
    }
}

/// Maps a vent angle onto the servo's duty range.
pub fn servo_duty(angle: f64) -> f64 {
    let clamped = angle.clamp(0.0, MAX_VENT_ANGLE);
    SERVO_MIN_DUTY + clamped / MAX_VENT_ANGLE * (SERVO_MAX_DUTY - SERVO_MIN_DUTY)
}

pub struct ActuatorBank<D: OutputDriver> {
    driver: D,
    kinds: BTreeMap<&'static str, OutputKind>,
    mirror: ActuatorMirror,
}

impl<D: OutputDriver> ActuatorBank<D> {
    pub fn new(driver: D, kinds: impl IntoIterator<Item = (&'static str, OutputKind)>) -> Self {
        let kinds: BTreeMap<_, _> = kinds.into_iter().collect();
        let mirror = ActuatorMirror {
            outputs: kinds.keys().map(|label| (label.to_string(), 0.0)).collect(),
            ..ActuatorMirror::default()
        };
        Self { driver, kinds, mirror }
    }

    /// The chamber's standard wiring.
    pub fn chamber(driver: D) -> Self {
        use labels::*;
        Self::new(
            driver,
            [
                (WATER_PUMP, OutputKind::Binary),
                (HUMIDIFIER, OutputKind::Binary),
                (INTERNAL_FAN, OutputKind::Proportional),
                (INTAKE_FAN, OutputKind::Proportional),
                (OUTFLOW_FAN, OutputKind::Proportional),
                (PELTIER_FAN, OutputKind::Proportional),
                (WHITE_LEDS, OutputKind::Percent),
                (UV_LEDS, OutputKind::Percent),
            ],
        )
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn kind(&self, label: &str) -> Result<(&'static str, OutputKind), ActuatorError> {
        self.kinds
            .get_key_value(label)
            .map(|(l, k)| (*l, *k))
            .ok_or_else(|| ActuatorError::UnknownLabel(label.to_string()))
    }

    fn drive(&mut self, label: &str, level: f64) -> Result<(), ActuatorError> {
        if !level.is_finite() || !(0.0..=1.0).contains(&level) {
            return Err(ActuatorError::OutOfRange { label: label.to_string(), value: level });
        }
        let (label, kind) = self.kind(label)?;
        let native = kind.native(level);
        kind.write(&mut self.driver, label, native)?;
        self.mirror.outputs.insert(label.to_string(), native);
        debug!(label, native, "output updated");
        Ok(())
    }

    fn write_pixels(&mut self, pixels: ArrayVec<Rgb, PIXEL_COUNT>, brightness: f64) -> Result<(), ActuatorError> {
        self.driver.write_pixels(&pixels, brightness)?;
        self.mirror.light.pixels = pixels;
        self.mirror.light.brightness = brightness;
        Ok(())
    }
}

impl<D: OutputDriver> ActuatorFacade for ActuatorBank<D> {
    fn turn_on(&mut self, label: &str) -> Result<(), ActuatorError> {
        self.drive(label, 1.0)
    }

    fn turn_off(&mut self, label: &str) -> Result<(), ActuatorError> {
        self.drive(label, 0.0)
    }

    fn set_level(&mut self, label: &str, level: f64) -> Result<(), ActuatorError> {
        self.drive(label, level)
    }

    fn set_angle(&mut self, angle: f64) -> Result<(), ActuatorError> {
        if !angle.is_finite() {
            return Err(ActuatorError::OutOfRange { label: channels::VENT_SERVO.into(), value: angle });
        }
        let angle = angle.clamp(0.0, MAX_VENT_ANGLE);
        self.driver.write_duty(channels::VENT_SERVO, servo_duty(angle))?;
        self.mirror.vent_angle = angle;
        Ok(())
    }

    fn thermal_enable(&mut self, left: bool, right: bool) -> Result<(), ActuatorError> {
        self.driver.write_digital(channels::THERMAL_LEFT_ENABLE, left)?;
        self.driver.write_digital(channels::THERMAL_RIGHT_ENABLE, right)?;
        self.mirror.thermal.enabled = left || right;
        Ok(())
    }

    fn thermal_disable(&mut self) -> Result<(), ActuatorError> {
        self.thermal_enable(false, false)
    }

    fn set_thermal_power(&mut self, power: f64, mode: ThermalMode) -> Result<(), ActuatorError> {
        if !power.is_finite() {
            return Err(ActuatorError::OutOfRange { label: "thermal".into(), value: power });
        }
        let power = power.clamp(0.0, 1.0);
        // Cooling drives the right leg of the bridge, heating the left.
        let (left, right) = match mode {
            ThermalMode::Cool => (0.0, power),
            ThermalMode::Heat => (power, 0.0),
            ThermalMode::Off => (0.0, 0.0),
        };
        self.driver.write_duty(channels::THERMAL_LEFT_PWM, left)?;
        self.driver.write_duty(channels::THERMAL_RIGHT_PWM, right)?;
        if mode == ThermalMode::Off {
            self.thermal_disable()?;
            self.mirror.thermal.duty = 0.0;
        } else {
            self.mirror.thermal.duty = power;
        }
        self.mirror.thermal.mode = mode;
        Ok(())
    }

    fn set_color(&mut self, color: LightColor) -> Result<(), ActuatorError> {
        let pixels = std::iter::repeat(color.rgb()).take(PIXEL_COUNT).collect();
        let brightness = self.mirror.light.brightness;
        self.write_pixels(pixels, brightness)?;
        self.mirror.light.color = color;
        Ok(())
    }

    fn set_brightness(&mut self, brightness: f64) -> Result<(), ActuatorError> {
        if !brightness.is_finite() || !(0.0..=1.0).contains(&brightness) {
            return Err(ActuatorError::OutOfRange { label: "neopixel".into(), value: brightness });
        }
        let pixels = self.mirror.light.pixels.clone();
        self.write_pixels(pixels, brightness)
    }

    fn mirror(&self) -> ActuatorMirror {
        self.mirror.clone()
    }
}
