//! PID controller with a clamped integral term and derivative on measurement.
//!
//! Output = Kp * e + Σ Ki * e * dt - Kd * d(input)/dt
//!
//! The integral accumulator is clamped to the output range, so a long
//! saturation does not wind it up past what the output can express.

use crate::config::PidGains;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    output_min: f64,
    output_max: f64,
    integral: f64,
    last_input: Option<f64>,
    last_time: Option<Instant>,
}

impl PidController {
    pub fn new(gains: PidGains, output_min: f64, output_max: f64) -> Self {
        Self {
            gains,
            output_min,
            output_max,
            integral: 0.0,
            last_input: None,
            last_time: None,
        }
    }

    /// New gains apply from the next update; accumulated state is kept.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_input = None;
        self.last_time = None;
    }

    /// Keeps the integral but forgets timing, so the time spent not updating
    /// is not integrated on the next call.
    pub fn hold(&mut self) {
        self.last_input = None;
        self.last_time = None;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Computes the control output for `input` at `now`. The first call after
    /// construction or `reset` sees dt = 0 and contributes no integral or
    /// derivative action.
    pub fn update(&mut self, setpoint: f64, input: f64, now: Instant) -> f64 {
        let dt = self
            .last_time
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        let error = setpoint - input;

        let proportional = self.gains.kp * error;

        self.integral += self.gains.ki * error * dt;
        self.integral = self.integral.clamp(self.output_min, self.output_max);

        let derivative = match self.last_input {
            Some(prev) if dt > 0.0 => -self.gains.kd * (input - prev) / dt,
            _ => 0.0,
        };

        self.last_input = Some(input);
        self.last_time = Some(now);

        (proportional + self.integral + derivative).clamp(self.output_min, self.output_max)
    }
}
