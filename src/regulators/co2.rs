use super::{Applied, CycleContext, Regulator, VentCommand};
use crate::actuators::ActuatorFacade;
use crate::config::ControlConfig;
use crate::error::ActuatorError;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Co2Mode {
    Monitoring,
    /// Armed when the reading rose above the configured maximum; holds until
    /// it falls below the reduction target, or below the maximum when that is
    /// the lower of the two.
    Reducing { since: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Co2State {
    pub reducing: bool,
    pub deferred: bool,
    pub vent: Option<VentCommand>,
}

/// Hysteresis venting for CO2.
///
/// Arms above the configured maximum, vents in proportion to the excess over
/// a lower fixed target and disarms only once the reading drops below that
/// target. Stays off the vents while humidity reduction owns them.
#[derive(Debug)]
pub struct Co2Regulator {
    target: f64,
    scale: f64,
    min_opening: f64,
    min_fan: f64,
    mode: Co2Mode,
    deferred: bool,
    vents: Applied<VentCommand>,
}

impl Co2Regulator {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            target: config.co2_target_ppm,
            scale: config.co2_vent_scale_ppm,
            min_opening: config.vent_min_opening,
            min_fan: config.vent_min_fan_speed,
            mode: Co2Mode::Monitoring,
            deferred: false,
            vents: Applied::default(),
        }
    }

    pub fn is_reducing(&self) -> bool {
        matches!(self.mode, Co2Mode::Reducing { .. })
    }

    /// Vent command for `ppm` while armed.
    pub fn vent_for(&self, ppm: f64) -> VentCommand {
        let ratio = ((ppm - self.target) / self.scale).clamp(self.min_opening, 1.0);
        VentCommand::open(ratio, self.min_fan)
    }
}

impl Regulator for Co2Regulator {
    type State = Co2State;

    fn name(&self) -> &'static str {
        "co2"
    }

    fn regulate(&mut self, ctx: &CycleContext<'_>, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        let Some(ppm) = ctx.readings.co2 else {
            return Ok(());
        };

        match self.mode {
            Co2Mode::Monitoring if ppm > ctx.setpoints.co2_max => {
                info!(ppm, max = ctx.setpoints.co2_max, "CO2 above maximum; reduction armed");
                self.mode = Co2Mode::Reducing { since: ctx.now };
            }
            Co2Mode::Reducing { since } if ppm < self.target.min(ctx.setpoints.co2_max) => {
                info!(
                    ppm,
                    target = self.target.min(ctx.setpoints.co2_max),
                    duration_s = ctx.now.saturating_duration_since(since).as_secs(),
                    "CO2 back under target; reduction disarmed"
                );
                self.mode = Co2Mode::Monitoring;
            }
            _ => {}
        }

        if ctx.claims.ventilation {
            if !self.deferred {
                debug!("humidity reduction owns the vents; CO2 venting deferred");
            }
            self.deferred = true;
            // Whatever the vents show afterwards was not set by us.
            self.vents.invalidate();
            return Ok(());
        }
        self.deferred = false;

        match self.mode {
            Co2Mode::Reducing { .. } => {
                let cmd = self.vent_for(ppm);
                self.vents.set(cmd, |c| c.apply(actuators))
            }
            Co2Mode::Monitoring => {
                if self.vents.get().is_some_and(|c| !c.is_closed()) {
                    self.vents.set(VentCommand::closed(), |c| c.apply(actuators))?;
                }
                Ok(())
            }
        }
    }

    fn reset(&mut self) {
        self.mode = Co2Mode::Monitoring;
        self.deferred = false;
        self.vents.invalidate();
    }

    fn state(&self) -> Co2State {
        Co2State { reducing: self.is_reducing(), deferred: self.deferred, vent: self.vents.get() }
    }
}
