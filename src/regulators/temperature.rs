use super::{switch, CycleContext, PidController, Regulator};
use crate::actuators::{labels, ActuatorFacade, ThermalMode};
use crate::config::ControlConfig;
use crate::error::ActuatorError;
use crate::safety::SafetyVerdict;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureState {
    /// Signed drive after bias and clamping; positive heats.
    pub output: f64,
    pub bias: f64,
    pub integral: f64,
    pub stage_active: bool,
    pub safety_hold: bool,
    pub yielded_to_humidity: bool,
}

/// Drives the thermoelectric stage towards the temperature setpoint.
///
/// The PID works on the interior reading. A feed-forward bias proportional to
/// (setpoint - ambient) covers steady heat loss or gain through the walls.
/// Heating authority is lower than cooling authority, matching the module.
#[derive(Debug)]
pub struct TemperatureRegulator {
    pid: PidController,
    max_heat: f64,
    max_cool: f64,
    bias_gain: f64,
    bias_limit: f64,
    deadband: f64,
    /// Whether the bridge enables are currently asserted.
    bridge_enabled: bool,
    /// Hot-side fan and pump; `None` when unknown.
    aux_on: Option<bool>,
    state: TemperatureState,
}

impl TemperatureRegulator {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            pid: PidController::new(config.pid, -config.max_cool_output, config.max_heat_output),
            max_heat: config.max_heat_output,
            max_cool: config.max_cool_output,
            bias_gain: config.bias_gain,
            bias_limit: config.bias_limit,
            deadband: config.deadband,
            bridge_enabled: false,
            aux_on: None,
            state: TemperatureState::default(),
        }
    }

    fn set_aux(&mut self, actuators: &mut dyn ActuatorFacade, on: bool) -> Result<(), ActuatorError> {
        if self.aux_on == Some(on) {
            return Ok(());
        }
        switch(actuators, labels::PELTIER_FAN, on)?;
        switch(actuators, labels::WATER_PUMP, on)?;
        self.aux_on = Some(on);
        Ok(())
    }

    fn idle_stage(&mut self, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        if self.bridge_enabled || self.state.stage_active {
            actuators.set_thermal_power(0.0, ThermalMode::Off)?;
            actuators.thermal_disable()?;
            self.bridge_enabled = false;
            self.state.stage_active = false;
        }
        Ok(())
    }
}

impl Regulator for TemperatureRegulator {
    type State = TemperatureState;

    fn name(&self) -> &'static str {
        "temperature"
    }

    fn regulate(&mut self, ctx: &CycleContext<'_>, actuators: &mut dyn ActuatorFacade) -> Result<(), ActuatorError> {
        if ctx.claims.thermal {
            // The humidity regulator is condensing; whatever it leaves the
            // stage in is unknown to us once it lets go.
            if !self.state.yielded_to_humidity {
                debug!("thermal stage yielded to humidity reduction");
            }
            self.state.yielded_to_humidity = true;
            self.bridge_enabled = false;
            self.state.stage_active = true;
            self.aux_on = None;
            self.pid.hold();
            return Ok(());
        }
        self.state.yielded_to_humidity = false;

        if let SafetyVerdict::Tripped(_) = ctx.safety {
            // Forced off every cycle the trip persists; the PID is frozen.
            self.pid.hold();
            actuators.set_thermal_power(0.0, ThermalMode::Off)?;
            actuators.thermal_disable()?;
            self.bridge_enabled = false;
            self.state.stage_active = false;
            self.state.output = 0.0;
            self.state.safety_hold = true;
            return Ok(());
        }
        if self.state.safety_hold {
            info!("thermal stage released from safety hold");
            self.state.safety_hold = false;
        }

        let Some(interior) = ctx.readings.interior_temperature() else {
            debug!("no interior temperature yet; temperature regulation skipped");
            return Ok(());
        };

        self.pid.set_gains(ctx.gains);
        let setpoint = ctx.setpoints.temperature;
        let pid_output = self.pid.update(setpoint, interior, ctx.now);
        let bias = ctx
            .readings
            .ambient_temperature()
            .map(|ambient| (self.bias_gain * (setpoint - ambient)).clamp(-self.bias_limit, self.bias_limit))
            .unwrap_or(0.0);
        let output = (pid_output + bias).clamp(-self.max_cool, self.max_heat);

        self.state.output = output;
        self.state.bias = bias;
        self.state.integral = self.pid.integral();

        if output.abs() < self.deadband {
            self.idle_stage(actuators)?;
            self.set_aux(actuators, false)?;
            debug!(interior, setpoint, output, "temperature inside deadband");
            return Ok(());
        }

        if !self.bridge_enabled {
            actuators.thermal_enable(true, true)?;
            self.bridge_enabled = true;
        }
        let mode = if output > 0.0 { ThermalMode::Heat } else { ThermalMode::Cool };
        if let Err(e) = actuators.set_thermal_power(output.abs(), mode) {
            warn!(error = %e, "thermal power command failed");
            return Err(e);
        }
        self.state.stage_active = true;
        self.set_aux(actuators, true)?;
        debug!(interior, setpoint, output, bias, mode = mode.as_str(), "thermal stage driven");
        Ok(())
    }

    fn reset(&mut self) {
        self.pid.reset();
        self.bridge_enabled = false;
        self.aux_on = None;
        self.state = TemperatureState::default();
    }

    fn state(&self) -> TemperatureState {
        TemperatureState { integral: self.pid.integral(), ..self.state }
    }
}
