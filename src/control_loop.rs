//! Background execution of the control loop on the tokio runtime.

use crate::controller::ClimateController;
use crate::error::{ControlError, ControlResult};
use crate::state::SystemState;
use chrono::Local;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

impl ClimateController {
    /// Spawns the loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> ControlResult<()> {
        let runtime = Handle::try_current().map_err(|_| ControlError::NoRuntime)?;
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ControlError::AlreadyRunning);
        }
        let controller = Arc::clone(self);
        let handle = runtime.spawn(async move { controller.run_loop().await });
        *self.task.lock() = Some(handle);
        info!(
            poll_ms = self.config.poll_interval_ms,
            sensor_ms = self.config.sensor_interval_ms,
            control_ms = self.config.control_interval_ms,
            "control loop started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the loop, waiting at most the configured stop timeout for it to
    /// finish, then drops to standby with every output off. The shutdown
    /// happens even if the loop did not finish in time.
    pub async fn stop(&self) -> ControlResult<()> {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        let handle = self.task.lock().take();

        if let Some(mut handle) = handle {
            match time::timeout(self.config.stop_timeout(), &mut handle).await {
                Ok(Ok(())) => info!("control loop stopped"),
                Ok(Err(e)) => warn!(error = %e, "control loop ended abnormally"),
                Err(_) => {
                    warn!(timeout_ms = self.config.stop_timeout_ms, "control loop did not stop in time; aborting");
                    handle.abort();
                }
            }
        }

        self.shared.set_system_state(SystemState::Standby);
        self.shutdown_outputs();

        if was_running {
            Ok(())
        } else {
            Err(ControlError::NotRunning)
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_running() {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }

            let controller = Arc::clone(&self);
            let now = Instant::now();
            let time_of_day = Local::now().time();
            // Sensor and actuator calls block; keep them off the async workers.
            let outcome = tokio::task::spawn_blocking(move || controller.run_iteration(now, time_of_day)).await;

            match outcome {
                Ok(report) if report.faulted => time::sleep(self.config.fault_backoff()).await,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "control iteration aborted");
                    self.shared.record_error(format!("Control loop error: {e}"));
                    time::sleep(self.config.fault_backoff()).await;
                }
            }
        }
    }
}
