use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::controller::ServiceController;
use crate::error::Result;
use crate::types::{ControlSignal, ServiceState};

/// How [`ServiceController::wait_if_paused`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The service was not paused; nothing was waited for.
    Running,
    /// The service was paused and has been resumed.
    Resumed,
    /// A stop was observed; the caller should wind down.
    Stopping,
    /// The token was cancelled while paused.
    Cancelled,
}

impl WaitOutcome {
    pub fn should_continue(&self) -> bool {
        matches!(self, WaitOutcome::Running | WaitOutcome::Resumed)
    }
}

impl ServiceController {
    /// Block while the service is paused.
    ///
    /// Applies any pending signal, then returns straight away unless the service is
    /// paused. While paused, each poll sends a `paused` heartbeat, applies pending
    /// signals and re-reads the state, sleeping `poll_interval` between polls. There is
    /// no timeout; the wait ends on resume, on stop, or when `cancel` fires. Store
    /// failures, heartbeat writes included, are returned to the caller.
    pub async fn wait_if_paused(&self, cancel: &CancellationToken) -> Result<WaitOutcome> {
        let signal = self.apply_signal().await?;
        match self.observe(signal).await? {
            ServiceState::Running => return Ok(WaitOutcome::Running),
            ServiceState::Stopping => return Ok(WaitOutcome::Stopping),
            ServiceState::Paused => {}
        }

        info!(
            service = %self.config.service_name,
            instance_id = %self.identity.instance_id,
            "service paused, waiting for resume"
        );

        loop {
            // a failed beat ends the wait; the descriptor would otherwise expire unnoticed
            self.heartbeat(Some(ServiceState::Paused)).await?;

            let signal = self.apply_signal().await?;
            match self.observe(signal).await? {
                ServiceState::Running => {
                    info!(service = %self.config.service_name, "service resumed");
                    return Ok(WaitOutcome::Resumed);
                }
                ServiceState::Stopping => return Ok(WaitOutcome::Stopping),
                ServiceState::Paused => {}
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Non-blocking stop check for use inside a work loop.
    pub async fn should_stop(&self) -> Result<bool> {
        let signal = self.apply_signal().await?;
        Ok(self.observe(signal).await? == ServiceState::Stopping)
    }

    /// Current state, with a just-applied `stop` taking precedence over whatever another
    /// writer may have stored since.
    async fn observe(&self, applied: Option<ControlSignal>) -> Result<ServiceState> {
        if applied == Some(ControlSignal::Stop) {
            return Ok(ServiceState::Stopping);
        }
        let state = self.state().await?;
        if state == ServiceState::Stopping {
            self.mark_stop_observed();
        }
        Ok(state)
    }
}
