use std::fmt;

use tracing::{error, info};

use crate::controller::ServiceController;
use crate::error::Result;
use crate::metrics_consts::SHUTDOWNS;
use crate::types::ServiceState;

pub const DEFAULT_STOP_REASON: &str = "manual";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownStep {
    WriteState,
    WriteDescriptor,
    RemoveFromInstances,
}

impl ShutdownStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownStep::WriteState => "write_state",
            ShutdownStep::WriteDescriptor => "write_descriptor",
            ShutdownStep::RemoveFromInstances => "remove_from_instances",
        }
    }
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShutdownFailure {
    pub step: ShutdownStep,
    pub error: String,
}

/// Outcome of [`ServiceController::shutdown`]. Shutdown never fails outright; store
/// errors are collected here instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownReport {
    Clean,
    Partial { failures: Vec<ShutdownFailure> },
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownReport::Clean)
    }

    pub fn failures(&self) -> &[ShutdownFailure] {
        match self {
            ShutdownReport::Clean => &[],
            ShutdownReport::Partial { failures } => failures,
        }
    }
}

impl ServiceController {
    /// Mark the service and this instance as stopping and leave the instance set.
    ///
    /// Every step is attempted even if an earlier one failed. The descriptor is rewritten
    /// with the short shutdown TTL so registries drop it soon after the process exits.
    /// Repeating the call rewrites the same terminal state.
    pub async fn shutdown(&self, reason: Option<&str>) -> ShutdownReport {
        let reason = reason.unwrap_or(DEFAULT_STOP_REASON);
        let mut failures = Vec::new();

        if let Err(e) = self.write_state(ServiceState::Stopping).await {
            failures.push(self.step_failed(ShutdownStep::WriteState, e));
        }

        if let Err(e) = self.write_stopping_descriptor(reason).await {
            failures.push(self.step_failed(ShutdownStep::WriteDescriptor, e));
        }

        if let Err(e) = self
            .client
            .srem(
                self.keys.instances(&self.config.service_name),
                self.identity.instance_id.clone(),
            )
            .await
        {
            failures.push(self.step_failed(ShutdownStep::RemoveFromInstances, e.into()));
        }

        let clean = failures.is_empty();
        metrics::counter!(SHUTDOWNS, "clean" => clean.to_string()).increment(1);
        info!(
            service = %self.config.service_name,
            instance_id = %self.identity.instance_id,
            reason,
            failed_steps = failures.len(),
            "instance shutdown complete"
        );

        if clean {
            ShutdownReport::Clean
        } else {
            ShutdownReport::Partial { failures }
        }
    }

    async fn write_stopping_descriptor(&self, reason: &str) -> Result<()> {
        let stored = self.read_descriptor().await?;
        let instance =
            self.build_descriptor(stored, ServiceState::Stopping, Some(reason.to_string()));
        self.write_descriptor(&instance, self.config.shutdown_ttl_secs())
            .await
    }

    fn step_failed(&self, step: ShutdownStep, e: crate::error::Error) -> ShutdownFailure {
        error!(
            service = %self.config.service_name,
            instance_id = %self.identity.instance_id,
            step = %step,
            error = %e,
            "shutdown step failed"
        );
        ShutdownFailure {
            step,
            error: e.to_string(),
        }
    }
}
