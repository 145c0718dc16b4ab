//! Process lifecycle around a [`ServiceController`]: registration, background heartbeats,
//! termination handling and the final shutdown write.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::controller::ServiceController;
use crate::error::Result;
use crate::shutdown::ShutdownReport;

pub const REASON_SIGTERM: &str = "SIGTERM";
pub const REASON_SIGINT: &str = "SIGINT";
pub const REASON_TERMINATED: &str = "terminated";
pub const REASON_STOP_SIGNAL: &str = "stop-signal";
pub const REASON_COMPLETED: &str = "completed";

const DEFAULT_GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(10);

pub struct LifecycleBuilder {
    controller: Arc<ServiceController>,
    trap_signals: bool,
    heartbeat: bool,
    graceful_shutdown: Duration,
}

impl LifecycleBuilder {
    /// Install SIGINT/SIGTERM handlers (default: true).
    pub fn with_trap_signals(mut self, trap_signals: bool) -> Self {
        self.trap_signals = trap_signals;
        self
    }

    /// Run periodic heartbeats in the background (default: true).
    pub fn with_heartbeat(mut self, heartbeat: bool) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// How long work gets to return after a termination request before it is aborted.
    pub fn with_graceful_shutdown<D>(mut self, d: D) -> Self
    where
        D: TryInto<Duration>,
    {
        if let Ok(d) = d.try_into() {
            self.graceful_shutdown = d;
        }
        self
    }

    pub fn build(self) -> Lifecycle {
        Lifecycle {
            controller: self.controller,
            termination: CancellationToken::new(),
            trap_signals: self.trap_signals,
            heartbeat: self.heartbeat,
            graceful_shutdown: self.graceful_shutdown,
        }
    }
}

/// What [`Lifecycle::run`] ended with.
#[derive(Debug)]
pub struct LifecycleExit<T> {
    /// Output of the work future; `None` if it was aborted or panicked.
    pub output: Option<T>,
    /// Stop reason written to the descriptor.
    pub reason: String,
    pub report: ShutdownReport,
}

/// Explicit entry point for a process taking part in run-state coordination.
///
/// Nothing is hooked implicitly: termination handlers are installed for the duration of
/// [`Lifecycle::run`] only, and only when trapping is enabled.
pub struct Lifecycle {
    controller: Arc<ServiceController>,
    termination: CancellationToken,
    trap_signals: bool,
    heartbeat: bool,
    graceful_shutdown: Duration,
}

impl Lifecycle {
    pub fn builder(controller: Arc<ServiceController>) -> LifecycleBuilder {
        LifecycleBuilder {
            controller,
            trap_signals: true,
            heartbeat: true,
            graceful_shutdown: DEFAULT_GRACEFUL_SHUTDOWN,
        }
    }

    pub fn controller(&self) -> &Arc<ServiceController> {
        &self.controller
    }

    /// Cancelling this token is handled like an OS termination request.
    pub fn termination_token(&self) -> CancellationToken {
        self.termination.clone()
    }

    /// Register, run `work` until it returns or termination is requested, then shut down.
    ///
    /// `work` receives a token that is cancelled on termination; it should return soon
    /// after. Only registration failures are returned as errors.
    pub async fn run<F, Fut, T>(self, work: F) -> Result<LifecycleExit<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let controller = self.controller;
        controller.register().await?;

        let heartbeat_cancel = CancellationToken::new();
        let heartbeat_task = self
            .heartbeat
            .then(|| spawn_heartbeat(controller.clone(), heartbeat_cancel.clone()));

        let work_token = self.termination.child_token();
        let mut work_task = tokio::spawn(work(work_token.clone()));

        let trap_signals = self.trap_signals;
        let requested = tokio::select! {
            biased;

            joined = &mut work_task => Ok(joined),
            _ = self.termination.cancelled() => Err(REASON_TERMINATED),
            reason = wait_for_termination_signal(), if trap_signals => Err(reason),
        };

        let (reason, output) = match requested {
            Ok(joined) => {
                // work may finish on the child token before the termination branch is polled
                let reason = if self.termination.is_cancelled() {
                    REASON_TERMINATED
                } else if controller.stop_observed() {
                    REASON_STOP_SIGNAL
                } else {
                    REASON_COMPLETED
                };
                (reason, work_output(joined))
            }
            Err(reason) => {
                info!(
                    service = %controller.service_name(),
                    reason,
                    "termination requested, stopping work"
                );
                work_token.cancel();
                let grace = tokio::time::timeout(self.graceful_shutdown, &mut work_task);
                let output = match grace.await {
                    Ok(joined) => work_output(joined),
                    Err(_) => {
                        warn!(
                            service = %controller.service_name(),
                            grace = ?self.graceful_shutdown,
                            "work did not stop within the graceful window, aborting"
                        );
                        work_task.abort();
                        None
                    }
                };
                (reason, output)
            }
        };

        // the heartbeat must be gone before the terminal descriptor is written
        heartbeat_cancel.cancel();
        if let Some(task) = heartbeat_task {
            if let Err(e) = task.await {
                error!(error = %e, "heartbeat task failed");
            }
        }

        let report = controller.shutdown(Some(reason)).await;
        info!(
            service = %controller.service_name(),
            instance_id = %controller.instance_id(),
            reason,
            clean = report.is_clean(),
            "lifecycle finished"
        );

        Ok(LifecycleExit {
            output,
            reason: reason.to_string(),
            report,
        })
    }
}

fn work_output<T>(joined: std::result::Result<T, JoinError>) -> Option<T> {
    match joined {
        Ok(output) => Some(output),
        Err(e) => {
            error!(error = %e, "work task failed");
            None
        }
    }
}

fn spawn_heartbeat(controller: Arc<ServiceController>, cancel: CancellationToken) -> JoinHandle<()> {
    let interval = controller.config().heartbeat_interval;
    let span = tracing::info_span!(
        "heartbeat",
        service = %controller.service_name(),
        instance_id = %controller.instance_id()
    );

    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = controller.heartbeat(None).await {
                            warn!(error = %e, retryable = e.is_retryable(), "heartbeat failed");
                        }
                    }
                }
            }
        }
        .instrument(span),
    )
}

/// Resolves with the reason once SIGTERM or SIGINT arrives. If a handler cannot be
/// installed the failure is logged and that signal is never reported.
async fn wait_for_termination_signal() -> &'static str {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            None
        }
    };
    let sigterm = async {
        match sigterm.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    let sigint = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = sigterm => {
            info!("received SIGTERM");
            REASON_SIGTERM
        }
        _ = sigint => {
            info!("received SIGINT");
            REASON_SIGINT
        }
    }
}

#[cfg(test)]
mod tests {
    use common_redis::MockRedisClient;

    use crate::config::ControlConfig;
    use crate::types::InstanceIdentity;

    use super::*;

    const INSTANCES_KEY: &str = "controlService:control:service:api:instances";

    fn controller(mock: &MockRedisClient) -> Arc<ServiceController> {
        let config = ControlConfig::new("api").with_heartbeat_interval(Duration::from_millis(10));
        Arc::new(
            ServiceController::with_identity(
                Arc::new(mock.clone()),
                config,
                InstanceIdentity::new("host", 1, "host-1-abcdef"),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_completed_work_shuts_down_with_completed_reason() {
        let mock = MockRedisClient::new();
        let lifecycle = Lifecycle::builder(controller(&mock))
            .with_trap_signals(false)
            .with_heartbeat(false)
            .build();

        let exit = lifecycle.run(|_token| async { 42 }).await.unwrap();

        assert_eq!(exit.output, Some(42));
        assert_eq!(exit.reason, REASON_COMPLETED);
        assert!(exit.report.is_clean());
        assert!(mock.members(INSTANCES_KEY).is_empty());
    }

    #[tokio::test]
    async fn test_termination_token_cancels_work() {
        let mock = MockRedisClient::new();
        let lifecycle = Lifecycle::builder(controller(&mock))
            .with_trap_signals(false)
            .build();
        let termination = lifecycle.termination_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            termination.cancel();
        });
        let exit = lifecycle
            .run(|token| async move {
                token.cancelled().await;
                "drained"
            })
            .await
            .unwrap();

        assert_eq!(exit.output, Some("drained"));
        assert_eq!(exit.reason, REASON_TERMINATED);
        let heartbeats = mock
            .get_calls()
            .into_iter()
            .filter(|c| c.op == "setex")
            .count();
        // registration, at least one background beat, and the shutdown write
        assert!(heartbeats >= 3);
    }

    #[tokio::test]
    async fn test_work_ignoring_cancellation_is_aborted_after_grace() {
        let mock = MockRedisClient::new();
        let lifecycle = Lifecycle::builder(controller(&mock))
            .with_trap_signals(false)
            .with_heartbeat(false)
            .with_graceful_shutdown(Duration::from_millis(20))
            .build();
        lifecycle.termination_token().cancel();

        let exit = lifecycle
            .run(|_token| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await
            .unwrap();

        assert_eq!(exit.output, None);
        assert_eq!(exit.reason, REASON_TERMINATED);
        assert!(exit.report.is_clean());
    }
}
