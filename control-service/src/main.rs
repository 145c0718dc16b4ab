use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common_redis::RedisClient;
use control_service::{Config, Lifecycle, ServiceController, WaitOutcome};
use envconfig::Envconfig;
use eyre::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

/// Demo work: one tick per interval, pausing and stopping as the service state says.
async fn work_loop(
    controller: Arc<ServiceController>,
    token: CancellationToken,
    interval: Duration,
) -> u64 {
    let mut ticks = 0;
    loop {
        match controller.wait_if_paused(&token).await {
            Ok(WaitOutcome::Stopping) | Ok(WaitOutcome::Cancelled) => break,
            Ok(WaitOutcome::Resumed) => info!("resuming work"),
            Ok(WaitOutcome::Running) => {}
            Err(e) => warn!(error = %e, "failed to poll control state"),
        }

        ticks += 1;
        debug!(ticks, "tick");

        match controller.should_stop().await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to poll control state"),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    ticks
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().wrap_err("failed to load configuration")?;
    let control = config.control_config()?;

    if let Some(bind) = &config.metrics_bind {
        let addr: SocketAddr = bind.parse().wrap_err("invalid METRICS_BIND")?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Metrics server listening on {}", addr);
    }

    let (response_timeout, connection_timeout) = config.redis_timeouts();
    let client = RedisClient::with_config(
        config.redis_url.clone(),
        response_timeout,
        connection_timeout,
    )
    .await
    .wrap_err("failed to connect to redis")?;

    let controller = Arc::new(ServiceController::new(Arc::new(client), control)?);
    info!(
        service = %controller.service_name(),
        instance_id = %controller.instance_id(),
        "instance starting"
    );

    let work_interval = config.work_interval();
    let work_controller = controller.clone();
    let exit = Lifecycle::builder(controller)
        .with_graceful_shutdown(config.graceful_shutdown())
        .build()
        .run(move |token| work_loop(work_controller, token, work_interval))
        .await?;

    for failure in exit.report.failures() {
        error!(step = %failure.step, error = %failure.error, "shutdown step failed");
    }
    info!(
        reason = %exit.reason,
        ticks = exit.output.unwrap_or_default(),
        clean = exit.report.is_clean(),
        "Shutting down"
    );

    Ok(())
}
