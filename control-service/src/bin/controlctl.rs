use std::sync::Arc;

use clap::{Parser, Subcommand};
use common_redis::RedisClient;
use control_service::{keys::DEFAULT_PREFIX, ControlKeys, ControlSignal, ServiceOperator};
use eyre::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(version, about = "Inspect and steer services coordinated through redis", long_about = None)]
struct Cli {
    /// Redis to connect to
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379/")]
    redis_url: String,

    /// Key prefix shared with the instances
    #[arg(long, env = "CONTROL_PREFIX", default_value = DEFAULT_PREFIX)]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a signal; the next instance of the service to poll applies it
    Signal {
        service: String,
        /// pause, resume or stop
        signal: ControlSignal,
    },

    /// Print the service-wide state
    State { service: String },

    /// List every service that has ever registered
    Services,

    /// List the instances of a service with their descriptors
    Instances {
        service: String,

        /// Print descriptors as JSON lines
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Remove instances whose descriptor has expired from the instance set
    Sweep { service: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();

    let cli = Cli::parse();
    let client = RedisClient::new(cli.redis_url.clone())
        .await
        .wrap_err_with(|| format!("failed to connect to {}", cli.redis_url))?;
    let operator = ServiceOperator::new(Arc::new(client), ControlKeys::new(cli.prefix));

    match cli.command {
        Commands::Signal { service, signal } => {
            operator.send_signal(&service, signal).await?;
            println!("queued {signal} for {service}");
        }
        Commands::State { service } => {
            println!("{}", operator.service_state(&service).await?);
        }
        Commands::Services => {
            for service in operator.list_services().await? {
                println!("{service}");
            }
        }
        Commands::Instances { service, json } => {
            for view in operator.list_instances(&service).await? {
                match (&view.descriptor, json) {
                    (Some(descriptor), true) => println!("{}", serde_json::to_string(descriptor)?),
                    (Some(d), false) => println!(
                        "{}\t{}\t{}\tpid={}\tlast_seen={}",
                        view.instance_id,
                        d.status,
                        d.hostname,
                        d.pid,
                        d.last_seen.to_rfc3339()
                    ),
                    (None, _) if view.alive => {
                        println!("{}\tunreadable descriptor", view.instance_id)
                    }
                    (None, _) => println!("{}\texpired", view.instance_id),
                }
            }
        }
        Commands::Sweep { service } => {
            let removed = operator.sweep_stale_instances(&service).await?;
            for id in &removed {
                println!("removed {id}");
            }
            println!("{} stale instance(s) removed", removed.len());
        }
    }

    Ok(())
}
