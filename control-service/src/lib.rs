//! Run-state coordination for horizontally scaled service instances over a shared redis.
//!
//! Instances register a TTL'd descriptor, poll a per-service signal key, and share one
//! service-wide state (`running`, `paused` or `stopping`). Operators steer a service by
//! writing signals with [`ServiceOperator`].

pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod metrics_consts;
pub mod operator;
mod registry;
pub mod shutdown;
mod signals;
mod state;
pub mod types;

pub use config::{Config, ControlConfig};
pub use control::WaitOutcome;
pub use controller::{ServiceController, SharedClient};
pub use error::{Error, Result};
pub use keys::{validate_service_name, ControlKeys};
pub use lifecycle::{Lifecycle, LifecycleBuilder, LifecycleExit};
pub use operator::{InstanceView, ServiceOperator};
pub use shutdown::{ShutdownFailure, ShutdownReport, ShutdownStep};
pub use types::{ControlSignal, InstanceIdentity, MetadataValue, ServiceInstance, ServiceState};
