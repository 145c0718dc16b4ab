use common_redis::Client;
use tracing::{info, warn};

use crate::controller::{get_optional, SharedClient};
use crate::error::Result;
use crate::keys::{validate_service_name, ControlKeys};
use crate::metrics_consts::STALE_INSTANCES_SWEPT;
use crate::state::read_service_state;
use crate::types::{ControlSignal, ServiceInstance, ServiceState};

/// One member of a service's instance set.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceView {
    pub instance_id: String,
    /// The descriptor key still exists. Once its TTL runs out the instance is dead.
    pub alive: bool,
    /// Parsed descriptor; `None` when the key is gone or holds something unreadable.
    pub descriptor: Option<ServiceInstance>,
}

/// Operator side of the control plane: send signals and inspect any service without
/// being one of its instances.
#[derive(Clone)]
pub struct ServiceOperator {
    client: SharedClient,
    keys: ControlKeys,
}

impl ServiceOperator {
    pub fn new(client: SharedClient, keys: ControlKeys) -> Self {
        Self { client, keys }
    }

    fn client(&self) -> &(dyn Client + Send + Sync) {
        self.client.as_ref()
    }

    /// Queue `signal` for `service`; whichever instance polls next applies it.
    pub async fn send_signal(&self, service: &str, signal: ControlSignal) -> Result<()> {
        validate_service_name(service)?;
        self.client
            .set(self.keys.signal(service), signal.as_str().to_string())
            .await?;
        info!(service, signal = %signal, "sent control signal");
        Ok(())
    }

    pub async fn service_state(&self, service: &str) -> Result<ServiceState> {
        validate_service_name(service)?;
        read_service_state(self.client(), &self.keys, service).await
    }

    pub async fn list_services(&self) -> Result<Vec<String>> {
        let mut services = self.client.smembers(self.keys.services()).await?;
        services.sort();
        Ok(services)
    }

    pub async fn list_instances(&self, service: &str) -> Result<Vec<InstanceView>> {
        validate_service_name(service)?;
        let mut ids = self.client.smembers(self.keys.instances(service)).await?;
        ids.sort();

        let mut views = Vec::with_capacity(ids.len());
        for instance_id in ids {
            let key = self.keys.instance(service, &instance_id);
            let raw = get_optional(self.client(), key).await?;
            let parsed = raw
                .as_deref()
                .map(serde_json::from_str::<ServiceInstance>)
                .transpose();
            let descriptor = match parsed {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!(
                        service,
                        instance_id = %instance_id,
                        error = %e,
                        "unreadable instance descriptor"
                    );
                    None
                }
            };
            views.push(InstanceView {
                instance_id,
                alive: raw.is_some(),
                descriptor,
            });
        }
        Ok(views)
    }

    /// Drop ids from the instance set whose descriptor has expired. Returns the removed
    /// ids. Instances that crashed without shutting down otherwise stay listed forever.
    pub async fn sweep_stale_instances(&self, service: &str) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for view in self.list_instances(service).await? {
            if view.alive {
                continue;
            }
            self.client
                .srem(self.keys.instances(service), view.instance_id.clone())
                .await?;
            removed.push(view.instance_id);
        }

        if !removed.is_empty() {
            metrics::counter!(STALE_INSTANCES_SWEPT).increment(removed.len() as u64);
            info!(service, count = removed.len(), "swept stale instances");
        }
        Ok(removed)
    }
}
