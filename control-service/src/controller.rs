use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use common_redis::{Client, CustomRedisError};

use crate::config::ControlConfig;
use crate::error::Result;
use crate::keys::{validate_service_name, ControlKeys};
use crate::types::{InstanceIdentity, ServiceInstance, ServiceState, StoredDescriptor};

pub type SharedClient = Arc<dyn Client + Send + Sync>;

/// Read a key, mapping a missing key to `None`. Every other store failure propagates.
pub(crate) async fn get_optional(
    client: &(dyn Client + Send + Sync),
    key: String,
) -> Result<Option<String>> {
    match client.get(key).await {
        Ok(value) => Ok(Some(value)),
        Err(CustomRedisError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// One process's view of the control plane for its service.
///
/// Every operation is a plain sequence of store calls without locks or transactions.
/// The instance descriptor is only ever written by its own instance; the service-wide
/// state and signal keys are last-writer-wins across instances and operators.
pub struct ServiceController {
    pub(crate) client: SharedClient,
    pub(crate) keys: ControlKeys,
    pub(crate) config: ControlConfig,
    pub(crate) identity: InstanceIdentity,
    last_seen: Mutex<Option<DateTime<Utc>>>,
    stop_observed: AtomicBool,
}

impl ServiceController {
    /// Controller for the current process, with a generated instance id.
    pub fn new(client: SharedClient, config: ControlConfig) -> Result<Self> {
        Self::with_identity(client, config, InstanceIdentity::detect())
    }

    pub fn with_identity(
        client: SharedClient,
        config: ControlConfig,
        identity: InstanceIdentity,
    ) -> Result<Self> {
        validate_service_name(&config.service_name)?;
        config.validate()?;
        Ok(Self {
            client,
            keys: ControlKeys::new(config.prefix.clone()),
            config,
            identity,
            last_seen: Mutex::new(None),
            stop_observed: AtomicBool::new(false),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn instance_id(&self) -> &str {
        &self.identity.instance_id
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn keys(&self) -> &ControlKeys {
        &self.keys
    }

    /// True once this controller has seen a stop, either as a consumed signal or as a
    /// `stopping` service state.
    pub fn stop_observed(&self) -> bool {
        self.stop_observed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_stop_observed(&self) {
        self.stop_observed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn instance_key(&self) -> String {
        self.keys
            .instance(&self.config.service_name, &self.identity.instance_id)
    }

    /// Last-seen never moves backwards while the process lives, even if the wall clock does.
    pub(crate) fn next_last_seen(&self, stored: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let mut last = match self.last_seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = [Some(Utc::now()), stored, *last]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or_else(Utc::now);
        *last = Some(next);
        next
    }

    pub(crate) async fn read_descriptor(&self) -> Result<StoredDescriptor> {
        let raw = get_optional(self.client.as_ref(), self.instance_key()).await?;
        Ok(StoredDescriptor::parse_lenient(raw.as_deref()))
    }

    /// Merge fresh identity fields over whatever was stored. Stored tags and metadata win;
    /// configuration only fills them in when the stored blob had none.
    pub(crate) fn build_descriptor(
        &self,
        stored: StoredDescriptor,
        status: ServiceState,
        stop_reason: Option<String>,
    ) -> ServiceInstance {
        let last_seen = self.next_last_seen(stored.last_seen);
        ServiceInstance {
            service_name: self.config.service_name.clone(),
            app_type: self.config.app_type.clone(),
            instance_id: self.identity.instance_id.clone(),
            hostname: self.identity.hostname.clone(),
            pid: self.identity.pid,
            started_at: stored.started_at.unwrap_or(last_seen),
            last_seen,
            status,
            tags: stored.tags.unwrap_or_else(|| self.config.tags.clone()),
            metadata: stored
                .metadata
                .unwrap_or_else(|| self.config.metadata.clone()),
            stop_reason: stop_reason.or(stored.stop_reason),
        }
    }

    pub(crate) async fn write_descriptor(
        &self,
        instance: &ServiceInstance,
        ttl_seconds: u64,
    ) -> Result<()> {
        let payload = serde_json::to_string(instance)?;
        self.client
            .setex(self.instance_key(), payload, ttl_seconds)
            .await?;
        Ok(())
    }

    pub(crate) async fn write_state(&self, state: ServiceState) -> Result<()> {
        self.client
            .set(
                self.keys.state(&self.config.service_name),
                state.as_str().to_string(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use common_redis::MockRedisClient;

    #[test]
    fn test_rejects_invalid_service_name() {
        let client: SharedClient = Arc::new(MockRedisClient::new());

        let result = ServiceController::new(client, ControlConfig::new("billing:eu"));

        assert!(matches!(result, Err(Error::InvalidServiceName(_))));
    }

    #[test]
    fn test_rejects_heartbeat_slower_than_ttl() {
        let client: SharedClient = Arc::new(MockRedisClient::new());
        let config = ControlConfig::new("api")
            .with_heartbeat_ttl(std::time::Duration::from_secs(10))
            .with_heartbeat_interval(std::time::Duration::from_secs(10));

        let result = ServiceController::new(client, config);

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_last_seen_is_monotonic() {
        let client: SharedClient = Arc::new(MockRedisClient::new());
        let controller = ServiceController::new(client, ControlConfig::new("api")).unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        let first = controller.next_last_seen(Some(future));
        let second = controller.next_last_seen(None);

        assert_eq!(first, future);
        assert!(second >= first);
    }

    #[test]
    fn test_detected_identity_embeds_pid() {
        let client: SharedClient = Arc::new(MockRedisClient::new());
        let controller = ServiceController::new(client, ControlConfig::new("api")).unwrap();

        assert_eq!(controller.identity().pid, std::process::id());
        assert!(controller
            .instance_id()
            .contains(&format!("-{}-", std::process::id())));
    }
}
