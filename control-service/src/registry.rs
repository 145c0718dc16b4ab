use chrono::Utc;
use tracing::{debug, info, warn};

use crate::controller::{get_optional, ServiceController};
use crate::error::Result;
use crate::metrics_consts::{HEARTBEATS, STALE_STATE_RECOVERIES};
use crate::types::{ControlSignal, ServiceInstance, ServiceState};

impl ServiceController {
    /// Announce this instance: add it to the service and instance sets, write its
    /// descriptor with the heartbeat TTL, and initialise the service state if unset.
    ///
    /// A `stopping` state found here is treated as left over from an earlier shutdown
    /// and reset to `running`, unless a `stop` signal is still pending. Without that,
    /// a restarted instance would see `stopping` and exit straight away, forever.
    ///
    /// Termination handling is not installed here; see [`Lifecycle`](crate::Lifecycle).
    pub async fn register(&self) -> Result<()> {
        let service = self.config.service_name.clone();
        let now = self.next_last_seen(None);

        let instance = ServiceInstance {
            service_name: service.clone(),
            app_type: self.config.app_type.clone(),
            instance_id: self.identity.instance_id.clone(),
            hostname: self.identity.hostname.clone(),
            pid: self.identity.pid,
            started_at: now,
            last_seen: now,
            status: ServiceState::Running,
            tags: self.config.tags.clone(),
            metadata: self.config.metadata.clone(),
            stop_reason: None,
        };

        self.client
            .sadd(self.keys.services(), service.clone())
            .await?;
        self.client
            .sadd(
                self.keys.instances(&service),
                self.identity.instance_id.clone(),
            )
            .await?;
        self.write_descriptor(&instance, self.config.heartbeat_ttl_secs())
            .await?;

        let raw_state = get_optional(self.client.as_ref(), self.keys.state(&service)).await?;
        match raw_state.as_deref() {
            None => self.write_state(ServiceState::Running).await?,
            Some(raw) if ServiceState::parse(raw) == Some(ServiceState::Stopping) => {
                self.recover_stale_stopping().await?
            }
            Some(_) => {}
        }

        info!(
            service = %service,
            instance_id = %self.identity.instance_id,
            hostname = %self.identity.hostname,
            pid = self.identity.pid,
            "registered instance"
        );
        Ok(())
    }

    async fn recover_stale_stopping(&self) -> Result<()> {
        let service = &self.config.service_name;
        let pending = get_optional(self.client.as_ref(), self.keys.signal(service))
            .await?
            .and_then(|raw| ControlSignal::parse(&raw));

        if pending == Some(ControlSignal::Stop) {
            info!(service = %service, "service is stopping and a stop signal is pending, keeping state");
            return Ok(());
        }

        self.write_state(ServiceState::Running).await?;
        metrics::counter!(STALE_STATE_RECOVERIES, "service" => service.clone()).increment(1);
        warn!(
            service = %service,
            instance_id = %self.identity.instance_id,
            "found stale stopping state with no pending stop signal, reset to running"
        );
        Ok(())
    }

    /// Refresh the descriptor and its TTL. Must run more often than the heartbeat TTL or
    /// observers consider the instance dead.
    ///
    /// Status is `status_override` when given, otherwise the current service-wide state.
    pub async fn heartbeat(&self, status_override: Option<ServiceState>) -> Result<()> {
        let stored = self.read_descriptor().await?;
        let status = match status_override {
            Some(status) => status,
            None => self.state().await?,
        };

        let instance = self.build_descriptor(stored, status, None);
        self.write_descriptor(&instance, self.config.heartbeat_ttl_secs())
            .await?;

        metrics::counter!(HEARTBEATS, "status" => status.as_str()).increment(1);
        debug!(
            service = %self.config.service_name,
            instance_id = %self.identity.instance_id,
            status = %status,
            lag_ms = (Utc::now() - instance.last_seen).num_milliseconds(),
            "heartbeat"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use common_redis::{Client, CustomRedisError, MockRedisClient};

    use crate::config::ControlConfig;
    use crate::error::Error;
    use crate::types::InstanceIdentity;

    use super::*;

    const STATE_KEY: &str = "controlService:control:state:billing";
    const SIGNAL_KEY: &str = "controlService:control:signal:billing";
    const INSTANCE_KEY: &str = "controlService:control:service:billing:instance:host-a-7-abc123";

    fn controller(mock: &MockRedisClient) -> ServiceController {
        let config = ControlConfig::new("billing")
            .with_app_type("consumer")
            .with_tags(["eu"])
            .with_metadata("shard", 3_i64);
        ServiceController::with_identity(
            Arc::new(mock.clone()),
            config,
            InstanceIdentity::new("host-a", 7, "host-a-7-abc123"),
        )
        .unwrap()
    }

    fn stored(mock: &MockRedisClient) -> ServiceInstance {
        serde_json::from_str(&mock.string_value(INSTANCE_KEY).expect("descriptor")).unwrap()
    }

    #[tokio::test]
    async fn test_register_initialises_everything() {
        let mock = MockRedisClient::new();

        controller(&mock).register().await.unwrap();

        assert_eq!(mock.members("controlService:control:services"), vec!["billing"]);
        assert_eq!(
            mock.members("controlService:control:service:billing:instances"),
            vec!["host-a-7-abc123"]
        );
        assert_eq!(mock.string_value(STATE_KEY).as_deref(), Some("running"));
        assert_eq!(mock.ttl(INSTANCE_KEY), Some(30));

        let instance = stored(&mock);
        assert_eq!(instance.status, ServiceState::Running);
        assert_eq!(instance.app_type, "consumer");
        assert_eq!(instance.tags, vec!["eu"]);
        assert_eq!(instance.started_at, instance.last_seen);
        assert_eq!(instance.stop_reason, None);
    }

    #[tokio::test]
    async fn test_register_keeps_existing_paused_state() {
        let mock = MockRedisClient::new().with_string(STATE_KEY, "paused");

        controller(&mock).register().await.unwrap();

        assert_eq!(mock.string_value(STATE_KEY).as_deref(), Some("paused"));
    }

    #[tokio::test]
    async fn test_register_recovers_stale_stopping_state() {
        let mock = MockRedisClient::new().with_string(STATE_KEY, "stopping");

        controller(&mock).register().await.unwrap();

        assert_eq!(mock.string_value(STATE_KEY).as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_register_respects_pending_stop_signal() {
        let mock = MockRedisClient::new()
            .with_string(STATE_KEY, "stopping")
            .with_string(SIGNAL_KEY, "STOP");

        controller(&mock).register().await.unwrap();

        assert_eq!(mock.string_value(STATE_KEY).as_deref(), Some("stopping"));
        // registration never consumes the signal
        assert_eq!(mock.string_value(SIGNAL_KEY).as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn test_register_recovers_when_pending_signal_is_not_stop() {
        let mock = MockRedisClient::new()
            .with_string(STATE_KEY, "stopping")
            .with_string(SIGNAL_KEY, "pause");

        controller(&mock).register().await.unwrap();

        assert_eq!(mock.string_value(STATE_KEY).as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_register_propagates_store_failure() {
        let mock = MockRedisClient::new().with_error(
            "sadd",
            "controlService:control:services",
            CustomRedisError::Timeout,
        );

        let result = controller(&mock).register().await;

        assert!(matches!(
            result,
            Err(Error::Store(CustomRedisError::Timeout))
        ));
        assert!(!mock.exists(INSTANCE_KEY));
    }

    #[tokio::test]
    async fn test_heartbeat_preserves_start_and_follows_service_state() {
        let mock = MockRedisClient::new();
        let controller = controller(&mock);
        controller.register().await.unwrap();
        let registered = stored(&mock);

        mock.set(STATE_KEY.to_string(), "paused".to_string())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        controller.heartbeat(None).await.unwrap();

        let refreshed = stored(&mock);
        assert_eq!(refreshed.started_at, registered.started_at);
        assert!(refreshed.last_seen > registered.last_seen);
        assert_eq!(refreshed.status, ServiceState::Paused);
        assert_eq!(mock.ttl(INSTANCE_KEY), Some(30));
    }

    #[tokio::test]
    async fn test_heartbeat_status_override_wins() {
        let mock = MockRedisClient::new();
        let controller = controller(&mock);
        controller.register().await.unwrap();

        controller
            .heartbeat(Some(ServiceState::Paused))
            .await
            .unwrap();

        assert_eq!(stored(&mock).status, ServiceState::Paused);
        assert_eq!(mock.string_value(STATE_KEY).as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn test_heartbeat_overwrites_corrupt_descriptor() {
        let mock = MockRedisClient::new().with_string(INSTANCE_KEY, "{{ definitely not json");
        let controller = controller(&mock);

        controller.heartbeat(None).await.unwrap();

        let instance = stored(&mock);
        assert_eq!(instance.instance_id, "host-a-7-abc123");
        assert_eq!(instance.pid, 7);
        assert_eq!(instance.status, ServiceState::Running);
        assert_eq!(instance.tags, vec!["eu"]);
        assert_eq!(instance.started_at, instance.last_seen);
    }

    #[tokio::test]
    async fn test_heartbeat_recreates_expired_descriptor() {
        let mock = MockRedisClient::new();
        let controller = controller(&mock);
        controller.register().await.unwrap();

        mock.expire(INSTANCE_KEY);
        controller.heartbeat(None).await.unwrap();

        assert!(mock.exists(INSTANCE_KEY));
        assert_eq!(mock.ttl(INSTANCE_KEY), Some(30));
    }

    #[tokio::test]
    async fn test_heartbeat_propagates_store_failure() {
        let mock = MockRedisClient::new().with_error(
            "setex",
            INSTANCE_KEY,
            CustomRedisError::from_redis_kind(common_redis::RedisErrorKind::IoError, "broken pipe"),
        );

        let result = controller(&mock).heartbeat(None).await;

        match result {
            Err(e) => assert!(e.is_retryable()),
            Ok(()) => panic!("heartbeat should fail when the descriptor write fails"),
        }
    }
}
