#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use common_redis::MockRedisClient;
use control_service::{
    ControlConfig, ControlKeys, InstanceIdentity, ServiceController, ServiceInstance,
    ServiceOperator,
};

pub const SERVICE: &str = "ingest";

pub fn keys() -> ControlKeys {
    ControlKeys::default()
}

pub fn config() -> ControlConfig {
    ControlConfig::new(SERVICE)
        .with_app_type("consumer")
        .with_poll_interval(Duration::from_millis(10))
        .with_heartbeat_interval(Duration::from_millis(10))
}

pub fn instance(mock: &MockRedisClient, id: &str) -> Arc<ServiceController> {
    Arc::new(
        ServiceController::with_identity(
            Arc::new(mock.clone()),
            config(),
            InstanceIdentity::new("test-host", 4242, id),
        )
        .unwrap(),
    )
}

pub fn operator(mock: &MockRedisClient) -> ServiceOperator {
    ServiceOperator::new(Arc::new(mock.clone()), keys())
}

pub fn descriptor(mock: &MockRedisClient, id: &str) -> Option<ServiceInstance> {
    mock.string_value(&keys().instance(SERVICE, id))
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
