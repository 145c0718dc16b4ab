use tracing::debug;

use crate::controller::{get_optional, ServiceController};
use crate::error::Result;
use crate::keys::ControlKeys;
use crate::types::ServiceState;
use common_redis::Client;

/// Service-wide state of `service`. Unset or unrecognised values read as `running`;
/// only store failures are errors.
pub(crate) async fn read_service_state(
    client: &(dyn Client + Send + Sync),
    keys: &ControlKeys,
    service: &str,
) -> Result<ServiceState> {
    let raw = get_optional(client, keys.state(service)).await?;
    let state = ServiceState::parse_or_running(raw.as_deref());
    if let Some(raw) = raw.as_deref() {
        if ServiceState::parse(raw).is_none() {
            debug!(service, raw, "unrecognized service state, treating as running");
        }
    }
    Ok(state)
}

impl ServiceController {
    pub async fn state(&self) -> Result<ServiceState> {
        read_service_state(self.client.as_ref(), &self.keys, &self.config.service_name).await
    }
}
