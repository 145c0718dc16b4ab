use tracing::warn;

use crate::controller::{get_optional, ServiceController};
use crate::error::Result;
use crate::metrics_consts::{SIGNALS_APPLIED, SIGNALS_DISCARDED};
use crate::types::ControlSignal;

impl ServiceController {
    /// Consume the pending signal for this service, if any, and move the service-wide
    /// state accordingly. Returns the applied signal.
    ///
    /// Read and delete are separate commands. Several instances polling at the same time
    /// can all read the same signal before the first delete lands, so more than one of
    /// them may apply it. Every one of them writes the same target state.
    ///
    /// Unrecognised values are deleted so they are not reprocessed on every poll.
    pub async fn apply_signal(&self) -> Result<Option<ControlSignal>> {
        let service = &self.config.service_name;
        let key = self.keys.signal(service);

        let Some(raw) = get_optional(self.client.as_ref(), key.clone()).await? else {
            return Ok(None);
        };

        let Some(signal) = ControlSignal::parse(&raw) else {
            self.client.del(key).await?;
            metrics::counter!(SIGNALS_DISCARDED, "service" => service.clone()).increment(1);
            warn!(service = %service, raw = %raw, "discarded unrecognized control signal");
            return Ok(None);
        };

        let state = signal.target_state();
        self.write_state(state).await?;
        self.client.del(key).await?;

        if signal == ControlSignal::Stop {
            self.mark_stop_observed();
        }

        metrics::counter!(SIGNALS_APPLIED, "signal" => signal.as_str()).increment(1);
        warn!(
            service = %service,
            instance_id = %self.identity.instance_id,
            signal = %signal,
            state = %state,
            "applied control signal"
        );
        Ok(Some(signal))
    }
}
