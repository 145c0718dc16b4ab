pub const SIGNALS_APPLIED: &str = "control_signals_applied_total";
pub const SIGNALS_DISCARDED: &str = "control_signals_discarded_total";
pub const HEARTBEATS: &str = "control_heartbeats_total";
pub const STALE_STATE_RECOVERIES: &str = "control_stale_state_recoveries_total";
pub const SHUTDOWNS: &str = "control_shutdowns_total";
pub const STALE_INSTANCES_SWEPT: &str = "control_stale_instances_swept_total";
