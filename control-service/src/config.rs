use std::collections::BTreeMap;
use std::time::Duration;

use envconfig::Envconfig;

use crate::error::{Error, Result};
use crate::keys::{validate_service_name, DEFAULT_PREFIX};
use crate::types::MetadataValue;

pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10_000);

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "1000")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(default = "5000")]
    pub redis_connection_timeout_ms: u64,

    #[envconfig(from = "CONTROL_PREFIX", default = "controlService:control")]
    pub prefix: String,

    #[envconfig(default = "worker")]
    pub service_name: String,

    #[envconfig(default = "worker")]
    pub app_type: String,

    // Comma separated
    #[envconfig(default = "")]
    pub instance_tags: String,

    // JSON object of scalar values
    #[envconfig(default = "{}")]
    pub instance_metadata: String,

    #[envconfig(default = "30")]
    pub heartbeat_ttl_secs: u64,

    #[envconfig(default = "10")]
    pub shutdown_ttl_secs: u64,

    #[envconfig(default = "1000")]
    pub poll_interval_ms: u64,

    #[envconfig(default = "10000")]
    pub heartbeat_interval_ms: u64,

    #[envconfig(default = "10000")]
    pub graceful_shutdown_ms: u64,

    #[envconfig(default = "1000")]
    pub work_interval_ms: u64,

    pub metrics_bind: Option<String>,
}

impl Config {
    pub fn control_config(&self) -> Result<ControlConfig> {
        validate_service_name(&self.service_name)?;

        let tags = self
            .instance_tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        let metadata: BTreeMap<String, MetadataValue> =
            serde_json::from_str(&self.instance_metadata).map_err(|e| {
                Error::InvalidConfig(format!(
                    "INSTANCE_METADATA must be a JSON object of scalars: {e}"
                ))
            })?;

        let control = ControlConfig {
            prefix: self.prefix.clone(),
            service_name: self.service_name.clone(),
            app_type: self.app_type.clone(),
            tags,
            metadata,
            heartbeat_ttl: Duration::from_secs(self.heartbeat_ttl_secs),
            shutdown_ttl: Duration::from_secs(self.shutdown_ttl_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
        };
        control.validate()?;
        Ok(control)
    }

    pub fn redis_timeouts(&self) -> (Option<Duration>, Option<Duration>) {
        let non_zero = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        (
            non_zero(self.redis_response_timeout_ms),
            non_zero(self.redis_connection_timeout_ms),
        )
    }

    pub fn graceful_shutdown(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_ms)
    }

    pub fn work_interval(&self) -> Duration {
        Duration::from_millis(self.work_interval_ms)
    }
}

/// Settings for one [`ServiceController`](crate::ServiceController).
#[derive(Clone, Debug)]
pub struct ControlConfig {
    pub prefix: String,
    pub service_name: String,
    pub app_type: String,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Expiry of the instance descriptor; heartbeats must come more often than this.
    pub heartbeat_ttl: Duration,
    /// Expiry written on shutdown so registries forget the instance quickly.
    pub shutdown_ttl: Duration,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl ControlConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            service_name: service_name.into(),
            app_type: "worker".to_string(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
            shutdown_ttl: DEFAULT_SHUTDOWN_TTL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_app_type(mut self, app_type: impl Into<String>) -> Self {
        self.app_type = app_type.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_heartbeat_ttl(mut self, ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl;
        self
    }

    pub fn with_shutdown_ttl(mut self, ttl: Duration) -> Self {
        self.shutdown_ttl = ttl;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Checks the timing settings against each other. A heartbeat interval at or above
    /// the heartbeat TTL lets the descriptor expire between beats; zero intervals turn
    /// the poll and heartbeat loops into busy loops against the store.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("heartbeat_ttl", self.heartbeat_ttl),
            ("shutdown_ttl", self.shutdown_ttl),
            ("poll_interval", self.poll_interval),
            ("heartbeat_interval", self.heartbeat_interval),
        ]
        .into_iter()
        .find(|(_, d)| d.is_zero());
        if let Some((name, _)) = zero {
            return Err(Error::InvalidConfig(format!("{name} must be positive")));
        }

        if self.heartbeat_interval >= self.heartbeat_ttl {
            return Err(Error::InvalidConfig(format!(
                "heartbeat_interval ({:?}) must be shorter than heartbeat_ttl ({:?})",
                self.heartbeat_interval, self.heartbeat_ttl
            )));
        }
        Ok(())
    }

    /// Store TTLs are whole seconds; sub-second values round up so a key never
    /// gets a zero expiry.
    pub(crate) fn heartbeat_ttl_secs(&self) -> u64 {
        ceil_secs(self.heartbeat_ttl)
    }

    pub(crate) fn shutdown_ttl_secs(&self) -> u64 {
        ceil_secs(self.shutdown_ttl)
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_config() -> Config {
        Config::init_from_hashmap(&Default::default()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = env_config();
        assert_eq!(config.prefix, "controlService:control");
        assert_eq!(config.heartbeat_ttl_secs, 30);
        assert_eq!(config.poll_interval_ms, 1000);

        let control = config.control_config().unwrap();
        assert_eq!(control.heartbeat_ttl, DEFAULT_HEARTBEAT_TTL);
        assert_eq!(control.shutdown_ttl, DEFAULT_SHUTDOWN_TTL);
        assert_eq!(control.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(control.tags.is_empty());
        assert!(control.metadata.is_empty());
    }

    #[test]
    fn test_tags_and_metadata_from_env() {
        let mut config = env_config();
        config.instance_tags = "eu, batch,,canary ".to_string();
        config.instance_metadata = r#"{"shard": 3, "region": "eu-west-1", "canary": true}"#.to_string();

        let control = config.control_config().unwrap();

        assert_eq!(control.tags, vec!["eu", "batch", "canary"]);
        assert_eq!(control.metadata["shard"], MetadataValue::Int(3));
        assert_eq!(control.metadata["canary"], MetadataValue::Bool(true));
    }

    #[test]
    fn test_rejects_bad_metadata_and_service_name() {
        let mut config = env_config();
        config.instance_metadata = r#"{"nested": {"a": 1}}"#.to_string();
        assert!(matches!(
            config.control_config(),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = env_config();
        config.service_name = "billing:eu".to_string();
        assert!(matches!(
            config.control_config(),
            Err(Error::InvalidServiceName(_))
        ));
    }

    #[test]
    fn test_rejects_intervals_that_break_liveness() {
        let cases: [(&str, u64); 4] = [
            ("HEARTBEAT_INTERVAL_MS", 60_000),
            ("HEARTBEAT_INTERVAL_MS", 30_000),
            ("HEARTBEAT_INTERVAL_MS", 0),
            ("POLL_INTERVAL_MS", 0),
        ];
        for (var, value) in cases {
            let env = HashMap::from([(var.to_string(), value.to_string())]);
            let config = Config::init_from_hashmap(&env).unwrap();

            assert!(
                matches!(config.control_config(), Err(Error::InvalidConfig(_))),
                "{var}={value} should be rejected"
            );
        }

        let env = HashMap::from([("HEARTBEAT_TTL_SECS".to_string(), "0".to_string())]);
        let config = Config::init_from_hashmap(&env).unwrap();
        assert!(matches!(
            config.control_config(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_library_config_validation() {
        assert!(ControlConfig::new("api").validate().is_ok());
        assert!(ControlConfig::new("api")
            .with_heartbeat_interval(Duration::from_millis(29_999))
            .validate()
            .is_ok());

        for config in [
            ControlConfig::new("api").with_heartbeat_ttl(Duration::from_secs(5)),
            ControlConfig::new("api").with_poll_interval(Duration::ZERO),
            ControlConfig::new("api").with_shutdown_ttl(Duration::ZERO),
        ] {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_zero_redis_timeouts_mean_none() {
        let mut config = env_config();
        config.redis_response_timeout_ms = 0;

        let (response, connection) = config.redis_timeouts();
        assert_eq!(response, None);
        assert_eq!(connection, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_ttl_seconds_round_up() {
        let config = ControlConfig::new("api")
            .with_heartbeat_ttl(Duration::from_millis(1500))
            .with_shutdown_ttl(Duration::from_millis(10));

        assert_eq!(config.heartbeat_ttl_secs(), 2);
        assert_eq!(config.shutdown_ttl_secs(), 1);
        assert_eq!(ControlConfig::new("api").heartbeat_ttl_secs(), 30);
    }
}
