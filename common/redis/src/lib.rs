use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use redis::ErrorKind as RedisErrorKind;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return CustomRedisError::Timeout;
        }
        CustomRedisError::Redis(Arc::new(err))
    }
}

impl From<std::string::FromUtf8Error> for CustomRedisError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        CustomRedisError::ParseError(err.to_string())
    }
}

impl CustomRedisError {
    /// Build a `Redis` variant of the given kind. Mostly useful for injecting failures
    /// into [`MockRedisClient`].
    pub fn from_redis_kind(kind: RedisErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// True when repeating the same call cannot succeed: bad configuration, bad
    /// credentials, undecodable data, or a missing key. Timeouts and dropped connections
    /// are transient.
    pub fn is_unrecoverable_error(&self) -> bool {
        match self {
            CustomRedisError::Timeout => false,
            CustomRedisError::NotFound
            | CustomRedisError::ParseError(_)
            | CustomRedisError::InvalidConfiguration(_) => true,
            CustomRedisError::Redis(err) => {
                matches!(
                    err.kind(),
                    RedisErrorKind::InvalidClientConfig | RedisErrorKind::AuthenticationFailed
                ) || err.is_unrecoverable_error()
            }
        }
    }
}

/// The subset of redis commands the control plane needs.
///
/// Values are plain UTF-8 strings so operators can read and write them with `redis-cli`.
#[async_trait]
pub trait Client {
    /// Returns `CustomRedisError::NotFound` when the key is absent or empty.
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;
    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError>;
    /// Deleting a missing key is not an error.
    async fn del(&self, k: String) -> Result<(), CustomRedisError>;
    async fn sadd(&self, k: String, member: String) -> Result<(), CustomRedisError>;
    async fn srem(&self, k: String, member: String) -> Result<(), CustomRedisError>;
    /// Returns an empty vec when the set does not exist.
    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError>;
}

mod client;
mod mock;

pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};
