use common_redis::CustomRedisError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] CustomRedisError),

    #[error("failed to serialize instance descriptor: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid service name {0:?}: must be non-empty and must not contain ':'")]
    InvalidServiceName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True when a failed store call is worth retrying, e.g. a heartbeat that timed out.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(e) => !e.is_unrecoverable_error(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
