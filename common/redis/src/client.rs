use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

use crate::{Client, CustomRedisError};

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Connect without timeouts. Fine for one-shot tools; long-running instances should
    /// use [`RedisClient::with_config`] so a stuck heartbeat cannot outlive its TTL.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Connect with per-command and connect timeouts. `None` waits forever; a zero
    /// duration is rejected as `InvalidConfiguration`.
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        reject_zero("response", response_timeout)?;
        reject_zero("connection", connection_timeout)?;

        let client = redis::Client::open(addr)?;

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        debug!(?response_timeout, ?connection_timeout, "connected to redis");

        Ok(RedisClient { connection })
    }
}

fn reject_zero(name: &str, timeout: Option<Duration>) -> Result<(), CustomRedisError> {
    match timeout {
        Some(t) if t.is_zero() => Err(CustomRedisError::InvalidConfiguration(format!(
            "{name} timeout must be positive, use None to disable it"
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let raw_bytes: Vec<u8> = conn.get(k).await?;

        // nil and empty both read back as an empty payload
        if raw_bytes.is_empty() {
            return Err(CustomRedisError::NotFound);
        }

        Ok(String::from_utf8(raw_bytes)?)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(k, v).await?;
        Ok(())
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(k, v, seconds).await?;
        Ok(())
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(k).await?;
        Ok(())
    }

    async fn sadd(&self, k: String, member: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.sadd::<_, _, ()>(k, member).await?;
        Ok(())
    }

    async fn srem(&self, k: String, member: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.srem::<_, _, ()>(k, member).await?;
        Ok(())
    }

    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn.smembers(k).await?;
        Ok(members)
    }
}
