//! Best-effort pub/sub fan-out of raw events

use async_trait::async_trait;
use claims_common::{Error, Result};
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::debug;

/// Publishes serialized events to a channel
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}

/// Bus that drops everything (pub/sub disabled)
#[derive(Default)]
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn publish(&self, channel: &str, _payload: &str) -> Result<()> {
        debug!("Event bus disabled, dropping publish to {}", channel);
        Ok(())
    }
}

/// Redis-backed pub/sub bus
pub struct RedisEventBus {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisEventBus {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Configuration(format!("invalid redis url: {}", e)))?;
        Ok(RedisEventBus {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Network(format!("redis connection failed: {}", e)))?;
        *slot = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut connection = self.connection().await?;
        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut connection)
            .await
            .map_err(|e| Error::Network(format!("redis publish failed: {}", e)))?;

        debug!("Published event to channel {}", channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_bus_accepts_everything() {
        let bus = NullEventBus;
        assert!(bus.publish("teams:events:test", "{}").await.is_ok());
    }

    #[test]
    fn invalid_redis_url_is_configuration_error() {
        assert!(matches!(
            RedisEventBus::new("not-a-url"),
            Err(Error::Configuration(_))
        ));
    }
}
