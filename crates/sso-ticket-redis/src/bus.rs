use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use redis::AsyncCommands;
use sso_ticket::{TicketMessageBus, TicketResult};
use tracing::{debug, info, instrument};

use crate::config::RedisBusConfig;
use crate::error::{RedisBusError, Result};

/// [`TicketMessageBus`] over a Redis Pub/Sub channel.
///
/// Redis Pub/Sub is fire-and-forget: a node that is disconnected while a
/// command is published never sees it. The consumer re-subscribes on its
/// own once the stream ends.
///
/// Every publish, connection checkout included, is bounded by the
/// configured timeout.
pub struct RedisMessageBus {
    pool: Pool,
    client: redis::Client,
    channel: String,
    timeout: Duration,
}

impl RedisMessageBus {
    /// Creates the publishing pool and the Pub/Sub client. No connection is
    /// opened until the first publish or subscribe.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(config: &RedisBusConfig) -> Result<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let mut pool_config = PoolConfig::new(config.pool_size.max(1));
        pool_config.timeouts.wait = Some(config.timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config.create_pool(Some(Runtime::Tokio1))?;
        let client = redis::Client::open(config.url.as_str())?;

        Ok(Self {
            pool,
            client,
            channel: config.channel.clone(),
            timeout: config.timeout,
        })
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn publish_bytes(&self, message: Vec<u8>) -> Result<()> {
        let publish = async {
            let mut conn = self.pool.get().await?;
            let receivers: i64 = conn.publish(&self.channel, message).await?;
            Ok::<_, RedisBusError>(receivers)
        };
        let receivers = tokio::time::timeout(self.timeout, publish)
            .await
            .map_err(|_| RedisBusError::Timeout(self.timeout))??;
        debug!(channel = %self.channel, receivers, "Published replication command");
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %self.channel))]
    async fn open_subscription(&self) -> Result<BoxStream<'static, Vec<u8>>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!("Subscribed to replication channel");

        Ok(pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec())
            .boxed())
    }
}

impl std::fmt::Debug for RedisMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMessageBus")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TicketMessageBus for RedisMessageBus {
    async fn publish(&self, message: Vec<u8>) -> TicketResult<()> {
        Ok(self.publish_bytes(message).await?)
    }

    async fn subscribe(&self) -> TicketResult<BoxStream<'static, Vec<u8>>> {
        Ok(self.open_subscription().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_rejected() {
        let config = RedisBusConfig {
            url: "not a url".to_string(),
            ..RedisBusConfig::default()
        };
        assert!(RedisMessageBus::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_construction_does_not_connect() {
        let config = RedisBusConfig {
            url: "redis://127.0.0.1:1".to_string(),
            channel: "test:tickets".to_string(),
            ..RedisBusConfig::default()
        };
        let bus = RedisMessageBus::new(&config).unwrap();
        assert_eq!(bus.channel(), "test:tickets");
    }

    #[tokio::test]
    async fn test_publish_to_silent_server_times_out() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = RedisBusConfig {
            url: format!("redis://{addr}"),
            timeout: Duration::from_millis(200),
            ..RedisBusConfig::default()
        };
        let bus = RedisMessageBus::new(&config).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            bus.publish_bytes(b"command".to_vec()),
        )
        .await
        .expect("publish must give up on its own");
        assert!(matches!(result, Err(RedisBusError::Timeout(_))));

        let err = bus.publish(b"command".to_vec()).await.unwrap_err();
        assert!(err.is_unavailable());

        server.abort();
    }
}
