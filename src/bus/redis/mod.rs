//! Redis pub/sub transport.
//!
//! Publishes and subscriber counts go over a shared `ConnectionManager`.
//! Each subscription opens its own pub/sub connection, which is closed when
//! the subscription is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ::redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use async_trait::async_trait;
use backon::Retryable;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{MessageHandler, Result, Subscription, Topic, Transport};
use crate::utils::retry::connection_backoff;

/// Redis-backed transport.
pub struct RedisTransport {
    client: Client,
    conn: ConnectionManager,
}

impl RedisTransport {
    /// Connect to Redis, retrying with exponential backoff.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = (|| {
            let c = client.clone();
            async move { ConnectionManager::new(c).await }
        })
        .retry(connection_backoff())
        .notify(|err: &RedisError, dur: Duration| {
            warn!(error = %err, delay = ?dur, "Redis connection failed, retrying");
        })
        .await?;

        info!("Connected to Redis");

        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(channel, payload.as_ref()).await?;
        debug!(channel = %channel, receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: Vec<Topic>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for topic in &topics {
            match topic {
                Topic::Channel(name) => pubsub.subscribe(name).await?,
                Topic::Pattern(pattern) => pubsub.psubscribe(pattern).await?,
            }
        }

        info!(topics = ?topics, "Subscribed to Redis");

        let task = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload = Bytes::copy_from_slice(msg.get_payload_bytes());
                handler.handle(channel, payload).await;
            }
            warn!("Redis subscription stream ended");
        });

        Ok(Subscription::new(task))
    }

    async fn count_subscribers(&self, channel: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let counts: HashMap<String, usize> = ::redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(channel)
            .query_async(&mut conn)
            .await?;
        Ok(counts.get(channel).copied().unwrap_or(0))
    }
}
