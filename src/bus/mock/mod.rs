//! Mock transport implementation for testing.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{
    compile_topics, BusError, MessageHandler, Result, Subscription, Topic, TopicMatcher, Transport,
};

/// Mock transport for testing.
///
/// Publishes are recorded instead of delivered. Subscribed handlers can be
/// driven by hand with [`MockTransport::deliver`].
#[derive(Default)]
pub struct MockTransport {
    published: RwLock<Vec<(String, Bytes)>>,
    subscribers: RwLock<Vec<(Vec<TopicMatcher>, Arc<dyn MessageHandler>)>>,
    subscriber_count: RwLock<usize>,
    fail_on_publish: RwLock<bool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Value returned by `count_subscribers` for every channel.
    pub async fn set_subscriber_count(&self, count: usize) {
        *self.subscriber_count.write().await = count;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<(String, Bytes)> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Hand a payload to every handler whose topics match `channel`.
    pub async fn deliver(&self, channel: &str, payload: Bytes) {
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .subscribers
            .read()
            .await
            .iter()
            .filter(|(matchers, _)| matchers.iter().any(|m| m.matches(channel)))
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler.handle(channel.to_string(), payload.clone()).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        self.published
            .write()
            .await
            .push((channel.to_string(), payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: Vec<Topic>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        let matchers = compile_topics(&topics)?;
        self.subscribers.write().await.push((matchers, handler));
        Ok(Subscription::new(tokio::spawn(async {})))
    }

    async fn count_subscribers(&self, _channel: &str) -> Result<usize> {
        Ok(*self.subscriber_count.read().await)
    }
}
