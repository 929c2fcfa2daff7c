//! Pub/sub transport between cluster nodes.
//!
//! This module contains:
//! - `Transport` trait: publish, subscribe, and subscriber counts
//! - `MessageHandler` trait: for processing received payloads
//! - Transport configuration types and the `init_transport` factory
//! - Implementations: in-memory channel hub, Redis, Mock

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::info;

// Implementation modules
pub mod channel;
pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

// Re-exports
pub use channel::ChannelTransport;
pub use mock::MockTransport;
#[cfg(feature = "redis")]
pub use self::redis::RedisTransport;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Exact channel name.
    Channel(String),
    /// Glob pattern as understood by the `glob` crate: `*`, `?`, and `[...]`
    /// classes with `[!...]` negation. Redis also accepts `\` escapes and
    /// `[^...]`; the in-process transports do not.
    Pattern(String),
}

impl Topic {
    /// Prepare the topic for repeated matching.
    pub fn matcher(&self) -> Result<TopicMatcher> {
        Ok(match self {
            Topic::Channel(name) => TopicMatcher::Channel(name.clone()),
            Topic::Pattern(pattern) => TopicMatcher::Pattern(
                glob::Pattern::new(pattern)
                    .map_err(|e| BusError::Subscribe(format!("Invalid pattern {pattern:?}: {e}")))?,
            ),
        })
    }

    /// One-off match. An invalid pattern matches nothing.
    pub fn matches(&self, channel: &str) -> bool {
        self.matcher().is_ok_and(|m| m.matches(channel))
    }
}

/// A compiled [`Topic`].
#[derive(Debug, Clone)]
pub enum TopicMatcher {
    Channel(String),
    Pattern(glob::Pattern),
}

impl TopicMatcher {
    pub fn matches(&self, channel: &str) -> bool {
        match self {
            TopicMatcher::Channel(name) => name == channel,
            TopicMatcher::Pattern(pattern) => pattern.matches(channel),
        }
    }
}

/// Compile every topic of a subscription.
pub(crate) fn compile_topics(topics: &[Topic]) -> Result<Vec<TopicMatcher>> {
    topics.iter().map(Topic::matcher).collect()
}

/// Handler for payloads received from the transport.
///
/// Calls are made sequentially per subscription, in arrival order.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, channel: String, payload: Bytes) -> BoxFuture<'static, ()>;
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stop receiving. Equivalent to dropping the handle.
    pub fn cancel(self) {}

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Opaque publish/subscribe primitive connecting cluster nodes.
///
/// Implementations:
/// - `ChannelTransport`: in-process hub over tokio broadcast channels
/// - `RedisTransport`: Redis pub/sub (feature `redis`)
/// - `MockTransport`: records publishes for testing
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload to every subscriber of `channel`, including this node's own.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Subscribe a handler to a set of channels and patterns.
    ///
    /// Every payload published to a matching topic after this returns is
    /// delivered to `handler`. Topics should not overlap.
    async fn subscribe(
        &self,
        topics: Vec<Topic>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription>;

    /// Number of exact-channel subscriptions to `channel` across all nodes.
    async fn count_subscribers(&self, channel: &str) -> Result<usize>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Transport type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// In-process channel hub.
    #[default]
    Channel,
    /// Redis pub/sub.
    Redis,
}

/// Transport configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport type discriminator.
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    /// Redis-specific configuration.
    pub redis: RedisConfig,
}

/// Redis-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize a transport based on configuration.
///
/// The Redis backend requires `--features redis`.
pub async fn init_transport(
    config: &TransportConfig,
) -> std::result::Result<Arc<dyn Transport>, Box<dyn std::error::Error + Send + Sync>> {
    match config.transport_type {
        TransportType::Channel => {
            info!(transport_type = "channel", "Transport initialized");
            Ok(Arc::new(ChannelTransport::new()))
        }
        TransportType::Redis => {
            #[cfg(feature = "redis")]
            {
                let transport = RedisTransport::connect(&config.redis.url).await?;
                info!(transport_type = "redis", "Transport initialized");
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "redis"))]
            {
                Err("Redis support requires the 'redis' feature. Rebuild with --features redis".into())
            }
        }
    }
}
