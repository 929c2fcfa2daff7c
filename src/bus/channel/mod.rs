//! In-memory channel-based transport.
//!
//! Uses a tokio broadcast channel as a process-wide hub. Transports created
//! with [`ChannelTransport::connect`] share the hub, so several adapters in one
//! process can form a cluster without an external server. Ideal for local
//! development and testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::{compile_topics, MessageHandler, Result, Subscription, Topic, Transport};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Message {
    channel: String,
    payload: Bytes,
}

struct Hub {
    sender: broadcast::Sender<Arc<Message>>,
    /// Exact-channel subscription counts, for `count_subscribers`.
    counts: Mutex<HashMap<String, usize>>,
}

impl Hub {
    fn counts(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keeps a subscriber's exact channels counted until the consumer task ends.
struct Registration {
    hub: Arc<Hub>,
    channels: Vec<String>,
}

impl Registration {
    fn new(hub: Arc<Hub>, topics: &[Topic]) -> Self {
        let channels: Vec<String> = topics
            .iter()
            .filter_map(|t| match t {
                Topic::Channel(name) => Some(name.clone()),
                Topic::Pattern(_) => None,
            })
            .collect();
        {
            let mut counts = hub.counts();
            for channel in &channels {
                *counts.entry(channel.clone()).or_default() += 1;
            }
        }
        Self { hub, channels }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut counts = self.hub.counts();
        for channel in &self.channels {
            if let Some(n) = counts.get_mut(channel) {
                *n -= 1;
                if *n == 0 {
                    counts.remove(channel);
                }
            }
        }
    }
}

/// In-memory transport using tokio broadcast channels.
///
/// Every payload goes to every subscriber on the hub; topic filtering is done
/// on the subscriber side. Publishers receive their own messages, as they
/// would from a pub/sub server.
#[derive(Clone)]
pub struct ChannelTransport {
    hub: Arc<Hub>,
}

impl ChannelTransport {
    /// Create a transport with a fresh hub.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        info!("Channel transport initialized");
        Self {
            hub: Arc::new(Hub {
                sender,
                counts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create another transport attached to the same hub.
    pub fn connect(&self) -> Self {
        Self {
            hub: self.hub.clone(),
        }
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let message = Arc::new(Message {
            channel: channel.to_string(),
            payload,
        });
        match self.hub.sender.send(message) {
            Ok(receivers) => {
                debug!(channel = %channel, receivers, "Published to channel hub");
            }
            Err(_) => {
                // No receivers, that's okay
                debug!(channel = %channel, "Published to channel hub (no receivers)");
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: Vec<Topic>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        // Receiver and counts are in place before returning, so nothing
        // published afterwards is missed.
        let matchers = compile_topics(&topics)?;
        let registration = Registration::new(self.hub.clone(), &topics);
        let mut receiver = self.hub.sender.subscribe();

        info!(topics = ?topics, "Subscribed to channel hub");

        let task = tokio::spawn(async move {
            let _registration = registration;
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if !matchers.iter().any(|m| m.matches(&message.channel)) {
                            continue;
                        }
                        handler
                            .handle(message.channel.clone(), message.payload.clone())
                            .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(task))
    }

    async fn count_subscribers(&self, channel: &str) -> Result<usize> {
        Ok(self.hub.counts().get(channel).copied().unwrap_or(0))
    }
}
