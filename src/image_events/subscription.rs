//! Broker subscription seam and the consumer run loop.
//!
//! The actual broker client lives outside this service; anything able to
//! deliver `(topic, payload)` pairs can drive the consumer. A channel-backed
//! implementation covers wiring and tests.

use super::consumer::{ImageEventConsumer, ImageEventKind};
use super::payload::EventPayload;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Topic names for the two event kinds, configurable at startup.
#[derive(Clone, Debug)]
pub struct ImageEventTopics {
    pub uploaded: String,
    pub deleted: String,
}

impl Default for ImageEventTopics {
    fn default() -> Self {
        ImageEventTopics {
            uploaded: "image.uploaded".to_string(),
            deleted: "image.deleted".to_string(),
        }
    }
}

/// A stream of broker messages.
#[async_trait]
pub trait BrokerSubscription: Send {
    /// Next `(topic, payload)` pair, or `None` once the stream is closed.
    async fn next_message(&mut self) -> Option<(String, EventPayload)>;
}

/// Subscription fed through an in-process channel.
pub struct ChannelSubscription {
    receiver: mpsc::Receiver<(String, EventPayload)>,
}

impl ChannelSubscription {
    pub fn channel(buffer: usize) -> (mpsc::Sender<(String, EventPayload)>, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (sender, ChannelSubscription { receiver })
    }
}

#[async_trait]
impl BrokerSubscription for ChannelSubscription {
    async fn next_message(&mut self) -> Option<(String, EventPayload)> {
        self.receiver.recv().await
    }
}

/// Drive the consumer until the subscription closes.
///
/// Storage errors abort the loop so the caller can decide whether to
/// restart or shut down; data-quality problems never reach this level.
pub async fn run_consumer<S: BrokerSubscription>(
    consumer: ImageEventConsumer,
    topics: ImageEventTopics,
    mut subscription: S,
) -> Result<()> {
    info!(
        "Image event consumer listening on topics '{}' and '{}'",
        topics.uploaded, topics.deleted
    );
    while let Some((topic, payload)) = subscription.next_message().await {
        let kind = if topic == topics.uploaded {
            ImageEventKind::Uploaded
        } else if topic == topics.deleted {
            ImageEventKind::Deleted
        } else {
            debug!("Ignoring message on unknown topic {}", topic);
            continue;
        };
        consumer.handle_message(kind, payload)?;
    }
    info!("Image event subscription closed");
    Ok(())
}
