mod consumer;
mod payload;
mod subscription;

pub use consumer::{
    ImageEventConsumer, ImageEventKind, EVENT_TYPE_IMAGE_DELETED, EVENT_TYPE_IMAGE_UPLOADED,
};
pub use payload::{parse_payload, EventPayload, ImageEventEnvelope};
pub use subscription::{run_consumer, BrokerSubscription, ChannelSubscription, ImageEventTopics};
