//! Shop Catalog Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod catalog_store;
pub mod image_events;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use image_events::{
    run_consumer, ChannelSubscription, ImageEventConsumer, ImageEventTopics,
};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
