//! Image event validation and application.
//!
//! Events describe images uploaded to or deleted from the external image
//! service. The catalog stores the service's external file id as the image
//! url. Data-quality problems are logged and dropped; storage failures
//! propagate to the driving loop.

use super::payload::{parse_payload, EventPayload};
use crate::catalog_store::{CatalogStore, ImageOwnerKind, StoreResult};
use crate::server::metrics;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

pub const EVENT_TYPE_IMAGE_UPLOADED: &str = "image.uploaded";
pub const EVENT_TYPE_IMAGE_DELETED: &str = "image.deleted";

const ENTITY_TYPE_PRODUCT: &str = "catalog.product";
const ENTITY_TYPE_CATEGORY: &str = "catalog.category";

/// The two event kinds the consumer subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageEventKind {
    Uploaded,
    Deleted,
}

impl ImageEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            ImageEventKind::Uploaded => EVENT_TYPE_IMAGE_UPLOADED,
            ImageEventKind::Deleted => EVENT_TYPE_IMAGE_DELETED,
        }
    }
}

/// Owner of an image, resolved from the event's `entityType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Product,
    Category,
}

impl EntityKind {
    fn from_entity_type(entity_type: &str) -> Option<Self> {
        match entity_type {
            ENTITY_TYPE_PRODUCT => Some(EntityKind::Product),
            ENTITY_TYPE_CATEGORY => Some(EntityKind::Category),
            _ => None,
        }
    }

    fn owner_kind(&self) -> ImageOwnerKind {
        match self {
            EntityKind::Product => ImageOwnerKind::Product,
            EntityKind::Category => ImageOwnerKind::Category,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Category => "category",
        }
    }
}

/// A validated event body.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ImageEvent {
    external_id: String,
    entity_kind: EntityKind,
    entity_id: i64,
    image_type: String,
}

/// The `entityId` may arrive as a JSON number or a numeric string;
/// anything non-integral is rejected.
fn parse_entity_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn validate_event_data(data: &Map<String, Value>) -> Option<ImageEvent> {
    let external_id = data
        .get("externalId")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    let entity_id_raw = data.get("entityId").filter(|v| !v.is_null());
    let entity_type = data.get("entityType").and_then(Value::as_str);

    if external_id.is_empty() || entity_id_raw.is_none() || entity_type.is_none() {
        warn!("Dropping image event without required data.externalId/entityId/entityType");
        return None;
    }
    let entity_id_raw = entity_id_raw?;
    let entity_type = entity_type?;

    let entity_id = match parse_entity_id(entity_id_raw) {
        Some(entity_id) => entity_id,
        None => {
            warn!("Dropping image event with malformed entityId={}", entity_id_raw);
            return None;
        }
    };

    let entity_kind = match EntityKind::from_entity_type(entity_type) {
        Some(entity_kind) => entity_kind,
        None => {
            warn!("Dropping image event with unsupported entityType={}", entity_type);
            return None;
        }
    };

    let image_type = data
        .get("imageType")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or("default")
        .to_string();

    Some(ImageEvent {
        external_id: external_id.to_string(),
        entity_kind,
        entity_id,
        image_type,
    })
}

/// Applies image events to the catalog store.
pub struct ImageEventConsumer {
    store: Arc<dyn CatalogStore>,
}

impl ImageEventConsumer {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        ImageEventConsumer { store }
    }

    /// Handle one broker message for the given event kind.
    ///
    /// Malformed payloads and invalid fields are dropped with a warning.
    /// Only storage errors bubble up.
    pub fn handle_message(&self, kind: ImageEventKind, payload: EventPayload) -> StoreResult<()> {
        let envelope = match parse_payload(payload) {
            Some(envelope) => envelope,
            None => {
                warn!("Dropping malformed {} message", kind.event_type());
                metrics::record_image_event(kind.event_type(), "dropped");
                return Ok(());
            }
        };

        // A foreign event type on the right topic is ignored without noise.
        if envelope.event_type.as_deref() != Some(kind.event_type()) {
            metrics::record_image_event(kind.event_type(), "ignored");
            return Ok(());
        }

        let event = match validate_event_data(&envelope.data) {
            Some(event) => event,
            None => {
                metrics::record_image_event(kind.event_type(), "dropped");
                return Ok(());
            }
        };

        let outcome = match kind {
            ImageEventKind::Uploaded => self.apply_upload(&event)?,
            ImageEventKind::Deleted => self.apply_delete(&event)?,
        };
        metrics::record_image_event(kind.event_type(), outcome);
        Ok(())
    }

    fn apply_upload(&self, event: &ImageEvent) -> StoreResult<&'static str> {
        let owner_kind = event.entity_kind.owner_kind();
        if !self.store.image_owner_exists(owner_kind, event.entity_id)? {
            warn!(
                "{} {} not found, image {} not stored",
                event.entity_kind.label(),
                event.entity_id,
                event.external_id
            );
            return Ok("dropped");
        }

        // Idempotency: a second upload of the same triple is a no-op.
        if self
            .store
            .find_image(owner_kind, event.entity_id, &event.external_id, &event.image_type)?
            .is_some()
        {
            return Ok("duplicate");
        }

        self.store.insert_image(
            owner_kind,
            event.entity_id,
            &event.external_id,
            &event.image_type,
        )?;
        Ok("applied")
    }

    fn apply_delete(&self, event: &ImageEvent) -> StoreResult<&'static str> {
        let owner_kind = event.entity_kind.owner_kind();
        let removed = self.store.delete_images_exact(
            owner_kind,
            event.entity_id,
            &event.external_id,
            &event.image_type,
        )?;
        if removed > 0 {
            return Ok("applied");
        }

        // The event's type may not match what was stored; fall back to
        // removing every row for this owner and url.
        let removed =
            self.store
                .delete_images_by_url(owner_kind, event.entity_id, &event.external_id)?;
        if removed > 0 {
            Ok("applied")
        } else {
            Ok("noop")
        }
    }
}
