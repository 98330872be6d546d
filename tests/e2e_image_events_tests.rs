//! End-to-end tests for the image event consumer
//!
//! Events are pushed onto the broker topics and observed through the
//! admin API, exercising the full apply path into the image tables.

mod common;

use std::time::Duration;

use common::{TestClient, TestServer};
use serde_json::{json, Value};

const TOPIC_UPLOADED: &str = "image.uploaded";
const TOPIC_DELETED: &str = "image.deleted";

fn image_event(event_type: &str, external_id: &str, entity_type: &str, entity_id: i64) -> Value {
    json!({
        "eventType": event_type,
        "data": {
            "externalId": external_id,
            "entityId": entity_id,
            "entityType": entity_type,
            "imageType": "thumbnail",
        }
    })
}

async fn seed_product(client: &TestClient) -> i64 {
    let category: Value = client
        .admin_post(
            "/v1/admin/categories",
            &json!({ "name": "Coffee", "slug": "coffee" }),
        )
        .await
        .json()
        .await
        .unwrap();
    let product: Value = client
        .admin_post(
            "/v1/admin/products",
            &json!({
                "name": "Espresso",
                "slug": "espresso",
                "price": 2.5,
                "categoryId": category["id"].as_i64().unwrap(),
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    product["id"].as_i64().unwrap()
}

/// Poll the admin API until the entity carries `expected` images. The
/// consumer applies events asynchronously, so assertions have to wait.
async fn wait_for_images(client: &TestClient, path: &str, expected: usize) -> Value {
    let mut entity = Value::Null;
    for _ in 0..100 {
        entity = client.admin_get(path).await.json().await.unwrap();
        if entity["images"].as_array().map(|a| a.len()) == Some(expected) {
            return entity;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "entity at {} never reached {} images, last seen: {}",
        path, expected, entity
    );
}

#[tokio::test]
async fn test_upload_event_attaches_product_image() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let product_id = seed_product(&client).await;

    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-123", "catalog.product", product_id),
        )
        .await;

    let product =
        wait_for_images(&client, &format!("/v1/admin/products/{}", product_id), 1).await;
    assert_eq!(product["images"][0]["url"], "file-123");
    assert_eq!(product["images"][0]["type"], "thumbnail");
}

#[tokio::test]
async fn test_duplicate_upload_is_a_noop() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let product_id = seed_product(&client).await;

    let event = image_event("image.uploaded", "file-123", "catalog.product", product_id);
    server.send_image_event(TOPIC_UPLOADED, event.clone()).await;
    server.send_image_event(TOPIC_UPLOADED, event).await;
    // A distinct trailing image proves both earlier events were consumed.
    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-456", "catalog.product", product_id),
        )
        .await;

    let product =
        wait_for_images(&client, &format!("/v1/admin/products/{}", product_id), 2).await;
    assert_eq!(product["images"][0]["url"], "file-123");
    assert_eq!(product["images"][1]["url"], "file-456");
}

#[tokio::test]
async fn test_delete_event_removes_image() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let product_id = seed_product(&client).await;

    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-123", "catalog.product", product_id),
        )
        .await;
    wait_for_images(&client, &format!("/v1/admin/products/{}", product_id), 1).await;

    server
        .send_image_event(
            TOPIC_DELETED,
            image_event("image.deleted", "file-123", "catalog.product", product_id),
        )
        .await;
    wait_for_images(&client, &format!("/v1/admin/products/{}", product_id), 0).await;
}

#[tokio::test]
async fn test_delete_event_falls_back_to_url_match() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let product_id = seed_product(&client).await;

    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-123", "catalog.product", product_id),
        )
        .await;
    wait_for_images(&client, &format!("/v1/admin/products/{}", product_id), 1).await;

    // Deletion names a different image type; the url fallback still hits.
    server
        .send_image_event(
            TOPIC_DELETED,
            json!({
                "eventType": "image.deleted",
                "data": {
                    "externalId": "file-123",
                    "entityId": product_id,
                    "entityType": "catalog.product",
                    "imageType": "banner",
                }
            }),
        )
        .await;
    wait_for_images(&client, &format!("/v1/admin/products/{}", product_id), 0).await;
}

#[tokio::test]
async fn test_mismatched_event_type_is_ignored() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let product_id = seed_product(&client).await;

    // A deletion event on the upload topic must not be applied.
    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.deleted", "file-123", "catalog.product", product_id),
        )
        .await;
    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-456", "catalog.product", product_id),
        )
        .await;

    let product =
        wait_for_images(&client, &format!("/v1/admin/products/{}", product_id), 1).await;
    assert_eq!(product["images"][0]["url"], "file-456");
}

#[tokio::test]
async fn test_malformed_and_unknown_events_are_dropped() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let product_id = seed_product(&client).await;

    // Unknown owner, unsupported entity type and garbage all get dropped
    // without stalling the consumer.
    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-1", "catalog.product", 9999),
        )
        .await;
    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-2", "catalog.warehouse", product_id),
        )
        .await;
    server.send_image_event(TOPIC_UPLOADED, json!("not an event")).await;
    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-3", "catalog.product", product_id),
        )
        .await;

    let product =
        wait_for_images(&client, &format!("/v1/admin/products/{}", product_id), 1).await;
    assert_eq!(product["images"][0]["url"], "file-3");
}

#[tokio::test]
async fn test_category_images_follow_same_path() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let category: Value = client
        .admin_post(
            "/v1/admin/categories",
            &json!({ "name": "Coffee", "slug": "coffee" }),
        )
        .await
        .json()
        .await
        .unwrap();
    let category_id = category["id"].as_i64().unwrap();

    server
        .send_image_event(
            TOPIC_UPLOADED,
            image_event("image.uploaded", "file-cat", "catalog.category", category_id),
        )
        .await;

    let category =
        wait_for_images(&client, &format!("/v1/admin/categories/{}", category_id), 1).await;
    assert_eq!(category["images"][0]["url"], "file-cat");
}
