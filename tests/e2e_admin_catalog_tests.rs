//! End-to-end tests for the admin catalog API
//!
//! Covers token enforcement and CRUD over `/v1/admin/*`.

mod common;

use common::{TestClient, TestServer};
use serde_json::json;

// ============================================================================
// Authorization Tests
// ============================================================================

#[tokio::test]
async fn test_admin_routes_reject_missing_token() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let protected_routes = vec![
        "/v1/admin/categories",
        "/v1/admin/products",
        "/v1/admin/branches",
        "/v1/admin/branch-products",
    ];

    for route in protected_routes {
        let response = client.get(route).await;
        assert_eq!(response.status(), 401, "{}", route);
    }
}

#[tokio::test]
async fn test_admin_routes_reject_wrong_token() {
    let server = TestServer::spawn().await;

    let response = reqwest::Client::new()
        .get(format!("{}/v1/admin/categories", server.base_url))
        .bearer_auth("not-the-admin-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

// ============================================================================
// Category CRUD
// ============================================================================

#[tokio::test]
async fn test_category_crud_roundtrip() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .admin_post(
            "/v1/admin/categories",
            &json!({ "name": "Coffee", "slug": "coffee", "description": "Hot drinks" }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let created: serde_json::Value = response.json().await.unwrap();
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["slug"], "coffee");

    let response = client
        .admin_put(
            &format!("/v1/admin/categories/{}", id),
            &json!({ "name": "Coffee & Tea" }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let updated: serde_json::Value = response.json().await.unwrap();
    assert_eq!(updated["name"], "Coffee & Tea");
    assert_eq!(updated["slug"], "coffee");

    let response = client.admin_get("/v1/admin/categories").await;
    assert_eq!(response.status(), 200);
    let page: serde_json::Value = response.json().await.unwrap();
    assert_eq!(page["total"].as_i64().unwrap(), 1);

    let response = client
        .admin_delete(&format!("/v1/admin/categories/{}", id))
        .await;
    assert_eq!(response.status(), 204);

    // Soft-deleted categories disappear from lookups.
    let response = client.admin_get(&format!("/v1/admin/categories/{}", id)).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_duplicate_category_slug_conflicts() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let body = json!({ "name": "Coffee", "slug": "coffee" });
    let response = client.admin_post("/v1/admin/categories", &body).await;
    assert_eq!(response.status(), 201);

    let response = client.admin_post("/v1/admin/categories", &body).await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn test_malformed_slug_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .admin_post(
            "/v1/admin/categories",
            &json!({ "name": "Coffee", "slug": "Not A Slug!" }),
        )
        .await;
    assert_eq!(response.status(), 400);
}

// ============================================================================
// Product / listing lifecycle
// ============================================================================

async fn seed_catalog(client: &TestClient) -> (i64, i64, i64, i64) {
    let category: serde_json::Value = client
        .admin_post(
            "/v1/admin/categories",
            &json!({ "name": "Coffee", "slug": "coffee" }),
        )
        .await
        .json()
        .await
        .unwrap();
    let category_id = category["id"].as_i64().unwrap();

    let product: serde_json::Value = client
        .admin_post(
            "/v1/admin/products",
            &json!({
                "name": "Espresso",
                "slug": "espresso",
                "price": 2.5,
                "categoryId": category_id,
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    let product_id = product["id"].as_i64().unwrap();

    let branch: serde_json::Value = client
        .admin_post(
            "/v1/admin/branches",
            &json!({ "name": "Downtown", "address": "1 Main St" }),
        )
        .await
        .json()
        .await
        .unwrap();
    let branch_id = branch["id"].as_i64().unwrap();

    let listing: serde_json::Value = client
        .admin_post(
            "/v1/admin/branch-products",
            &json!({ "branchId": branch_id, "productId": product_id, "stock": 10 }),
        )
        .await
        .json()
        .await
        .unwrap();
    let listing_id = listing["id"].as_i64().unwrap();

    (category_id, product_id, branch_id, listing_id)
}

#[tokio::test]
async fn test_deleting_product_deactivates_listings() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let (_, product_id, _, listing_id) = seed_catalog(&client).await;

    let response = client
        .admin_delete(&format!("/v1/admin/products/{}", product_id))
        .await;
    assert_eq!(response.status(), 204);

    let listing: serde_json::Value = client
        .admin_get(&format!("/v1/admin/branch-products/{}", listing_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listing["isActive"], false);

    // Gone from the storefront as well.
    let page: serde_json::Value = client
        .get("/v1/catalog/products")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"].as_i64().unwrap(), 0);

    // Admin still sees the soft-deleted product.
    let response = client
        .admin_get(&format!("/v1/admin/products/{}", product_id))
        .await;
    assert_eq!(response.status(), 200);
    let product: serde_json::Value = response.json().await.unwrap();
    assert!(product["deletedAt"].is_string());
}

#[tokio::test]
async fn test_duplicate_listing_conflicts() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let (_, product_id, branch_id, _) = seed_catalog(&client).await;

    let response = client
        .admin_post(
            "/v1/admin/branch-products",
            &json!({ "branchId": branch_id, "productId": product_id }),
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn test_unknown_ids_return_not_found() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    assert_eq!(client.admin_get("/v1/admin/products/999").await.status(), 404);
    assert_eq!(client.admin_get("/v1/admin/branches/999").await.status(), 404);
    assert_eq!(
        client
            .admin_put("/v1/admin/categories/999", &json!({ "name": "x" }))
            .await
            .status(),
        404
    );
}
