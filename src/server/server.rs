use anyhow::Result;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{error, info};

use crate::catalog_store::{
    BranchProductFilter, BranchProductUpdate, BranchUpdate, CategoryFilter, CategorySelector,
    CategoryUpdate, NewBranch, NewBranchProduct, NewCategory, NewProduct, PageRequest,
    ProductFilter, ProductUpdate, StoreError, StorefrontFilter, StorefrontSelector,
};
use tower_http::services::ServeDir;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::metrics::metrics_handler;
#[cfg(feature = "slowdown")]
use super::slowdown_request;
use super::{log_requests, state::*, RequestsLoggingLevel, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

fn page_request(page: Option<i64>, limit: Option<i64>) -> PageRequest {
    let default = PageRequest::default();
    PageRequest {
        page: page.unwrap_or(default.page),
        limit: limit.unwrap_or(default.limit),
    }
}

fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound(what) => {
            (StatusCode::NOT_FOUND, format!("{} not found", what)).into_response()
        }
        StoreError::Conflict(message) => (StatusCode::CONFLICT, message).into_response(),
        StoreError::Invalid(message) => (StatusCode::BAD_REQUEST, message).into_response(),
        StoreError::Database(err) => {
            error!("Storage failure: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: state.version.clone(),
    };
    Json(stats)
}

// =============================================================================
// Public catalog routes
// =============================================================================

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct CategoriesQuery {
    search: Option<String>,
    parent_id: Option<i64>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn get_categories(
    State(store): State<GuardedCatalogStore>,
    Query(query): Query<CategoriesQuery>,
) -> Response {
    let filter = CategoryFilter {
        search: query.search,
        parent_id: query.parent_id,
        page: page_request(query.page, query.limit),
    };
    match store.list_categories(&filter) {
        Ok(page) => Json(page).into_response(),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct CategoryItemQuery {
    id: Option<i64>,
    slug: Option<String>,
}

async fn get_category_item(
    State(store): State<GuardedCatalogStore>,
    Query(query): Query<CategoryItemQuery>,
) -> Response {
    let selector = match (query.id, query.slug) {
        (Some(id), _) => CategorySelector::Id(id),
        (None, Some(slug)) => CategorySelector::Slug(slug),
        (None, None) => {
            return (StatusCode::BAD_REQUEST, "id or slug is required").into_response()
        }
    };
    match store.get_category(&selector) {
        Ok(Some(category)) => Json(category).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct StorefrontQuery {
    branch_id: Option<i64>,
    search: Option<String>,
    category_id: Option<i64>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn get_products(
    State(store): State<GuardedCatalogStore>,
    Query(query): Query<StorefrontQuery>,
) -> Response {
    let filter = StorefrontFilter {
        branch_id: query.branch_id,
        search: query.search,
        category_id: query.category_id,
        min_price: query.min_price,
        max_price: query.max_price,
        page: page_request(query.page, query.limit),
    };
    match store.list_storefront_products(&filter) {
        Ok(page) => Json(page).into_response(),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct StorefrontItemQuery {
    branch_product_id: Option<i64>,
    slug: Option<String>,
    branch_id: Option<i64>,
}

async fn get_product_item(
    State(store): State<GuardedCatalogStore>,
    Query(query): Query<StorefrontItemQuery>,
) -> Response {
    let selector = match (query.branch_product_id, query.slug) {
        (Some(id), _) => StorefrontSelector::BranchProductId(id),
        (None, Some(slug)) => StorefrontSelector::ProductSlug {
            slug,
            branch_id: query.branch_id,
        },
        (None, None) => {
            return (StatusCode::BAD_REQUEST, "branchProductId or slug is required")
                .into_response()
        }
    };
    match store.get_storefront_product(&selector) {
        Ok(Some(item)) => Json(item).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn get_branches(State(store): State<GuardedCatalogStore>) -> Response {
    match store.list_branches(false) {
        Ok(branches) => Json(branches).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn get_branch(State(store): State<GuardedCatalogStore>, Path(id): Path<i64>) -> Response {
    match store.get_branch(id) {
        Ok(Some(branch)) if branch.is_active => Json(branch).into_response(),
        Ok(_) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => store_error_response(err),
    }
}

// =============================================================================
// Admin routes
// =============================================================================

async fn require_admin_token(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = match &state.config.admin_token {
        Some(token) => request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|candidate| candidate == token)
            .unwrap_or(false),
        None => false,
    };
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(request).await
}

async fn admin_get_category(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.get_category(&CategorySelector::Id(id)) {
        Ok(Some(category)) => Json(category).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_create_category(
    State(store): State<GuardedCatalogStore>,
    Json(body): Json<NewCategory>,
) -> Response {
    match store.create_category(&body) {
        Ok(category) => (StatusCode::CREATED, Json(category)).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_update_category(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<CategoryUpdate>,
) -> Response {
    match store.update_category(id, &body) {
        Ok(category) => Json(category).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_delete_category(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.delete_category(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct AdminProductsQuery {
    search: Option<String>,
    category_id: Option<i64>,
    include_deleted: Option<bool>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn admin_get_products(
    State(store): State<GuardedCatalogStore>,
    Query(query): Query<AdminProductsQuery>,
) -> Response {
    let filter = ProductFilter {
        search: query.search,
        category_id: query.category_id,
        include_deleted: query.include_deleted.unwrap_or(false),
        page: page_request(query.page, query.limit),
    };
    match store.list_products(&filter) {
        Ok(page) => Json(page).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_get_product(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.get_product(id) {
        Ok(Some(product)) => Json(product).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_create_product(
    State(store): State<GuardedCatalogStore>,
    Json(body): Json<NewProduct>,
) -> Response {
    match store.create_product(&body) {
        Ok(product) => (StatusCode::CREATED, Json(product)).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_update_product(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<ProductUpdate>,
) -> Response {
    match store.update_product(id, &body) {
        Ok(product) => Json(product).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_delete_product(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.delete_product(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct AdminBranchesQuery {
    include_inactive: Option<bool>,
}

async fn admin_get_branches(
    State(store): State<GuardedCatalogStore>,
    Query(query): Query<AdminBranchesQuery>,
) -> Response {
    match store.list_branches(query.include_inactive.unwrap_or(false)) {
        Ok(branches) => Json(branches).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_get_branch(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.get_branch(id) {
        Ok(Some(branch)) => Json(branch).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_create_branch(
    State(store): State<GuardedCatalogStore>,
    Json(body): Json<NewBranch>,
) -> Response {
    match store.create_branch(&body) {
        Ok(branch) => (StatusCode::CREATED, Json(branch)).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_update_branch(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<BranchUpdate>,
) -> Response {
    match store.update_branch(id, &body) {
        Ok(branch) => Json(branch).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_delete_branch(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.delete_branch(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct AdminBranchProductsQuery {
    branch_id: Option<i64>,
    product_id: Option<i64>,
    include_inactive: Option<bool>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn admin_get_branch_products(
    State(store): State<GuardedCatalogStore>,
    Query(query): Query<AdminBranchProductsQuery>,
) -> Response {
    let filter = BranchProductFilter {
        branch_id: query.branch_id,
        product_id: query.product_id,
        include_inactive: query.include_inactive.unwrap_or(false),
        page: page_request(query.page, query.limit),
    };
    match store.list_branch_products(&filter) {
        Ok(page) => Json(page).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_get_branch_product(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.get_branch_product(id) {
        Ok(Some(listing)) => Json(listing).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_create_branch_product(
    State(store): State<GuardedCatalogStore>,
    Json(body): Json<NewBranchProduct>,
) -> Response {
    match store.create_branch_product(&body) {
        Ok(listing) => (StatusCode::CREATED, Json(listing)).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_update_branch_product(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(body): Json<BranchProductUpdate>,
) -> Response {
    match store.update_branch_product(id, &body) {
        Ok(listing) => Json(listing).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn admin_delete_branch_product(
    State(store): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Response {
    match store.delete_branch_product(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => store_error_response(err),
    }
}

// =============================================================================
// Router assembly
// =============================================================================

pub fn make_app(config: ServerConfig, catalog_store: GuardedCatalogStore) -> Result<Router> {
    let state = ServerState {
        config: config.clone(),
        start_time: Instant::now(),
        catalog_store,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let catalog_routes: Router = Router::new()
        .route("/categories", get(get_categories))
        .route("/categories/item", get(get_category_item))
        .route("/products", get(get_products))
        .route("/products/item", get(get_product_item))
        .route("/branches", get(get_branches))
        .route("/branches/{id}", get(get_branch))
        .with_state(state.clone());

    let admin_routes: Router = Router::new()
        .route("/categories", get(get_categories))
        .route("/categories", post(admin_create_category))
        .route("/categories/{id}", get(admin_get_category))
        .route("/categories/{id}", put(admin_update_category))
        .route("/categories/{id}", delete(admin_delete_category))
        .route("/products", get(admin_get_products))
        .route("/products", post(admin_create_product))
        .route("/products/{id}", get(admin_get_product))
        .route("/products/{id}", put(admin_update_product))
        .route("/products/{id}", delete(admin_delete_product))
        .route("/branches", get(admin_get_branches))
        .route("/branches", post(admin_create_branch))
        .route("/branches/{id}", get(admin_get_branch))
        .route("/branches/{id}", put(admin_update_branch))
        .route("/branches/{id}", delete(admin_delete_branch))
        .route("/branch-products", get(admin_get_branch_products))
        .route("/branch-products", post(admin_create_branch_product))
        .route("/branch-products/{id}", get(admin_get_branch_product))
        .route("/branch-products/{id}", put(admin_update_branch_product))
        .route("/branch-products/{id}", delete(admin_delete_branch_product))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ))
        .with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let app: Router = home_router
        .nest("/v1/catalog", catalog_routes)
        .nest("/v1/admin", admin_routes);

    #[cfg(feature = "slowdown")]
    let app = app.layer(middleware::from_fn(slowdown_request));

    Ok(app.layer(middleware::from_fn_with_state(state, log_requests)))
}

async fn run_metrics_server(port: u16) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    Ok(axum::serve(listener, app).await?)
}

pub async fn run_server(
    catalog_store: Arc<dyn crate::catalog_store::CatalogStore>,
    requests_logging_level: RequestsLoggingLevel,
    port: u16,
    metrics_port: u16,
    admin_token: Option<String>,
    frontend_dir_path: Option<String>,
) -> Result<()> {
    let config = ServerConfig {
        port,
        requests_logging_level,
        admin_token,
        frontend_dir_path,
    };
    let app = make_app(config, catalog_store)?;

    tokio::spawn(async move {
        if let Err(err) = run_metrics_server(metrics_port).await {
            error!("Metrics server failed: {}", err);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("Serving catalog API on port {}", port);
    Ok(axum::serve(listener, app).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::SqliteCatalogStore;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const ADMIN_TOKEN: &str = "test-admin-token";

    fn make_test_app(dir: &TempDir) -> Router {
        let store = Arc::new(
            SqliteCatalogStore::new(dir.path().join("catalog.db"), 2).unwrap(),
        );
        let config = ServerConfig {
            admin_token: Some(ADMIN_TOKEN.to_string()),
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        make_app(config, store).unwrap()
    }

    fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
            .header(header::CONTENT_TYPE, "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn responds_unauthorized_on_admin_routes() {
        let dir = TempDir::new().unwrap();
        let app = make_test_app(&dir);

        let admin_routes = vec![
            "/v1/admin/categories",
            "/v1/admin/products",
            "/v1/admin/branches",
            "/v1/admin/branch-products",
        ];

        for route in admin_routes {
            let request = Request::builder().uri(route).body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", route);

            let request = Request::builder()
                .uri(route)
                .header(header::AUTHORIZATION, "Bearer wrong-token")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", route);
        }
    }

    #[tokio::test]
    async fn create_and_browse_category() {
        let dir = TempDir::new().unwrap();
        let app = make_test_app(&dir);

        let response = app
            .clone()
            .oneshot(admin_request(
                "POST",
                "/v1/admin/categories",
                Some(json!({ "name": "Drinks", "slug": "drinks" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["slug"], "drinks");

        let request = Request::builder()
            .uri("/v1/catalog/categories/item?slug=drinks")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched = body_json(response).await;
        assert_eq!(fetched["name"], "Drinks");
    }

    #[tokio::test]
    async fn duplicate_slug_maps_to_conflict() {
        let dir = TempDir::new().unwrap();
        let app = make_test_app(&dir);

        let body = json!({ "name": "Drinks", "slug": "drinks" });
        let response = app
            .clone()
            .oneshot(admin_request("POST", "/v1/admin/categories", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(admin_request("POST", "/v1/admin/categories", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn category_item_requires_selector() {
        let dir = TempDir::new().unwrap();
        let app = make_test_app(&dir);

        let request = Request::builder()
            .uri("/v1/catalog/categories/item")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_entities_map_to_not_found() {
        let dir = TempDir::new().unwrap();
        let app = make_test_app(&dir);

        let request = Request::builder()
            .uri("/v1/catalog/branches/99")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(admin_request("GET", "/v1/admin/products/99", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deactivated_branch_hidden_from_public() {
        let dir = TempDir::new().unwrap();
        let app = make_test_app(&dir);

        let response = app
            .clone()
            .oneshot(admin_request(
                "POST",
                "/v1/admin/branches",
                Some(json!({ "name": "Downtown", "address": "1 Main St" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let branch = body_json(response).await;
        let id = branch["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(admin_request(
                "DELETE",
                &format!("/v1/admin/branches/{}", id),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let request = Request::builder()
            .uri(format!("/v1/catalog/branches/{}", id))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Still visible to the admin surface.
        let response = app
            .clone()
            .oneshot(admin_request(
                "GET",
                &format!("/v1/admin/branches/{}", id),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
