//! Catalog models for the SQLite-backed store.
//!
//! Rows carry integer primary keys; categories and products use unique text
//! slugs for public lookups. Soft deletion is a `deleted_at` timestamp on
//! categories/products and an `is_active` flag on branches/listings.

use serde::{Deserialize, Serialize};

/// Which catalog entity an image belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageOwnerKind {
    Product,
    Category,
}

impl ImageOwnerKind {
    /// Table holding images for this owner kind.
    pub fn table(&self) -> &'static str {
        match self {
            ImageOwnerKind::Product => "product_images",
            ImageOwnerKind::Category => "category_images",
        }
    }

    /// Name of the owning-id column in the image table.
    pub fn owner_column(&self) -> &'static str {
        match self {
            ImageOwnerKind::Product => "product_id",
            ImageOwnerKind::Category => "category_id",
        }
    }
}

/// An image attached to a product or category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogImage {
    pub url: String,
    #[serde(rename = "type")]
    pub image_type: String,
    pub sort_order: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub full_name: Option<String>,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub sort_order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    pub images: Vec<CatalogImage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub full_name: Option<String>,
    pub slug: String,
    pub description: Option<String>,
    pub price: f64,
    pub category_id: i64,
    pub sort_order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    pub images: Vec<CatalogImage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
}

/// A per-branch product listing row.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProduct {
    pub id: i64,
    pub branch_id: i64,
    pub product_id: i64,
    /// Branch-level price override; the product price applies when absent.
    pub price: Option<f64>,
    pub stock: i64,
    pub is_active: bool,
}

/// A product as seen on the storefront: the join of an active listing with
/// its product, carrying the effective price.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorefrontProduct {
    pub branch_product_id: i64,
    pub branch_id: i64,
    pub product_id: i64,
    pub name: String,
    pub full_name: Option<String>,
    pub slug: String,
    pub description: Option<String>,
    /// Listing override when set, otherwise the product price.
    pub price: f64,
    pub stock: i64,
    pub category_id: i64,
    pub category_name: String,
    pub images: Vec<CatalogImage>,
}

// =============================================================================
// Query filters and pagination
// =============================================================================

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// 1-based page selection shared by all list endpoints.
#[derive(Clone, Copy, Debug)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// Clamp page and limit into valid ranges.
    pub fn normalized(self) -> Self {
        PageRequest {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

/// A page of results with the total count for the unpaged filter.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Clone, Debug, Default)]
pub struct CategoryFilter {
    /// Substring match against name and description.
    pub search: Option<String>,
    pub parent_id: Option<i64>,
    pub page: PageRequest,
}

/// Category lookup by id or slug.
#[derive(Clone, Debug)]
pub enum CategorySelector {
    Id(i64),
    Slug(String),
}

#[derive(Clone, Debug, Default)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub category_id: Option<i64>,
    pub include_deleted: bool,
    pub page: PageRequest,
}

#[derive(Clone, Debug, Default)]
pub struct StorefrontFilter {
    pub branch_id: Option<i64>,
    pub search: Option<String>,
    pub category_id: Option<i64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub page: PageRequest,
}

/// Storefront item lookup, by listing id or product slug.
#[derive(Clone, Debug)]
pub enum StorefrontSelector {
    BranchProductId(i64),
    ProductSlug {
        slug: String,
        branch_id: Option<i64>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct BranchProductFilter {
    pub branch_id: Option<i64>,
    pub product_id: Option<i64>,
    pub include_inactive: bool,
    pub page: PageRequest,
}

// =============================================================================
// Write payloads
// =============================================================================

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    pub full_name: Option<String>,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub sort_order: i64,
}

/// Partial category update; absent fields keep their value. A `parent_id`
/// of 0 clears the parent.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryUpdate {
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub sort_order: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub full_name: Option<String>,
    pub slug: String,
    pub description: Option<String>,
    pub price: f64,
    pub category_id: i64,
    #[serde(default)]
    pub sort_order: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub category_id: Option<i64>,
    pub sort_order: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBranch {
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBranchProduct {
    pub branch_id: i64,
    pub product_id: i64,
    pub price: Option<f64>,
    #[serde(default)]
    pub stock: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchProductUpdate {
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub is_active: Option<bool>,
}

/// Entity counts reported by the metrics gauges.
#[derive(Clone, Copy, Debug, Default)]
pub struct CatalogCounts {
    pub categories: i64,
    pub products: i64,
    pub branches: i64,
    pub branch_products: i64,
}

/// Typed store errors, mapped to HTTP statuses at the route layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}
