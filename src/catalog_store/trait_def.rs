//! CatalogStore trait definition.
//!
//! The trait is the seam between the HTTP layer, the image-event consumer
//! and the storage backend, and is what test doubles implement.

use super::models::*;

pub type StoreResult<T> = Result<T, StoreError>;

/// Catalog storage backend.
pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Categories
    // =========================================================================

    /// List non-deleted categories matching the filter, ordered by sort_order.
    fn list_categories(&self, filter: &CategoryFilter) -> StoreResult<Page<Category>>;

    /// Get a non-deleted category by id or slug.
    fn get_category(&self, selector: &CategorySelector) -> StoreResult<Option<Category>>;

    fn create_category(&self, new: &NewCategory) -> StoreResult<Category>;

    fn update_category(&self, id: i64, update: &CategoryUpdate) -> StoreResult<Category>;

    /// Soft-delete a category and detach its children in one transaction.
    fn delete_category(&self, id: i64) -> StoreResult<()>;

    // =========================================================================
    // Products (admin view)
    // =========================================================================

    fn list_products(&self, filter: &ProductFilter) -> StoreResult<Page<Product>>;

    /// Get a product by id, regardless of deletion state.
    fn get_product(&self, id: i64) -> StoreResult<Option<Product>>;

    fn create_product(&self, new: &NewProduct) -> StoreResult<Product>;

    fn update_product(&self, id: i64, update: &ProductUpdate) -> StoreResult<Product>;

    /// Soft-delete a product and deactivate its listings in one transaction.
    fn delete_product(&self, id: i64) -> StoreResult<()>;

    // =========================================================================
    // Storefront (public read surface over active listings)
    // =========================================================================

    fn list_storefront_products(
        &self,
        filter: &StorefrontFilter,
    ) -> StoreResult<Page<StorefrontProduct>>;

    fn get_storefront_product(
        &self,
        selector: &StorefrontSelector,
    ) -> StoreResult<Option<StorefrontProduct>>;

    // =========================================================================
    // Branches
    // =========================================================================

    fn list_branches(&self, include_inactive: bool) -> StoreResult<Vec<Branch>>;

    fn get_branch(&self, id: i64) -> StoreResult<Option<Branch>>;

    fn create_branch(&self, new: &NewBranch) -> StoreResult<Branch>;

    fn update_branch(&self, id: i64, update: &BranchUpdate) -> StoreResult<Branch>;

    /// Deactivate a branch.
    fn delete_branch(&self, id: i64) -> StoreResult<()>;

    // =========================================================================
    // Branch products
    // =========================================================================

    fn list_branch_products(
        &self,
        filter: &BranchProductFilter,
    ) -> StoreResult<Page<BranchProduct>>;

    fn get_branch_product(&self, id: i64) -> StoreResult<Option<BranchProduct>>;

    fn create_branch_product(&self, new: &NewBranchProduct) -> StoreResult<BranchProduct>;

    fn update_branch_product(
        &self,
        id: i64,
        update: &BranchProductUpdate,
    ) -> StoreResult<BranchProduct>;

    /// Deactivate a listing.
    fn delete_branch_product(&self, id: i64) -> StoreResult<()>;

    // =========================================================================
    // Image rows (used by the image-event consumer)
    // =========================================================================

    /// Whether a row with this id exists for the owner kind. Deletion state
    /// is not considered, a soft-deleted owner still accepts images.
    fn image_owner_exists(&self, kind: ImageOwnerKind, owner_id: i64) -> StoreResult<bool>;

    /// Find an image by its exact (owner, url, type) triple.
    fn find_image(
        &self,
        kind: ImageOwnerKind,
        owner_id: i64,
        url: &str,
        image_type: &str,
    ) -> StoreResult<Option<CatalogImage>>;

    /// Insert an image row with sort_order 0.
    fn insert_image(
        &self,
        kind: ImageOwnerKind,
        owner_id: i64,
        url: &str,
        image_type: &str,
    ) -> StoreResult<()>;

    /// Delete rows matching the exact (owner, url, type) triple.
    /// Returns the number of rows removed.
    fn delete_images_exact(
        &self,
        kind: ImageOwnerKind,
        owner_id: i64,
        url: &str,
        image_type: &str,
    ) -> StoreResult<usize>;

    /// Delete rows matching (owner, url) regardless of type.
    /// Returns the number of rows removed.
    fn delete_images_by_url(
        &self,
        kind: ImageOwnerKind,
        owner_id: i64,
        url: &str,
    ) -> StoreResult<usize>;

    // =========================================================================
    // Counts (for metrics)
    // =========================================================================

    fn counts(&self) -> StoreResult<CatalogCounts>;
}
