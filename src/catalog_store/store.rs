//! SQLite-backed catalog store implementation.
//!
//! A single write connection serializes all mutations; reads go through a
//! small round-robin pool of read-only connections over the same WAL db.

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::{CatalogStore, StoreResult};
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, ToSql};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub struct SqliteCatalogStore {
    read_pool: Vec<Arc<Mutex<Connection>>>,
    write_conn: Arc<Mutex<Connection>>,
    read_index: Arc<AtomicUsize>,
}

fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    let latest_version = CATALOG_VERSIONED_SCHEMAS.len() - 1;
    let latest_schema = &CATALOG_VERSIONED_SCHEMAS[latest_version];

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if table_count == 0 {
        info!("Creating catalog db schema at version {}", latest_version);
        latest_schema.create(conn)?;
        return Ok(());
    }

    if db_version < BASE_DB_VERSION as i64 {
        anyhow::bail!(
            "Database at {:?} does not look like a catalog db (user_version = {})",
            conn.path(),
            db_version
        );
    }

    let mut current_version = (db_version - BASE_DB_VERSION as i64) as usize;
    if current_version >= latest_version {
        latest_schema.validate(conn)?;
        return Ok(());
    }

    let tx = conn.transaction()?;
    for schema in CATALOG_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
        if let Some(migration_fn) = schema.migration {
            info!(
                "Migrating catalog db from version {} to {}",
                current_version, schema.version
            );
            migration_fn(&tx)?;
            current_version = schema.version;
        }
    }
    tx.pragma_update(None, "user_version", BASE_DB_VERSION + current_version)?;
    tx.commit()?;
    Ok(())
}

/// Table holding the rows an image owner kind points at.
fn owner_table(kind: ImageOwnerKind) -> &'static str {
    match kind {
        ImageOwnerKind::Product => "products",
        ImageOwnerKind::Category => "categories",
    }
}

/// Translate a constraint violation on insert/update into a Conflict.
fn translate_constraint(e: rusqlite::Error, conflict_message: &str) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(conflict_message.to_string())
        }
        _ => StoreError::Database(e),
    }
}

/// Slugs are lowercase alphanumeric segments joined by single hyphens.
fn validate_slug(slug: &str) -> Result<(), StoreError> {
    let well_formed = !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(StoreError::Invalid(format!("malformed slug '{}'", slug)))
    }
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open catalog database")?;

        migrate_if_needed(&mut write_conn)?;

        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        write_conn.pragma_update(None, "foreign_keys", "ON")?;

        let category_count: i64 = write_conn
            .query_row(
                "SELECT COUNT(*) FROM categories WHERE deleted_at IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        let product_count: i64 = write_conn
            .query_row(
                "SELECT COUNT(*) FROM products WHERE deleted_at IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap_or(0);
        let branch_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM branches WHERE is_active = 1", [], |r| {
                r.get(0)
            })
            .unwrap_or(0);

        info!(
            "Opened shop catalog: {} categories, {} products, {} branches",
            category_count, product_count, branch_count
        );

        let mut read_pool = Vec::with_capacity(read_pool_size);
        for _ in 0..read_pool_size {
            let read_conn = Connection::open_with_flags(
                db_path_ref,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_conn.pragma_update(None, "journal_mode", "WAL")?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(SqliteCatalogStore {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
            read_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn get_read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    // =========================================================================
    // Internal row helpers
    // =========================================================================

    fn images_for(
        conn: &Connection,
        kind: ImageOwnerKind,
        owner_id: i64,
    ) -> rusqlite::Result<Vec<CatalogImage>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT url, type, sort_order FROM {} WHERE {} = ?1 ORDER BY sort_order, id",
            kind.table(),
            kind.owner_column()
        ))?;
        let images = stmt
            .query_map(params![owner_id], |row| {
                Ok(CatalogImage {
                    url: row.get(0)?,
                    image_type: row.get(1)?,
                    sort_order: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    /// Columns: id, name, full_name, slug, description, parent_id, sort_order, deleted_at
    fn parse_category_row(row: &rusqlite::Row, images: Vec<CatalogImage>) -> rusqlite::Result<Category> {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            full_name: row.get(2)?,
            slug: row.get(3)?,
            description: row.get(4)?,
            parent_id: row.get(5)?,
            sort_order: row.get(6)?,
            deleted_at: row.get(7)?,
            images,
        })
    }

    /// Columns: id, name, full_name, slug, description, price, category_id,
    /// sort_order, deleted_at
    fn parse_product_row(row: &rusqlite::Row, images: Vec<CatalogImage>) -> rusqlite::Result<Product> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            full_name: row.get(2)?,
            slug: row.get(3)?,
            description: row.get(4)?,
            price: row.get(5)?,
            category_id: row.get(6)?,
            sort_order: row.get(7)?,
            deleted_at: row.get(8)?,
            images,
        })
    }

    /// Columns: id, name, description, address, city, region, phone, is_active
    fn parse_branch_row(row: &rusqlite::Row) -> rusqlite::Result<Branch> {
        Ok(Branch {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            address: row.get(3)?,
            city: row.get(4)?,
            region: row.get(5)?,
            phone: row.get(6)?,
            is_active: row.get::<_, i64>(7)? != 0,
        })
    }

    /// Columns: id, branch_id, product_id, price, stock, is_active
    fn parse_branch_product_row(row: &rusqlite::Row) -> rusqlite::Result<BranchProduct> {
        Ok(BranchProduct {
            id: row.get(0)?,
            branch_id: row.get(1)?,
            product_id: row.get(2)?,
            price: row.get(3)?,
            stock: row.get(4)?,
            is_active: row.get::<_, i64>(5)? != 0,
        })
    }

    fn category_by_id(conn: &Connection, id: i64) -> StoreResult<Option<Category>> {
        let row = conn.query_row(
            "SELECT id, name, full_name, slug, description, parent_id, sort_order, deleted_at
             FROM categories WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            |row| Self::parse_category_row(row, vec![]),
        );
        match row {
            Ok(mut category) => {
                category.images = Self::images_for(conn, ImageOwnerKind::Category, category.id)?;
                Ok(Some(category))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn product_by_id(conn: &Connection, id: i64) -> StoreResult<Option<Product>> {
        let row = conn.query_row(
            "SELECT id, name, full_name, slug, description, price, category_id, sort_order, deleted_at
             FROM products WHERE id = ?1",
            params![id],
            |row| Self::parse_product_row(row, vec![]),
        );
        match row {
            Ok(mut product) => {
                product.images = Self::images_for(conn, ImageOwnerKind::Product, product.id)?;
                Ok(Some(product))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn branch_by_id(conn: &Connection, id: i64) -> StoreResult<Option<Branch>> {
        match conn.query_row(
            "SELECT id, name, description, address, city, region, phone, is_active
             FROM branches WHERE id = ?1",
            params![id],
            Self::parse_branch_row,
        ) {
            Ok(branch) => Ok(Some(branch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn branch_product_by_id(conn: &Connection, id: i64) -> StoreResult<Option<BranchProduct>> {
        match conn.query_row(
            "SELECT id, branch_id, product_id, price, stock, is_active
             FROM branch_products WHERE id = ?1",
            params![id],
            Self::parse_branch_product_row,
        ) {
            Ok(listing) => Ok(Some(listing)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Parent id must reference a live category; 0 clears the parent.
    fn resolve_parent_id(
        conn: &Connection,
        parent_id: Option<i64>,
        own_id: Option<i64>,
    ) -> StoreResult<Option<i64>> {
        match parent_id {
            None | Some(0) => Ok(None),
            Some(pid) => {
                if own_id == Some(pid) {
                    return Err(StoreError::Invalid(
                        "a category cannot be its own parent".to_string(),
                    ));
                }
                let exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM categories WHERE id = ?1 AND deleted_at IS NULL",
                        params![pid],
                        |_| Ok(true),
                    )
                    .unwrap_or(false);
                if exists {
                    Ok(Some(pid))
                } else {
                    Err(StoreError::NotFound("parent category"))
                }
            }
        }
    }

    fn live_category_exists(conn: &Connection, id: i64) -> bool {
        conn.query_row(
            "SELECT 1 FROM categories WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            |_| Ok(true),
        )
        .unwrap_or(false)
    }
}

impl CatalogStore for SqliteCatalogStore {
    // =========================================================================
    // Categories
    // =========================================================================

    fn list_categories(&self, filter: &CategoryFilter) -> StoreResult<Page<Category>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();

        let mut where_sql = String::from("WHERE deleted_at IS NULL");
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(search) = &filter.search {
            where_sql.push_str(&format!(
                " AND (name LIKE ?{n} OR description LIKE ?{n})",
                n = bound.len() + 1
            ));
            bound.push(Box::new(format!("%{}%", search)));
        }
        if let Some(parent_id) = filter.parent_id {
            where_sql.push_str(&format!(" AND parent_id = ?{}", bound.len() + 1));
            bound.push(Box::new(parent_id));
        }

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM categories {}", where_sql),
            params_from_iter(&bound),
            |r| r.get(0),
        )?;

        let page = filter.page.normalized();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, full_name, slug, description, parent_id, sort_order, deleted_at
             FROM categories {} ORDER BY sort_order, id LIMIT ?{} OFFSET ?{}",
            where_sql,
            bound.len() + 1,
            bound.len() + 2
        ))?;
        bound.push(Box::new(page.limit));
        bound.push(Box::new(page.offset()));

        let mut items = stmt
            .query_map(params_from_iter(&bound), |row| {
                Self::parse_category_row(row, vec![])
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for category in &mut items {
            category.images = Self::images_for(&conn, ImageOwnerKind::Category, category.id)?;
        }

        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    fn get_category(&self, selector: &CategorySelector) -> StoreResult<Option<Category>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        match selector {
            CategorySelector::Id(id) => Self::category_by_id(&conn, *id),
            CategorySelector::Slug(slug) => {
                let id: Option<i64> = match conn.query_row(
                    "SELECT id FROM categories WHERE slug = ?1 AND deleted_at IS NULL",
                    params![slug],
                    |r| r.get(0),
                ) {
                    Ok(id) => Some(id),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e.into()),
                };
                match id {
                    Some(id) => Self::category_by_id(&conn, id),
                    None => Ok(None),
                }
            }
        }
    }

    fn create_category(&self, new: &NewCategory) -> StoreResult<Category> {
        validate_slug(&new.slug)?;
        let conn = self.write_conn.lock().unwrap();
        let parent_id = Self::resolve_parent_id(&conn, new.parent_id, None)?;

        conn.execute(
            "INSERT INTO categories (name, full_name, slug, description, parent_id, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.name,
                new.full_name,
                new.slug,
                new.description,
                parent_id,
                new.sort_order
            ],
        )
        .map_err(|e| translate_constraint(e, &format!("slug '{}' already in use", new.slug)))?;

        let id = conn.last_insert_rowid();
        Self::category_by_id(&conn, id)?.ok_or(StoreError::NotFound("category"))
    }

    fn update_category(&self, id: i64, update: &CategoryUpdate) -> StoreResult<Category> {
        let conn = self.write_conn.lock().unwrap();
        let current = Self::category_by_id(&conn, id)?.ok_or(StoreError::NotFound("category"))?;

        let slug = update.slug.clone().unwrap_or(current.slug);
        validate_slug(&slug)?;
        let parent_id = match update.parent_id {
            None => current.parent_id,
            some => Self::resolve_parent_id(&conn, some, Some(id))?,
        };

        conn.execute(
            "UPDATE categories
             SET name = ?1, full_name = ?2, slug = ?3, description = ?4, parent_id = ?5, sort_order = ?6
             WHERE id = ?7",
            params![
                update.name.clone().unwrap_or(current.name),
                update.full_name.clone().or(current.full_name),
                slug,
                update.description.clone().or(current.description),
                parent_id,
                update.sort_order.unwrap_or(current.sort_order),
                id
            ],
        )
        .map_err(|e| translate_constraint(e, &format!("slug '{}' already in use", slug)))?;

        Self::category_by_id(&conn, id)?.ok_or(StoreError::NotFound("category"))
    }

    fn delete_category(&self, id: i64) -> StoreResult<()> {
        let conn = self.write_conn.lock().unwrap();
        if !Self::live_category_exists(&conn, id) {
            return Err(StoreError::NotFound("category"));
        }

        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| -> StoreResult<()> {
            conn.execute(
                "UPDATE categories SET deleted_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )?;
            // Children survive their parent, detached to the root level
            conn.execute(
                "UPDATE categories SET parent_id = NULL WHERE parent_id = ?1",
                params![id],
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Products
    // =========================================================================

    fn list_products(&self, filter: &ProductFilter) -> StoreResult<Page<Product>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();

        let mut where_sql = if filter.include_deleted {
            String::from("WHERE 1=1")
        } else {
            String::from("WHERE deleted_at IS NULL")
        };
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(search) = &filter.search {
            where_sql.push_str(&format!(
                " AND (name LIKE ?{n} OR description LIKE ?{n})",
                n = bound.len() + 1
            ));
            bound.push(Box::new(format!("%{}%", search)));
        }
        if let Some(category_id) = filter.category_id {
            where_sql.push_str(&format!(" AND category_id = ?{}", bound.len() + 1));
            bound.push(Box::new(category_id));
        }

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM products {}", where_sql),
            params_from_iter(&bound),
            |r| r.get(0),
        )?;

        let page = filter.page.normalized();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, full_name, slug, description, price, category_id, sort_order, deleted_at
             FROM products {} ORDER BY sort_order, id LIMIT ?{} OFFSET ?{}",
            where_sql,
            bound.len() + 1,
            bound.len() + 2
        ))?;
        bound.push(Box::new(page.limit));
        bound.push(Box::new(page.offset()));

        let mut items = stmt
            .query_map(params_from_iter(&bound), |row| {
                Self::parse_product_row(row, vec![])
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for product in &mut items {
            product.images = Self::images_for(&conn, ImageOwnerKind::Product, product.id)?;
        }

        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    fn get_product(&self, id: i64) -> StoreResult<Option<Product>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        Self::product_by_id(&conn, id)
    }

    fn create_product(&self, new: &NewProduct) -> StoreResult<Product> {
        validate_slug(&new.slug)?;
        let conn = self.write_conn.lock().unwrap();
        if !Self::live_category_exists(&conn, new.category_id) {
            return Err(StoreError::NotFound("category"));
        }

        conn.execute(
            "INSERT INTO products (name, full_name, slug, description, price, category_id, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.name,
                new.full_name,
                new.slug,
                new.description,
                new.price,
                new.category_id,
                new.sort_order
            ],
        )
        .map_err(|e| translate_constraint(e, &format!("slug '{}' already in use", new.slug)))?;

        let id = conn.last_insert_rowid();
        Self::product_by_id(&conn, id)?.ok_or(StoreError::NotFound("product"))
    }

    fn update_product(&self, id: i64, update: &ProductUpdate) -> StoreResult<Product> {
        let conn = self.write_conn.lock().unwrap();
        let current = Self::product_by_id(&conn, id)?
            .filter(|p| p.deleted_at.is_none())
            .ok_or(StoreError::NotFound("product"))?;

        let slug = update.slug.clone().unwrap_or(current.slug);
        validate_slug(&slug)?;
        let category_id = update.category_id.unwrap_or(current.category_id);
        if !Self::live_category_exists(&conn, category_id) {
            return Err(StoreError::NotFound("category"));
        }

        conn.execute(
            "UPDATE products
             SET name = ?1, full_name = ?2, slug = ?3, description = ?4, price = ?5,
                 category_id = ?6, sort_order = ?7
             WHERE id = ?8",
            params![
                update.name.clone().unwrap_or(current.name),
                update.full_name.clone().or(current.full_name),
                slug,
                update.description.clone().or(current.description),
                update.price.unwrap_or(current.price),
                category_id,
                update.sort_order.unwrap_or(current.sort_order),
                id
            ],
        )
        .map_err(|e| translate_constraint(e, &format!("slug '{}' already in use", slug)))?;

        Self::product_by_id(&conn, id)?.ok_or(StoreError::NotFound("product"))
    }

    fn delete_product(&self, id: i64) -> StoreResult<()> {
        let conn = self.write_conn.lock().unwrap();
        let live: bool = conn
            .query_row(
                "SELECT 1 FROM products WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !live {
            return Err(StoreError::NotFound("product"));
        }

        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| -> StoreResult<()> {
            conn.execute(
                "UPDATE products SET deleted_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )?;
            conn.execute(
                "UPDATE branch_products SET is_active = 0 WHERE product_id = ?1 AND is_active = 1",
                params![id],
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    // =========================================================================
    // Storefront
    // =========================================================================

    fn list_storefront_products(
        &self,
        filter: &StorefrontFilter,
    ) -> StoreResult<Page<StorefrontProduct>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();

        let mut where_sql = String::from(
            "WHERE bp.is_active = 1 AND b.is_active = 1
             AND p.deleted_at IS NULL AND c.deleted_at IS NULL",
        );
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(branch_id) = filter.branch_id {
            where_sql.push_str(&format!(" AND bp.branch_id = ?{}", bound.len() + 1));
            bound.push(Box::new(branch_id));
        }
        if let Some(search) = &filter.search {
            where_sql.push_str(&format!(
                " AND (p.name LIKE ?{n} OR p.description LIKE ?{n})",
                n = bound.len() + 1
            ));
            bound.push(Box::new(format!("%{}%", search)));
        }
        if let Some(category_id) = filter.category_id {
            where_sql.push_str(&format!(" AND p.category_id = ?{}", bound.len() + 1));
            bound.push(Box::new(category_id));
        }
        if let Some(min_price) = filter.min_price {
            where_sql.push_str(&format!(
                " AND COALESCE(bp.price, p.price) >= ?{}",
                bound.len() + 1
            ));
            bound.push(Box::new(min_price));
        }
        if let Some(max_price) = filter.max_price {
            where_sql.push_str(&format!(
                " AND COALESCE(bp.price, p.price) <= ?{}",
                bound.len() + 1
            ));
            bound.push(Box::new(max_price));
        }

        const FROM_SQL: &str = "FROM branch_products bp
             JOIN branches b ON b.id = bp.branch_id
             JOIN products p ON p.id = bp.product_id
             JOIN categories c ON c.id = p.category_id";

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) {} {}", FROM_SQL, where_sql),
            params_from_iter(&bound),
            |r| r.get(0),
        )?;

        let page = filter.page.normalized();
        let mut stmt = conn.prepare(&format!(
            "SELECT bp.id, bp.branch_id, p.id, p.name, p.full_name, p.slug, p.description,
                    COALESCE(bp.price, p.price), bp.stock, c.id, c.name
             {} {} ORDER BY p.sort_order, p.id, bp.id LIMIT ?{} OFFSET ?{}",
            FROM_SQL,
            where_sql,
            bound.len() + 1,
            bound.len() + 2
        ))?;
        bound.push(Box::new(page.limit));
        bound.push(Box::new(page.offset()));

        let mut items = stmt
            .query_map(params_from_iter(&bound), |row| {
                Ok(StorefrontProduct {
                    branch_product_id: row.get(0)?,
                    branch_id: row.get(1)?,
                    product_id: row.get(2)?,
                    name: row.get(3)?,
                    full_name: row.get(4)?,
                    slug: row.get(5)?,
                    description: row.get(6)?,
                    price: row.get(7)?,
                    stock: row.get(8)?,
                    category_id: row.get(9)?,
                    category_name: row.get(10)?,
                    images: vec![],
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for item in &mut items {
            item.images = Self::images_for(&conn, ImageOwnerKind::Product, item.product_id)?;
        }

        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    fn get_storefront_product(
        &self,
        selector: &StorefrontSelector,
    ) -> StoreResult<Option<StorefrontProduct>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();

        let base_sql = "SELECT bp.id, bp.branch_id, p.id, p.name, p.full_name, p.slug, p.description,
                    COALESCE(bp.price, p.price), bp.stock, c.id, c.name
             FROM branch_products bp
             JOIN branches b ON b.id = bp.branch_id
             JOIN products p ON p.id = bp.product_id
             JOIN categories c ON c.id = p.category_id
             WHERE bp.is_active = 1 AND b.is_active = 1
             AND p.deleted_at IS NULL AND c.deleted_at IS NULL";

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<StorefrontProduct> {
            Ok(StorefrontProduct {
                branch_product_id: row.get(0)?,
                branch_id: row.get(1)?,
                product_id: row.get(2)?,
                name: row.get(3)?,
                full_name: row.get(4)?,
                slug: row.get(5)?,
                description: row.get(6)?,
                price: row.get(7)?,
                stock: row.get(8)?,
                category_id: row.get(9)?,
                category_name: row.get(10)?,
                images: vec![],
            })
        };

        let found = match selector {
            StorefrontSelector::BranchProductId(id) => conn.query_row(
                &format!("{} AND bp.id = ?1", base_sql),
                params![id],
                map_row,
            ),
            StorefrontSelector::ProductSlug { slug, branch_id } => match branch_id {
                Some(branch_id) => conn.query_row(
                    &format!("{} AND p.slug = ?1 AND bp.branch_id = ?2 LIMIT 1", base_sql),
                    params![slug, branch_id],
                    map_row,
                ),
                None => conn.query_row(
                    &format!("{} AND p.slug = ?1 LIMIT 1", base_sql),
                    params![slug],
                    map_row,
                ),
            },
        };

        match found {
            Ok(mut item) => {
                item.images = Self::images_for(&conn, ImageOwnerKind::Product, item.product_id)?;
                Ok(Some(item))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Branches
    // =========================================================================

    fn list_branches(&self, include_inactive: bool) -> StoreResult<Vec<Branch>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        let where_sql = if include_inactive {
            ""
        } else {
            "WHERE is_active = 1"
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT id, name, description, address, city, region, phone, is_active
             FROM branches {} ORDER BY id",
            where_sql
        ))?;
        let branches = stmt
            .query_map([], Self::parse_branch_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(branches)
    }

    fn get_branch(&self, id: i64) -> StoreResult<Option<Branch>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        Self::branch_by_id(&conn, id)
    }

    fn create_branch(&self, new: &NewBranch) -> StoreResult<Branch> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO branches (name, description, address, city, region, phone)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.name,
                new.description,
                new.address,
                new.city,
                new.region,
                new.phone
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::branch_by_id(&conn, id)?.ok_or(StoreError::NotFound("branch"))
    }

    fn update_branch(&self, id: i64, update: &BranchUpdate) -> StoreResult<Branch> {
        let conn = self.write_conn.lock().unwrap();
        let current = Self::branch_by_id(&conn, id)?.ok_or(StoreError::NotFound("branch"))?;

        conn.execute(
            "UPDATE branches
             SET name = ?1, description = ?2, address = ?3, city = ?4, region = ?5,
                 phone = ?6, is_active = ?7
             WHERE id = ?8",
            params![
                update.name.clone().unwrap_or(current.name),
                update.description.clone().or(current.description),
                update.address.clone().unwrap_or(current.address),
                update.city.clone().or(current.city),
                update.region.clone().or(current.region),
                update.phone.clone().or(current.phone),
                update.is_active.unwrap_or(current.is_active),
                id
            ],
        )?;
        Self::branch_by_id(&conn, id)?.ok_or(StoreError::NotFound("branch"))
    }

    fn delete_branch(&self, id: i64) -> StoreResult<()> {
        let conn = self.write_conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE branches SET is_active = 0 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("branch"));
        }
        Ok(())
    }

    // =========================================================================
    // Branch products
    // =========================================================================

    fn list_branch_products(
        &self,
        filter: &BranchProductFilter,
    ) -> StoreResult<Page<BranchProduct>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();

        let mut where_sql = if filter.include_inactive {
            String::from("WHERE 1=1")
        } else {
            String::from("WHERE is_active = 1")
        };
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(branch_id) = filter.branch_id {
            where_sql.push_str(&format!(" AND branch_id = ?{}", bound.len() + 1));
            bound.push(Box::new(branch_id));
        }
        if let Some(product_id) = filter.product_id {
            where_sql.push_str(&format!(" AND product_id = ?{}", bound.len() + 1));
            bound.push(Box::new(product_id));
        }

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM branch_products {}", where_sql),
            params_from_iter(&bound),
            |r| r.get(0),
        )?;

        let page = filter.page.normalized();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, branch_id, product_id, price, stock, is_active
             FROM branch_products {} ORDER BY id LIMIT ?{} OFFSET ?{}",
            where_sql,
            bound.len() + 1,
            bound.len() + 2
        ))?;
        bound.push(Box::new(page.limit));
        bound.push(Box::new(page.offset()));

        let items = stmt
            .query_map(params_from_iter(&bound), Self::parse_branch_product_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    fn get_branch_product(&self, id: i64) -> StoreResult<Option<BranchProduct>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        Self::branch_product_by_id(&conn, id)
    }

    fn create_branch_product(&self, new: &NewBranchProduct) -> StoreResult<BranchProduct> {
        let conn = self.write_conn.lock().unwrap();

        let branch_live: bool = conn
            .query_row(
                "SELECT 1 FROM branches WHERE id = ?1 AND is_active = 1",
                params![new.branch_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !branch_live {
            return Err(StoreError::NotFound("branch"));
        }
        let product_live: bool = conn
            .query_row(
                "SELECT 1 FROM products WHERE id = ?1 AND deleted_at IS NULL",
                params![new.product_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !product_live {
            return Err(StoreError::NotFound("product"));
        }

        conn.execute(
            "INSERT INTO branch_products (branch_id, product_id, price, stock)
             VALUES (?1, ?2, ?3, ?4)",
            params![new.branch_id, new.product_id, new.price, new.stock],
        )
        .map_err(|e| {
            translate_constraint(e, "listing for this branch and product already exists")
        })?;

        let id = conn.last_insert_rowid();
        Self::branch_product_by_id(&conn, id)?.ok_or(StoreError::NotFound("branch product"))
    }

    fn update_branch_product(
        &self,
        id: i64,
        update: &BranchProductUpdate,
    ) -> StoreResult<BranchProduct> {
        let conn = self.write_conn.lock().unwrap();
        let current =
            Self::branch_product_by_id(&conn, id)?.ok_or(StoreError::NotFound("branch product"))?;

        conn.execute(
            "UPDATE branch_products SET price = ?1, stock = ?2, is_active = ?3 WHERE id = ?4",
            params![
                update.price.or(current.price),
                update.stock.unwrap_or(current.stock),
                update.is_active.unwrap_or(current.is_active),
                id
            ],
        )?;
        Self::branch_product_by_id(&conn, id)?.ok_or(StoreError::NotFound("branch product"))
    }

    fn delete_branch_product(&self, id: i64) -> StoreResult<()> {
        let conn = self.write_conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE branch_products SET is_active = 0 WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound("branch product"));
        }
        Ok(())
    }

    // =========================================================================
    // Image rows
    // =========================================================================

    fn image_owner_exists(&self, kind: ImageOwnerKind, owner_id: i64) -> StoreResult<bool> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        let exists = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", owner_table(kind)),
                params![owner_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        Ok(exists)
    }

    fn find_image(
        &self,
        kind: ImageOwnerKind,
        owner_id: i64,
        url: &str,
        image_type: &str,
    ) -> StoreResult<Option<CatalogImage>> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        match conn.query_row(
            &format!(
                "SELECT url, type, sort_order FROM {} WHERE {} = ?1 AND url = ?2 AND type = ?3",
                kind.table(),
                kind.owner_column()
            ),
            params![owner_id, url, image_type],
            |row| {
                Ok(CatalogImage {
                    url: row.get(0)?,
                    image_type: row.get(1)?,
                    sort_order: row.get(2)?,
                })
            },
        ) {
            Ok(image) => Ok(Some(image)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn insert_image(
        &self,
        kind: ImageOwnerKind,
        owner_id: i64,
        url: &str,
        image_type: &str,
    ) -> StoreResult<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, url, type, sort_order) VALUES (?1, ?2, ?3, 0)",
                kind.table(),
                kind.owner_column()
            ),
            params![owner_id, url, image_type],
        )?;
        Ok(())
    }

    fn delete_images_exact(
        &self,
        kind: ImageOwnerKind,
        owner_id: i64,
        url: &str,
        image_type: &str,
    ) -> StoreResult<usize> {
        let conn = self.write_conn.lock().unwrap();
        let removed = conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1 AND url = ?2 AND type = ?3",
                kind.table(),
                kind.owner_column()
            ),
            params![owner_id, url, image_type],
        )?;
        Ok(removed)
    }

    fn delete_images_by_url(
        &self,
        kind: ImageOwnerKind,
        owner_id: i64,
        url: &str,
    ) -> StoreResult<usize> {
        let conn = self.write_conn.lock().unwrap();
        let removed = conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1 AND url = ?2",
                kind.table(),
                kind.owner_column()
            ),
            params![owner_id, url],
        )?;
        Ok(removed)
    }

    // =========================================================================
    // Counts
    // =========================================================================

    fn counts(&self) -> StoreResult<CatalogCounts> {
        let read_conn = self.get_read_conn();
        let conn = read_conn.lock().unwrap();
        let categories: i64 = conn.query_row(
            "SELECT COUNT(*) FROM categories WHERE deleted_at IS NULL",
            [],
            |r| r.get(0),
        )?;
        let products: i64 = conn.query_row(
            "SELECT COUNT(*) FROM products WHERE deleted_at IS NULL",
            [],
            |r| r.get(0),
        )?;
        let branches: i64 = conn.query_row(
            "SELECT COUNT(*) FROM branches WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?;
        let branch_products: i64 = conn.query_row(
            "SELECT COUNT(*) FROM branch_products WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?;
        Ok(CatalogCounts {
            categories,
            products,
            branches,
            branch_products,
        })
    }
}
