//! SQLite schema definitions for the shop catalog database.
//!
//! Categories and products are soft-deleted through `deleted_at`; branches
//! and branch listings are deactivated through `is_active`. Image tables hold
//! CDN URLs pushed by the external image service.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const CATEGORIES_TABLE: Table = Table {
    name: "categories",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("full_name", &SqlType::Text),
        sqlite_column!("slug", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("parent_id", &SqlType::Integer),
        sqlite_column!(
            "sort_order",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("deleted_at", &SqlType::Text), // RFC 3339, NULL when live
    ],
    indices: &[
        ("idx_categories_slug", "slug"),
        ("idx_categories_parent", "parent_id"),
    ],
    unique_constraints: &[&["slug"]],
};

const CATEGORY_FK: ForeignKey = ForeignKey {
    foreign_table: "categories",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Restrict,
};

const PRODUCTS_TABLE: Table = Table {
    name: "products",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("full_name", &SqlType::Text),
        sqlite_column!("slug", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("price", &SqlType::Real, non_null = true),
        sqlite_column!(
            "category_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&CATEGORY_FK)
        ),
        sqlite_column!(
            "sort_order",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("deleted_at", &SqlType::Text),
    ],
    indices: &[
        ("idx_products_slug", "slug"),
        ("idx_products_category", "category_id"),
    ],
    unique_constraints: &[&["slug"]],
};

const BRANCHES_TABLE: Table = Table {
    name: "branches",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("address", &SqlType::Text, non_null = true),
        sqlite_column!("city", &SqlType::Text),
        sqlite_column!("region", &SqlType::Text),
        sqlite_column!("phone", &SqlType::Text),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
    ],
    indices: &[("idx_branches_active", "is_active")],
    unique_constraints: &[],
};

const BRANCH_FK: ForeignKey = ForeignKey {
    foreign_table: "branches",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const PRODUCT_FK: ForeignKey = ForeignKey {
    foreign_table: "products",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const BRANCH_PRODUCTS_TABLE: Table = Table {
    name: "branch_products",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "branch_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&BRANCH_FK)
        ),
        sqlite_column!(
            "product_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PRODUCT_FK)
        ),
        sqlite_column!("price", &SqlType::Real), // NULL falls back to the product price
        sqlite_column!(
            "stock",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
    ],
    indices: &[
        ("idx_branch_products_branch", "branch_id"),
        ("idx_branch_products_product", "product_id"),
    ],
    unique_constraints: &[&["branch_id", "product_id"]],
};

// Image rows are written by the async image-event consumer. There is
// deliberately no unique constraint on (owner, url, type); duplicates are
// avoided by a lookup before insert.
const PRODUCT_IMAGES_TABLE: Table = Table {
    name: "product_images",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "product_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PRODUCT_FK)
        ),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!(
            "type",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'default'")
        ),
        sqlite_column!(
            "sort_order",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_product_images_product", "product_id")],
    unique_constraints: &[],
};

const CATEGORY_IMAGES_TABLE: Table = Table {
    name: "category_images",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "category_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&CATEGORY_FK)
        ),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!(
            "type",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'default'")
        ),
        sqlite_column!(
            "sort_order",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_category_images_category", "category_id")],
    unique_constraints: &[],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        CATEGORIES_TABLE,
        PRODUCTS_TABLE,
        BRANCHES_TABLE,
        BRANCH_PRODUCTS_TABLE,
        PRODUCT_IMAGES_TABLE,
        CATEGORY_IMAGES_TABLE,
    ],
    migration: None,
}];
