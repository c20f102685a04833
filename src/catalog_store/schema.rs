//! SQLite schema definitions for the lego catalog database.
//!
//! Every entity has an integer rowid primary key. Shapes and sets carry the
//! Rebrickable catalog id as a unique text column used for lookups.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const SHAPE_FK: ForeignKey = ForeignKey {
    foreign_table: "shapes",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const COLOR_FK: ForeignKey = ForeignKey {
    foreign_table: "colors",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::SetNull,
};

const IMAGE_FK: ForeignKey = ForeignKey {
    foreign_table: "images",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::SetNull,
};

const SET_FK: ForeignKey = ForeignKey {
    foreign_table: "sets",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const PART_FK: ForeignKey = ForeignKey {
    foreign_table: "parts",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// Molds, independent of color
const SHAPES_TABLE: Table = Table {
    name: "shapes",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("lego_id", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("number", &SqlType::Integer), // leading digits of lego_id
    ],
    indices: &[("idx_shapes_number", "number")],
    unique_constraints: &[&["lego_id"]],
};

const COLORS_TABLE: Table = Table {
    name: "colors",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

/// Either a file under the static dir, a remote URL waiting to be fetched, or both
const IMAGES_TABLE: Table = Table {
    name: "images",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("static_path", &SqlType::Text),
        sqlite_column!("origin_url", &SqlType::Text),
    ],
    indices: &[("idx_images_origin_url", "origin_url")],
    unique_constraints: &[&["static_path", "origin_url"]],
};

const PARTS_TABLE: Table = Table {
    name: "parts",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "shape_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&SHAPE_FK)
        ),
        sqlite_column!("color_id", &SqlType::Integer, foreign_key = Some(&COLOR_FK)),
        sqlite_column!("image_id", &SqlType::Integer, foreign_key = Some(&IMAGE_FK)),
    ],
    indices: &[("idx_parts_color", "color_id")],
    unique_constraints: &[&["shape_id", "color_id"]],
};

const SETS_TABLE: Table = Table {
    name: "sets",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("lego_id", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("image_id", &SqlType::Integer, foreign_key = Some(&IMAGE_FK)),
    ],
    indices: &[],
    unique_constraints: &[&["lego_id"]],
};

const SET_ITEMS_TABLE: Table = Table {
    name: "set_items",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "set_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&SET_FK)
        ),
        sqlite_column!(
            "part_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PART_FK)
        ),
        sqlite_column!(
            "quantity",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
    ],
    indices: &[("idx_set_items_part", "part_id")],
    unique_constraints: &[&["set_id", "part_id"]],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        SHAPES_TABLE,
        COLORS_TABLE,
        IMAGES_TABLE,
        PARTS_TABLE,
        SETS_TABLE,
        SET_ITEMS_TABLE,
    ],
    migration: None,
}];
