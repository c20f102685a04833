//! CatalogStore trait definition.

use super::models::*;
use crate::search::SearchQuery;
use anyhow::Result;

/// Storage backend for the lego catalog.
///
/// Write operations are plain get/create/update primitives; the reconciliation
/// logic that combines them lives in `catalog_sync`.
pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Shapes and colors
    // =========================================================================

    fn get_shape_by_lego_id(&self, lego_id: &str) -> Result<Option<Shape>>;

    /// Inserts a shape, deriving its numeric prefix from `lego_id`.
    fn create_shape(&self, lego_id: &str, name: &str) -> Result<Shape>;

    fn update_shape_name(&self, shape_id: i64, name: &str) -> Result<()>;

    fn get_color(&self, color_id: i64) -> Result<Option<Color>>;

    /// Returns the color with this exact name, creating it if needed. The flag
    /// tells whether it was created.
    fn get_or_create_color(&self, name: &str) -> Result<(Color, bool)>;

    // =========================================================================
    // Images
    // =========================================================================

    fn get_image(&self, image_id: i64) -> Result<Option<Image>>;

    /// Returns the image record pointing at `origin_url`, creating it if
    /// needed. The flag tells whether it was created.
    fn get_or_create_image(&self, origin_url: &str) -> Result<(Image, bool)>;

    /// Records where the downloaded image was stored.
    fn set_image_static_path(&self, image_id: i64, static_path: &str) -> Result<()>;

    /// Deletes an image record, clearing every part and set pointing at it.
    fn discard_image(&self, image_id: i64) -> Result<()>;

    /// Loads an entity with its image for the image pipeline.
    fn get_image_subject(&self, owner: ImageOwner, owner_id: i64)
        -> Result<Option<ImageSubject>>;

    /// Newest entity whose image has an origin URL but was not stored yet.
    fn latest_missing_static_image(&self, owner: ImageOwner) -> Result<Option<ImageSubject>>;

    // =========================================================================
    // Parts
    // =========================================================================

    fn get_part(&self, part_id: i64) -> Result<Option<Part>>;

    /// Looks up the part made from `shape_id` in `color_id`; `None` color is a
    /// distinct colorless part.
    fn get_part_by_shape_and_color(
        &self,
        shape_id: i64,
        color_id: Option<i64>,
    ) -> Result<Option<Part>>;

    fn create_part(
        &self,
        shape_id: i64,
        color_id: Option<i64>,
        image_id: Option<i64>,
    ) -> Result<Part>;

    fn set_part_image(&self, part_id: i64, image_id: Option<i64>) -> Result<()>;

    // =========================================================================
    // Sets
    // =========================================================================

    fn get_set(&self, set_id: i64) -> Result<Option<LegoSet>>;

    fn get_set_by_lego_id(&self, lego_id: &str) -> Result<Option<LegoSet>>;

    fn create_set(&self, lego_id: &str, name: &str) -> Result<LegoSet>;

    fn update_set(&self, set_id: i64, name: &str, image_id: Option<i64>) -> Result<()>;

    /// Inserts the item or replaces the quantity of the existing one.
    /// Fails when `quantity` is zero.
    fn upsert_set_item(&self, set_id: i64, part_id: i64, quantity: u32) -> Result<SetItem>;

    fn get_set_items(&self, set_id: i64) -> Result<Vec<SetItem>>;

    // =========================================================================
    // Read models
    // =========================================================================

    fn list_sets(&self, page: Page) -> Result<Vec<SetSummary>>;

    fn get_set_detail(&self, lego_id: &str) -> Result<Option<SetDetail>>;

    /// All parts of a shape (optionally a single color) and the sets using them.
    fn get_shape_detail(&self, lego_id: &str, color_id: Option<i64>)
        -> Result<Option<ShapeDetail>>;

    fn search(&self, query: &SearchQuery, page: Page) -> Result<SearchResults>;

    // =========================================================================
    // Counts (for metrics)
    // =========================================================================

    fn counts(&self) -> Result<CatalogCounts>;
}
