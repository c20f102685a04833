//! Catalog entities as stored in SQLite, plus the denormalized read models
//! served by the web layer.

use serde::Serialize;
use std::fmt;

// =============================================================================
// Stored entities
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Shape {
    pub id: i64,
    pub lego_id: String,
    pub name: String,
    /// Leading digits of `lego_id`, used for natural ordering.
    pub number: Option<i64>,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.lego_id, self.name)
    }
}

/// Parses the numeric prefix of a catalog id: `"3001pr0001"` gives 3001.
pub fn shape_number(lego_id: &str) -> Option<i64> {
    let digits: String = lego_id.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Color {
    pub id: i64,
    pub name: String,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Image {
    pub id: i64,
    pub static_path: Option<String>,
    pub origin_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Part {
    pub id: i64,
    pub shape_id: i64,
    pub color_id: Option<i64>,
    pub image_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LegoSet {
    pub id: i64,
    pub lego_id: String,
    pub name: String,
    pub image_id: Option<i64>,
}

impl fmt::Display for LegoSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.lego_id, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SetItem {
    pub id: i64,
    pub set_id: i64,
    pub part_id: i64,
    pub quantity: u32,
}

/// Entity kinds that own an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOwner {
    Part,
    Set,
}

impl ImageOwner {
    pub fn table(&self) -> &'static str {
        match self {
            ImageOwner::Part => "parts",
            ImageOwner::Set => "sets",
        }
    }
}

impl fmt::Display for ImageOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageOwner::Part => f.write_str("Part"),
            ImageOwner::Set => f.write_str("LegoSet"),
        }
    }
}

/// An image-owning entity together with its image, as seen by the image
/// pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSubject {
    pub owner: ImageOwner,
    pub owner_id: i64,
    pub label: String,
    pub image: Option<Image>,
}

impl fmt::Display for ImageSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.owner, self.label)
    }
}

// =============================================================================
// Read models
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SetSummary {
    pub lego_id: String,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartView {
    pub id: i64,
    pub shape_lego_id: String,
    pub shape_name: String,
    pub color: Option<Color>,
    pub image: Option<String>,
}

impl fmt::Display for PartView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.shape_lego_id, self.shape_name)?;
        if let Some(color) = &self.color {
            write!(f, ", {}", color)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SetItemView {
    pub quantity: u32,
    pub part: PartView,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SetDetail {
    pub lego_id: String,
    pub name: String,
    pub image: Option<String>,
    pub items: Vec<SetItemView>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SetMembership {
    pub lego_id: String,
    pub name: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartUsage {
    pub part: PartView,
    pub sets: Vec<SetMembership>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShapeDetail {
    pub lego_id: String,
    pub name: String,
    pub number: Option<i64>,
    pub parts: Vec<PartUsage>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub sets: Vec<SetSummary>,
    pub parts: Vec<PartView>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub shapes: usize,
    pub colors: usize,
    pub parts: usize,
    pub sets: usize,
    pub images: usize,
}

/// 1-based page selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Page {
            number: number.max(1),
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        (self.number - 1) * self.size
    }
}
