//! Rebrickable v3 response types and the catalog entries derived from them.

use serde::Deserialize;

/// Color name the API uses for parts that come in any color.
pub const NO_COLOR: &str = "[No Color/Any Color]";

// =============================================================================
// Wire types
// =============================================================================

/// One page of a paginated listing.
#[derive(Clone, Debug, Deserialize)]
pub struct Page<T> {
    pub next: Option<String>,
    pub results: Vec<T>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiSet {
    pub set_num: String,
    pub name: String,
    pub set_img_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiMinifig {
    pub set_num: String,
    pub set_name: String,
    pub set_img_url: Option<String>,
    pub quantity: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiPart {
    pub part_num: String,
    pub name: String,
    pub part_img_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiColor {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiSetPart {
    pub part: ApiPart,
    pub color: ApiColor,
    pub quantity: u32,
    #[serde(default)]
    pub is_spare: bool,
}

// =============================================================================
// Catalog entries
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetInfo {
    pub name: String,
    pub image_url: Option<String>,
}

/// A constituent of a set: either a part in some color or a minifigure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetPartEntry {
    pub lego_id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub color: Option<String>,
    pub quantity: u32,
    pub is_spare: bool,
}

/// Where a set listing continues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageCursor {
    Minifigs(String),
    Parts(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetPartsPage {
    pub entries: Vec<SetPartEntry>,
    /// None after the last parts page.
    pub next: Option<PageCursor>,
}

fn non_empty(url: Option<String>) -> Option<String> {
    url.filter(|u| !u.trim().is_empty())
}

impl From<ApiSet> for SetInfo {
    fn from(set: ApiSet) -> Self {
        SetInfo {
            name: set.name,
            image_url: non_empty(set.set_img_url),
        }
    }
}

impl From<ApiMinifig> for SetPartEntry {
    fn from(fig: ApiMinifig) -> Self {
        SetPartEntry {
            lego_id: fig.set_num,
            name: fig.set_name,
            image_url: non_empty(fig.set_img_url),
            color: None,
            quantity: fig.quantity,
            is_spare: false,
        }
    }
}

impl From<ApiSetPart> for SetPartEntry {
    fn from(entry: ApiSetPart) -> Self {
        let color = match entry.color.name.as_str() {
            NO_COLOR | "" => None,
            _ => Some(entry.color.name),
        };
        SetPartEntry {
            lego_id: entry.part.part_num,
            name: entry.part.name,
            image_url: non_empty(entry.part.part_img_url),
            color,
            quantity: entry.quantity,
            is_spare: entry.is_spare,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_part_maps_any_color_to_none() {
        let json = r#"{
            "id": 1,
            "inv_part_id": 2,
            "part": {"part_num": "3001", "name": "Brick 2 x 4", "part_img_url": null},
            "color": {"id": 9999, "name": "[No Color/Any Color]"},
            "quantity": 3,
            "is_spare": false
        }"#;
        let entry: SetPartEntry = serde_json::from_str::<ApiSetPart>(json).unwrap().into();
        assert_eq!(entry.color, None);
        assert_eq!(entry.image_url, None);
        assert_eq!(entry.quantity, 3);
    }

    #[test]
    fn minifig_becomes_colorless_entry() {
        let json = r#"{
            "id": 7,
            "set_num": "fig-000333",
            "set_name": "Pilot",
            "quantity": 1,
            "set_img_url": "https://cdn.rebrickable.com/media/sets/fig-000333.jpg"
        }"#;
        let entry: SetPartEntry = serde_json::from_str::<ApiMinifig>(json).unwrap().into();
        assert_eq!(entry.lego_id, "fig-000333");
        assert_eq!(entry.color, None);
        assert!(!entry.is_spare);
        assert!(entry.image_url.is_some());
    }

    #[test]
    fn empty_image_url_is_none() {
        let set = ApiSet {
            set_num: "1234-1".to_string(),
            name: "Fighter Jet".to_string(),
            set_img_url: Some(String::new()),
        };
        assert_eq!(SetInfo::from(set).image_url, None);
    }
}
