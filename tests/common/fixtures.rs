//! Test fixtures: a fake Rebrickable API, a fake image host and test users

use super::constants::*;
use anyhow::Result;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lego_catalog::image_pipeline::{ImageError, ImageFetcher};
use lego_catalog::rebrickable::{ApiError, CatalogApi, PageCursor, SetInfo, SetPartEntry, SetPartsPage};
use lego_catalog::user::UserManager;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Encodes a solid-color PNG of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 30, 30])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode test PNG");
    out.into_inner()
}

fn part(
    lego_id: &str,
    name: &str,
    color: Option<&str>,
    image_url: Option<String>,
    quantity: u32,
    is_spare: bool,
) -> SetPartEntry {
    SetPartEntry {
        lego_id: lego_id.to_string(),
        name: name.to_string(),
        image_url,
        color: color.map(str::to_string),
        quantity,
        is_spare,
    }
}

/// In-memory stand-in for the Rebrickable API
pub struct FakeCatalogApi {
    sets: HashMap<String, (SetInfo, Vec<SetPartEntry>)>,
    calls: AtomicUsize,
}

impl FakeCatalogApi {
    /// Knows SET_1_ID and SET_2_ID, answers 404 for anything else
    pub fn with_test_sets() -> Self {
        let mut sets = HashMap::new();
        sets.insert(
            SET_1_ID.to_string(),
            (
                SetInfo {
                    name: SET_1_NAME.to_string(),
                    image_url: Some(format!("{}{}.png", PNG_URL_PREFIX, SET_1_ID)),
                },
                vec![
                    part(
                        MINIFIG_ID,
                        MINIFIG_NAME,
                        None,
                        Some(UNSUPPORTED_IMAGE_URL.to_string()),
                        1,
                        false,
                    ),
                    part(
                        BRICK_SHAPE_ID,
                        BRICK_SHAPE_NAME,
                        Some("Red"),
                        Some(format!("{}3001-red.png", PNG_URL_PREFIX)),
                        4,
                        false,
                    ),
                    part(
                        BRICK_SHAPE_ID,
                        BRICK_SHAPE_NAME,
                        Some("Blue"),
                        Some(format!("{}3001-blue.png", PNG_URL_PREFIX)),
                        2,
                        false,
                    ),
                    part(PLATE_SHAPE_ID, PLATE_SHAPE_NAME, Some("Black"), None, 1, false),
                    part(
                        BRICK_SHAPE_ID,
                        BRICK_SHAPE_NAME,
                        Some("Red"),
                        Some(format!("{}3001-red.png", PNG_URL_PREFIX)),
                        1,
                        true,
                    ),
                ],
            ),
        );
        sets.insert(
            SET_2_ID.to_string(),
            (
                SetInfo {
                    name: SET_2_NAME.to_string(),
                    image_url: None,
                },
                vec![part(
                    PLATE_SHAPE_ID,
                    PLATE_SHAPE_NAME,
                    Some("White"),
                    None,
                    3,
                    false,
                )],
            ),
        );
        Self {
            sets,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of API calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, set_lego_id: &str, listing: &str) -> Result<&(SetInfo, Vec<SetPartEntry>), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sets.get(set_lego_id).ok_or_else(|| {
            ApiError::NotFound(format!("https://rebrickable.test/api/v3/lego/sets/{}/{}", set_lego_id, listing))
        })
    }
}

#[async_trait]
impl CatalogApi for FakeCatalogApi {
    async fn get_set_info(&self, set_lego_id: &str) -> Result<SetInfo, ApiError> {
        self.lookup(set_lego_id, "").map(|(info, _)| info.clone())
    }

    /// Serves colorless entries on the minifigs page and the rest on a
    /// single parts page.
    async fn get_set_parts_page(
        &self,
        set_lego_id: &str,
        cursor: Option<PageCursor>,
    ) -> Result<SetPartsPage, ApiError> {
        let listing = match &cursor {
            None | Some(PageCursor::Minifigs(_)) => "minifigs/",
            Some(PageCursor::Parts(_)) => "parts/",
        };
        let (_, entries) = self.lookup(set_lego_id, listing)?;
        let minifigs_page = listing == "minifigs/";
        Ok(SetPartsPage {
            entries: entries
                .iter()
                .filter(|entry| entry.color.is_none() == minifigs_page)
                .cloned()
                .collect(),
            next: minifigs_page.then(|| {
                PageCursor::Parts(format!(
                    "https://rebrickable.test/api/v3/lego/sets/{}/parts/",
                    set_lego_id
                ))
            }),
        })
    }
}

/// Serves PNGs under PNG_URL_PREFIX and GIF bytes for UNSUPPORTED_IMAGE_URL
pub struct FakeImageFetcher;

#[async_trait]
impl ImageFetcher for FakeImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        if url.starts_with(PNG_URL_PREFIX) {
            Ok(png_bytes(768, 512))
        } else if url == UNSUPPORTED_IMAGE_URL {
            Ok(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec())
        } else {
            Err(ImageError::Fetch(format!("404 Client Error: Not Found for url: {}", url)))
        }
    }
}

/// Creates the regular test user with a password
pub fn create_test_users(user_manager: &UserManager) -> Result<i64> {
    let user_id = user_manager.add_user(TEST_USER)?;
    user_manager.set_password(TEST_USER, TEST_PASS)?;
    eprintln!("Created test user {} with id {}", TEST_USER, user_id);
    Ok(user_id)
}
