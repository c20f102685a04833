//! Stores one entity's image under the static dir.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use super::fetcher::ImageFetcher;
use super::processing;
use crate::catalog_store::{CatalogStore, ImageOwner};
use crate::server::metrics;

/// Root of stored catalog images, relative to the static dir.
pub const IMAGES_ROOT: &str = "lego/img";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Image written; holds the path relative to the static dir.
    Stored(String),
    /// No entity was missing its image.
    NoCandidate,
    /// The entity has no image or no origin URL.
    NoImageUrl,
    AlreadyStored,
    /// Download or conversion failed and the image record was discarded.
    Abandoned,
}

impl StoreOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            StoreOutcome::Stored(_) => "stored",
            StoreOutcome::NoCandidate => "no_candidate",
            StoreOutcome::NoImageUrl => "no_image_url",
            StoreOutcome::AlreadyStored => "already_stored",
            StoreOutcome::Abandoned => "abandoned",
        }
    }
}

pub struct ImageStorer {
    catalog_store: Arc<dyn CatalogStore>,
    fetcher: Arc<dyn ImageFetcher>,
    static_dir: PathBuf,
}

impl ImageStorer {
    pub fn new(
        catalog_store: Arc<dyn CatalogStore>,
        fetcher: Arc<dyn ImageFetcher>,
        static_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog_store,
            fetcher,
            static_dir: static_dir.into(),
        }
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    /// Relative static path for an owner's image.
    pub fn relative_path(owner: ImageOwner, owner_id: i64, extension: &str) -> String {
        format!("{}/{}/{}.{}", IMAGES_ROOT, owner.table(), owner_id, extension)
    }

    /// Downloads, shrinks and saves the image of the given entity, or of the
    /// newest one still missing its image when `owner_id` is `None`.
    ///
    /// Download and conversion failures are not errors: the image record is
    /// dropped so the entity is not picked again.
    pub async fn store(&self, owner: ImageOwner, owner_id: Option<i64>) -> Result<StoreOutcome> {
        let outcome = self.store_inner(owner, owner_id).await?;
        metrics::record_image_processed(outcome.metric_label());
        Ok(outcome)
    }

    async fn store_inner(&self, owner: ImageOwner, owner_id: Option<i64>) -> Result<StoreOutcome> {
        let subject = match owner_id {
            Some(id) => match self.catalog_store.get_image_subject(owner, id)? {
                Some(subject) => subject,
                None => bail!("{} {} not found", owner, id),
            },
            None => match self.catalog_store.latest_missing_static_image(owner)? {
                Some(subject) => subject,
                None => {
                    info!("No {} candidate to process", owner);
                    return Ok(StoreOutcome::NoCandidate);
                }
            },
        };

        let (image, url) = match &subject.image {
            Some(image) => match &image.origin_url {
                Some(url) => (image, url.clone()),
                None => {
                    info!("No image URL: {}", subject);
                    return Ok(StoreOutcome::NoImageUrl);
                }
            },
            None => {
                info!("No image URL: {}", subject);
                return Ok(StoreOutcome::NoImageUrl);
            }
        };
        if image.static_path.is_some() {
            return Ok(StoreOutcome::AlreadyStored);
        }

        let processed = match self.fetch_and_process(&url).await {
            Ok(processed) => processed,
            Err(e) => {
                error!("{} reading image URL for {}", e, subject);
                self.catalog_store.discard_image(image.id)?;
                return Ok(StoreOutcome::Abandoned);
            }
        };

        let rel_path = Self::relative_path(owner, subject.owner_id, processed.extension);
        self.write_file(&rel_path, &processed.bytes).await?;
        info!("Saving to static: {}", rel_path);
        self.catalog_store
            .set_image_static_path(image.id, &rel_path)?;
        Ok(StoreOutcome::Stored(rel_path))
    }

    async fn fetch_and_process(
        &self,
        url: &str,
    ) -> Result<processing::ProcessedImage, super::ImageError> {
        let data = self.fetcher.fetch(url).await?;
        tokio::task::spawn_blocking(move || processing::process(&data))
            .await
            .map_err(|e| super::ImageError::Fetch(format!("Image processing panicked: {}", e)))?
    }

    async fn write_file(&self, rel_path: &str, bytes: &[u8]) -> Result<()> {
        let path = self.static_dir.join(rel_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Cannot write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::SqliteCatalogStore;
    use crate::image_pipeline::fetcher::MockImageFetcher;
    use crate::image_pipeline::ImageError;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    const IMAGE_URL: &str = "https://cdn.example.com/parts/3001.jpg";

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([1, 2, 3])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn store_with_part(url: Option<&str>) -> (Arc<SqliteCatalogStore>, i64) {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let shape = store.create_shape("3001", "Brick 2 x 4").unwrap();
        let (color, _) = store.get_or_create_color("Blue").unwrap();
        let image_id = url.map(|u| store.get_or_create_image(u).unwrap().0.id);
        let part = store.create_part(shape.id, Some(color.id), image_id).unwrap();
        (Arc::new(store), part.id)
    }

    #[tokio::test]
    async fn stores_downscaled_image() {
        let (store, part_id) = store_with_part(Some(IMAGE_URL));
        let mut fetcher = MockImageFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url == IMAGE_URL)
            .times(1)
            .returning(|_| Ok(jpeg_bytes(1000, 500)));
        let dir = TempDir::new().unwrap();
        let storer = ImageStorer::new(store.clone(), Arc::new(fetcher), dir.path());

        let outcome = storer.store(ImageOwner::Part, Some(part_id)).await.unwrap();

        let expected = format!("lego/img/parts/{}.jpg", part_id);
        assert_eq!(outcome, StoreOutcome::Stored(expected.clone()));
        let written = std::fs::read(dir.path().join(&expected)).unwrap();
        let decoded = image::load_from_memory(&written).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (384, 192));

        let subject = store
            .get_image_subject(ImageOwner::Part, part_id)
            .unwrap()
            .unwrap();
        assert_eq!(subject.image.unwrap().static_path, Some(expected));
    }

    #[tokio::test]
    async fn unsupported_image_is_discarded() {
        let (store, part_id) = store_with_part(Some(IMAGE_URL));
        let mut fetcher = MockImageFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Ok(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec()));
        let dir = TempDir::new().unwrap();
        let storer = ImageStorer::new(store.clone(), Arc::new(fetcher), dir.path());

        let outcome = storer.store(ImageOwner::Part, Some(part_id)).await.unwrap();

        assert_eq!(outcome, StoreOutcome::Abandoned);
        assert_eq!(store.get_part(part_id).unwrap().unwrap().image_id, None);
        assert!(store
            .latest_missing_static_image(ImageOwner::Part)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn fetch_failure_is_discarded() {
        let (store, part_id) = store_with_part(Some(IMAGE_URL));
        let mut fetcher = MockImageFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(ImageError::Fetch("404 Not Found".to_string())));
        let dir = TempDir::new().unwrap();
        let storer = ImageStorer::new(store.clone(), Arc::new(fetcher), dir.path());

        let outcome = storer.store(ImageOwner::Part, Some(part_id)).await.unwrap();

        assert_eq!(outcome, StoreOutcome::Abandoned);
        assert_eq!(store.get_part(part_id).unwrap().unwrap().image_id, None);
    }

    #[tokio::test]
    async fn part_without_image_is_skipped() {
        let (store, part_id) = store_with_part(None);
        let mut fetcher = MockImageFetcher::new();
        fetcher.expect_fetch().never();
        let dir = TempDir::new().unwrap();
        let storer = ImageStorer::new(store, Arc::new(fetcher), dir.path());

        let outcome = storer.store(ImageOwner::Part, Some(part_id)).await.unwrap();
        assert_eq!(outcome, StoreOutcome::NoImageUrl);
    }

    #[tokio::test]
    async fn picks_latest_candidate_when_no_id_given() {
        let (store, part_id) = store_with_part(Some(IMAGE_URL));
        let mut fetcher = MockImageFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(jpeg_bytes(10, 10)));
        let dir = TempDir::new().unwrap();
        let storer = ImageStorer::new(store, Arc::new(fetcher), dir.path());

        let outcome = storer.store(ImageOwner::Part, None).await.unwrap();
        assert_eq!(
            outcome,
            StoreOutcome::Stored(format!("lego/img/parts/{}.jpg", part_id))
        );

        let outcome = storer.store(ImageOwner::Part, None).await.unwrap();
        assert_eq!(outcome, StoreOutcome::NoCandidate);
    }

    #[tokio::test]
    async fn missing_entity_is_an_error() {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let dir = TempDir::new().unwrap();
        let storer = ImageStorer::new(store, Arc::new(MockImageFetcher::new()), dir.path());

        assert!(storer.store(ImageOwner::Set, Some(42)).await.is_err());
    }
}
