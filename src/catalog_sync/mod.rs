//! Reconciles local sets, shapes, colors and parts with the Rebrickable
//! catalog.
//!
//! Every entity is resolved with a get, create or update-on-change step.
//! Nothing is wrapped in a transaction: an error partway through a set keeps
//! the entries already saved.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::catalog_store::{CatalogStore, Color, Image, LegoSet, Part, Shape};
use crate::image_pipeline::{ImageTaskKind, ImageTaskStore};
use crate::rebrickable::{ApiError, CatalogApi, PageCursor, SetInfo, SetPartEntry, SetPartsPage};
use crate::server::metrics;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    fn metric_kind(err: &ApiError) -> &'static str {
        match err {
            ApiError::NotFound(_) => "not_found",
            ApiError::Status { .. } => "status",
            ApiError::Request { .. } => "request",
            ApiError::Decode { .. } => "decode",
        }
    }
}

/// What a sync run changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub set_created: bool,
    pub shapes_created: usize,
    pub shapes_updated: usize,
    pub colors_created: usize,
    pub parts_created: usize,
    pub parts_updated: usize,
    pub items_saved: usize,
    pub spares_skipped: usize,
    pub images_enqueued: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} items, shapes +{} ~{}, colors +{}, parts +{} ~{}, {} spares skipped, {} images queued",
            self.items_saved,
            self.shapes_created,
            self.shapes_updated,
            self.colors_created,
            self.parts_created,
            self.parts_updated,
            self.spares_skipped,
            self.images_enqueued
        )
    }
}

pub struct CatalogSync {
    store: Arc<dyn CatalogStore>,
    api: Arc<dyn CatalogApi>,
    tasks: Arc<dyn ImageTaskStore>,
}

impl CatalogSync {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        api: Arc<dyn CatalogApi>,
        tasks: Arc<dyn ImageTaskStore>,
    ) -> Self {
        Self { store, api, tasks }
    }

    /// Adds a set that is not in the catalog yet. Existing sets are rejected
    /// without calling the API.
    pub async fn add_set(&self, lego_id: &str) -> Result<SyncReport, SyncError> {
        if let Some(existing) = self.store.get_set_by_lego_id(lego_id)? {
            warn!("Already exists: {}", existing);
            return Err(SyncError::AlreadyExists(existing.to_string()));
        }

        let info = self.fetch_set_info(lego_id).await?;
        let set = self.store.create_set(lego_id, &info.name)?;
        self.save_set_with_parts(set, &info, true).await
    }

    /// Adds the set, or refreshes it from the API when it already exists.
    pub async fn update_set(&self, lego_id: &str) -> Result<SyncReport, SyncError> {
        let info = self.fetch_set_info(lego_id).await?;

        let (set, is_new) = match self.store.get_set_by_lego_id(lego_id)? {
            Some(set) => {
                info!("Updating existing set: {}", set);
                if set.name != info.name {
                    info!("Set name changed: {}", info.name);
                }
                let current_url = self.image_url(set.image_id)?;
                if current_url != info.image_url {
                    info!(
                        "Set image URL changed: {}",
                        info.image_url.as_deref().unwrap_or("")
                    );
                }
                (set, false)
            }
            None => (self.store.create_set(lego_id, &info.name)?, true),
        };
        self.save_set_with_parts(set, &info, is_new).await
    }

    /// Saves set name and image from `info`, then every non-spare entry of
    /// the set listing in API order.
    pub async fn save_set_with_parts(
        &self,
        set: LegoSet,
        info: &SetInfo,
        is_new: bool,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport {
            set_created: is_new,
            ..SyncReport::default()
        };

        let image_outdated = match &info.image_url {
            Some(url) => self.image_url(set.image_id)?.as_deref() != Some(url.as_str()),
            None => false,
        };
        let mut image_id = set.image_id;
        if image_outdated {
            image_id = self.get_image(info.image_url.as_deref())?.map(|i| i.id);
        }
        self.store.update_set(set.id, &info.name, image_id)?;
        let set = LegoSet {
            name: info.name.clone(),
            image_id,
            ..set
        };
        if is_new {
            info!("Created: {}", set);
            metrics::record_sync_change("set", "created");
        }
        if image_outdated {
            self.enqueue_image(ImageTaskKind::StoreSetImage, set.id, &mut report)?;
        }

        // Each page is saved before the next is requested, so a failing page
        // leaves the earlier entries in place.
        let mut cursor = None;
        loop {
            let page = self.fetch_set_parts_page(&set.lego_id, cursor).await?;
            for entry in page.entries {
                self.save_entry(&set, entry, &mut report)?;
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!("Synced {}: {}", set, report);
        Ok(report)
    }

    fn save_entry(
        &self,
        set: &LegoSet,
        entry: SetPartEntry,
        report: &mut SyncReport,
    ) -> anyhow::Result<()> {
        if entry.is_spare {
            info!(
                "Skipping spare part: {}, {}",
                entry.name,
                entry.color.as_deref().unwrap_or("None")
            );
            report.spares_skipped += 1;
            return Ok(());
        }
        let shape = self.get_shape(&entry, report)?;
        let color = match &entry.color {
            Some(name) => Some(self.get_color(name, report)?),
            None => None,
        };
        let part = self.get_part(&shape, color.as_ref(), &entry, report)?;
        self.store.upsert_set_item(set.id, part.id, entry.quantity)?;
        report.items_saved += 1;
        Ok(())
    }

    async fn fetch_set_info(&self, lego_id: &str) -> Result<SetInfo, SyncError> {
        self.api
            .get_set_info(lego_id)
            .await
            .map_err(Self::log_api_error)
    }

    async fn fetch_set_parts_page(
        &self,
        lego_id: &str,
        cursor: Option<PageCursor>,
    ) -> Result<SetPartsPage, SyncError> {
        self.api
            .get_set_parts_page(lego_id, cursor)
            .await
            .map_err(Self::log_api_error)
    }

    fn log_api_error(err: ApiError) -> SyncError {
        error!("Error calling external API: {}", err);
        metrics::record_external_api_error(SyncError::metric_kind(&err));
        SyncError::Api(err)
    }

    fn image_url(&self, image_id: Option<i64>) -> anyhow::Result<Option<String>> {
        match image_id {
            Some(id) => Ok(self.store.get_image(id)?.and_then(|i| i.origin_url)),
            None => Ok(None),
        }
    }

    fn get_image(&self, url: Option<&str>) -> anyhow::Result<Option<Image>> {
        let Some(url) = url else {
            return Ok(None);
        };
        let (image, created) = self.store.get_or_create_image(url)?;
        if created {
            info!("Created: Image {}", url);
        }
        Ok(Some(image))
    }

    /// Gets, renames or creates the shape of `entry`.
    fn get_shape(&self, entry: &SetPartEntry, report: &mut SyncReport) -> anyhow::Result<Shape> {
        match self.store.get_shape_by_lego_id(&entry.lego_id)? {
            Some(shape) if shape.name != entry.name => {
                warn!("Outdated: {}", shape);
                self.store.update_shape_name(shape.id, &entry.name)?;
                let shape = Shape {
                    name: entry.name.clone(),
                    ..shape
                };
                warn!("Updated: {}", shape);
                metrics::record_sync_change("shape", "updated");
                report.shapes_updated += 1;
                Ok(shape)
            }
            Some(shape) => Ok(shape),
            None => {
                let shape = self.store.create_shape(&entry.lego_id, &entry.name)?;
                info!("Created: {}", shape);
                metrics::record_sync_change("shape", "created");
                report.shapes_created += 1;
                Ok(shape)
            }
        }
    }

    fn get_color(&self, name: &str, report: &mut SyncReport) -> anyhow::Result<Color> {
        let (color, created) = self.store.get_or_create_color(name)?;
        if created {
            info!("Created: Color {}", color);
            metrics::record_sync_change("color", "created");
            report.colors_created += 1;
        }
        Ok(color)
    }

    /// Gets or creates the part of `shape` in `color`, pointing it at the
    /// entry image when that changed.
    fn get_part(
        &self,
        shape: &Shape,
        color: Option<&Color>,
        entry: &SetPartEntry,
        report: &mut SyncReport,
    ) -> anyhow::Result<Part> {
        let color_id = color.map(|c| c.id);
        let label = part_label(shape, color);

        match self.store.get_part_by_shape_and_color(shape.id, color_id)? {
            Some(part) => {
                let Some(url) = entry.image_url.as_deref() else {
                    return Ok(part);
                };
                if self.image_url(part.image_id)?.as_deref() == Some(url) {
                    return Ok(part);
                }
                warn!("Outdated: Part {}", label);
                let image_id = self.get_image(Some(url))?.map(|i| i.id);
                self.store.set_part_image(part.id, image_id)?;
                warn!("Updated: Part {}", label);
                metrics::record_sync_change("part", "updated");
                report.parts_updated += 1;
                self.enqueue_image(ImageTaskKind::StorePartImage, part.id, report)?;
                Ok(Part { image_id, ..part })
            }
            None => {
                let image_id = self.get_image(entry.image_url.as_deref())?.map(|i| i.id);
                let part = self.store.create_part(shape.id, color_id, image_id)?;
                info!("Created: Part {}", label);
                metrics::record_sync_change("part", "created");
                report.parts_created += 1;
                self.enqueue_image(ImageTaskKind::StorePartImage, part.id, report)?;
                Ok(part)
            }
        }
    }

    fn enqueue_image(
        &self,
        kind: ImageTaskKind,
        entity_id: i64,
        report: &mut SyncReport,
    ) -> anyhow::Result<()> {
        self.tasks.enqueue(kind, Some(entity_id))?;
        report.images_enqueued += 1;
        Ok(())
    }
}

fn part_label(shape: &Shape, color: Option<&Color>) -> String {
    match color {
        Some(color) => format!("{}, {}", shape, color),
        None => shape.to_string(),
    }
}
