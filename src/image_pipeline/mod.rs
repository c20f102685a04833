//! Background pipeline that downloads part and set images, shrinks them and
//! stores them under the static dir.
//!
//! Sync enqueues one task per entity whose image changed; the worker runs the
//! tasks one at a time.

mod fetcher;
pub mod processing;
mod storer;
mod task_queue;
mod worker;

pub use fetcher::{HttpImageFetcher, ImageFetcher};
pub use storer::{ImageStorer, StoreOutcome};
pub use task_queue::{ImageTask, ImageTaskKind, ImageTaskStore, SqliteImageTaskStore, TaskStatus};
pub use worker::ImageWorker;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("{0}")]
    Fetch(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Cannot decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Cannot encode image: {0}")]
    Encode(#[source] image::ImageError),
}
