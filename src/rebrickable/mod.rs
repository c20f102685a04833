//! Rebrickable catalog API access.

mod client;
pub mod models;

pub use client::RebrickableClient;
pub use models::{PageCursor, SetInfo, SetPartEntry, SetPartsPage};

use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://rebrickable.com/api/v3";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("404 Client Error: Not Found for url: {0}")]
    NotFound(String),
    #[error("{status} Error for url: {url}")]
    Status { status: u16, url: String },
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Source of set metadata and set contents.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn get_set_info(&self, set_lego_id: &str) -> Result<SetInfo, ApiError>;

    /// One page of the set contents, starting from the first one when
    /// `cursor` is None. Minifigures come first, then parts, each in API
    /// order. Spare entries are included and flagged.
    async fn get_set_parts_page(
        &self,
        set_lego_id: &str,
        cursor: Option<PageCursor>,
    ) -> Result<SetPartsPage, ApiError>;
}
