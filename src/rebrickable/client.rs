//! HTTP client for the Rebrickable v3 API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::models::{
    ApiMinifig, ApiSet, ApiSetPart, Page, PageCursor, SetInfo, SetPartEntry, SetPartsPage,
};
use super::{ApiError, CatalogApi};

pub struct RebrickableClient {
    client: reqwest::Client,
    base_url: String,
}

impl RebrickableClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. "https://rebrickable.com/api/v3"
    /// * `api_key` - Key sent as `Authorization: key <api_key>`
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: &str, api_key: &str, timeout_sec: u64) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("key {}", api_key))
            .context("API key is not a valid header value")?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn set_url(&self, set_lego_id: &str, listing: &str) -> String {
        format!(
            "{}/lego/sets/{}/{}",
            self.base_url,
            urlencoding::encode(set_lego_id),
            listing
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.json().await.map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<Page<T>, ApiError> {
        let page: Page<T> = self.get_json(url).await?;
        debug!("Fetched {} entries from {}", page.results.len(), url);
        Ok(page)
    }
}

#[async_trait]
impl CatalogApi for RebrickableClient {
    async fn get_set_info(&self, set_lego_id: &str) -> Result<SetInfo, ApiError> {
        let set: ApiSet = self.get_json(&self.set_url(set_lego_id, "")).await?;
        Ok(set.into())
    }

    async fn get_set_parts_page(
        &self,
        set_lego_id: &str,
        cursor: Option<PageCursor>,
    ) -> Result<SetPartsPage, ApiError> {
        let cursor = cursor
            .unwrap_or_else(|| PageCursor::Minifigs(self.set_url(set_lego_id, "minifigs/")));
        match cursor {
            PageCursor::Minifigs(url) => {
                let page: Page<ApiMinifig> = self.get_page(&url).await?;
                // The parts listing follows the last minifig page.
                let next = page
                    .next
                    .map(PageCursor::Minifigs)
                    .unwrap_or_else(|| PageCursor::Parts(self.set_url(set_lego_id, "parts/")));
                Ok(SetPartsPage {
                    entries: page.results.into_iter().map(SetPartEntry::from).collect(),
                    next: Some(next),
                })
            }
            PageCursor::Parts(url) => {
                let page: Page<ApiSetPart> = self.get_page(&url).await?;
                Ok(SetPartsPage {
                    entries: page.results.into_iter().map(SetPartEntry::from).collect(),
                    next: page.next.map(PageCursor::Parts),
                })
            }
        }
    }
}
