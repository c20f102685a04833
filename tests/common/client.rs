//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all catalog server endpoints.
//!
//! When routes or request formats change, update only this file.
#![allow(dead_code)]

use super::constants::*;
use reqwest::Response;
use std::time::Duration;

/// HTTP test client with cookie-based session management
///
/// Redirects are not followed so tests can inspect them.
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    /// Creates a new unauthenticated client
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true) // Automatically handle session cookies
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    /// Creates a client logged in as the test user
    ///
    /// # Panics
    ///
    /// Panics if authentication fails (indicates test infrastructure problem).
    pub async fn authenticated(base_url: String) -> Self {
        let client = Self::new(base_url);

        let response = client.login(TEST_USER, TEST_PASS).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::CREATED,
            "Test user authentication failed: {:?}",
            response.text().await
        );

        client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("GET request failed")
    }

    // ========================================================================
    // Authentication Endpoints
    // ========================================================================

    /// POST /login
    pub async fn login(&self, handle: &str, password: &str) -> Response {
        self.client
            .post(self.url("/login"))
            .form(&[("username", handle), ("password", password)])
            .send()
            .await
            .expect("Login request failed")
    }

    /// POST /logout
    pub async fn logout(&self) -> Response {
        self.client
            .post(self.url("/logout"))
            .send()
            .await
            .expect("Logout request failed")
    }

    // ========================================================================
    // Catalog Endpoints
    // ========================================================================

    /// GET /
    pub async fn get_index(&self) -> Response {
        self.get("/").await
    }

    /// GET /?page=N
    pub async fn get_index_page(&self, page: usize) -> Response {
        self.get(&format!("/?page={}", page)).await
    }

    /// GET /set/{lego_id}
    pub async fn get_set(&self, lego_id: &str) -> Response {
        self.get(&format!("/set/{}", lego_id)).await
    }

    /// GET /part/{lego_id}
    pub async fn get_part(&self, lego_id: &str) -> Response {
        self.get(&format!("/part/{}", lego_id)).await
    }

    /// GET /part/{lego_id}/{color_id}
    pub async fn get_part_in_color(&self, lego_id: &str, color_id: i64) -> Response {
        self.get(&format!("/part/{}/{}", lego_id, color_id)).await
    }

    /// GET /search?q=...&mode=...
    pub async fn search(&self, q: &str, mode: Option<&str>) -> Response {
        let mut query = vec![("q", q)];
        if let Some(mode) = mode {
            query.push(("mode", mode));
        }
        self.client
            .get(self.url("/search"))
            .query(&query)
            .send()
            .await
            .expect("Search request failed")
    }

    /// POST /set/add
    pub async fn add_set(&self, set_lego_id: &str) -> Response {
        self.client
            .post(self.url("/set/add"))
            .form(&[("set_lego_id", set_lego_id)])
            .send()
            .await
            .expect("Add set request failed")
    }

    /// GET on an absolute path, e.g. an image URL returned by the server
    pub async fn get_path(&self, path: &str) -> Response {
        self.get(path).await
    }
}
