//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own databases and static dir.

use super::constants::*;
use super::fixtures::{create_test_users, FakeCatalogApi, FakeImageFetcher};
use lego_catalog::catalog_store::{CatalogStore, SqliteCatalogStore};
use lego_catalog::catalog_sync::CatalogSync;
use lego_catalog::image_pipeline::{ImageStorer, ImageTaskStore, ImageWorker, SqliteImageTaskStore};
use lego_catalog::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use lego_catalog::user::{SqliteUserStore, UserManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with isolated databases
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Catalog store for direct database access in tests
    pub catalog_store: Arc<dyn CatalogStore>,

    /// Image task queue shared with the server
    pub image_tasks: Arc<dyn ImageTaskStore>,

    /// The fake API behind the server's catalog sync
    pub api: Arc<FakeCatalogApi>,

    /// Directory served under /static
    pub static_dir: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// The catalog starts with SET_1_ID loaded through the fake API and the
    /// test user created. Images are not downloaded; use `image_worker()`.
    ///
    /// # Panics
    ///
    /// Panics if any resource cannot be created or the server doesn't
    /// become ready within timeout.
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let static_dir = temp_dir.path().join("static");
        std::fs::create_dir_all(&static_dir).expect("Failed to create static dir");

        let catalog_store: Arc<dyn CatalogStore> = Arc::new(
            SqliteCatalogStore::new(temp_dir.path().join("catalog.db"))
                .expect("Failed to open catalog store"),
        );
        let image_tasks: Arc<dyn ImageTaskStore> = Arc::new(
            SqliteImageTaskStore::new(temp_dir.path().join("image_queue.db"))
                .expect("Failed to open image task store"),
        );
        let user_manager = Arc::new(UserManager::new(Arc::new(
            SqliteUserStore::new(temp_dir.path().join("user.db"))
                .expect("Failed to open user store"),
        )));
        create_test_users(&user_manager).expect("Failed to create test users");

        let api = Arc::new(FakeCatalogApi::with_test_sets());
        let catalog_sync = Arc::new(CatalogSync::new(
            catalog_store.clone(),
            api.clone(),
            image_tasks.clone(),
        ));
        catalog_sync
            .update_set(SET_1_ID)
            .await
            .expect("Failed to load test set");

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port: 0,
            page_size: 50,
            static_dir: static_dir.clone(),
        };
        let state = ServerState::new(
            config,
            catalog_store.clone(),
            user_manager,
            catalog_sync,
            image_tasks.clone(),
        );
        let app = make_app(state);

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            catalog_store,
            image_tasks,
            api,
            static_dir,
            _temp_dir: temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// An image worker bound to this server's catalog and static dir, using
    /// the fake image host
    pub fn image_worker(&self) -> ImageWorker {
        let storer = Arc::new(ImageStorer::new(
            self.catalog_store.clone(),
            Arc::new(FakeImageFetcher),
            self.static_dir.clone(),
        ));
        ImageWorker::new(self.image_tasks.clone(), storer, Duration::from_millis(10))
    }

    /// Waits for the server to become ready by polling the index
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    // Server is ready
                    return;
                }
                _ => {
                    // Server not ready yet, wait and retry
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
