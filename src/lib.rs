//! Lego Catalog Library
//!
//! This library exposes the internal modules for the binaries and the
//! end-to-end tests.

pub mod catalog_store;
pub mod catalog_sync;
pub mod config;
pub mod image_pipeline;
pub mod rebrickable;
pub mod search;
pub mod server;
pub mod sqlite_persistence;
pub mod user;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use catalog_sync::CatalogSync;
pub use server::{run_server, RequestsLoggingLevel};
pub use user::{SqliteUserStore, UserManager, UserStore};
