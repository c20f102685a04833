use axum::extract::FromRef;

use crate::catalog_store::CatalogStore;
use crate::catalog_sync::CatalogSync;
use crate::image_pipeline::ImageTaskStore;
use crate::user::UserManager;
use std::sync::Arc;

use super::ServerConfig;

pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type GuardedUserManager = Arc<UserManager>;
pub type GuardedCatalogSync = Arc<CatalogSync>;
pub type GuardedImageTaskStore = Arc<dyn ImageTaskStore>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub catalog_store: GuardedCatalogStore,
    pub user_manager: GuardedUserManager,
    pub catalog_sync: GuardedCatalogSync,
    pub image_tasks: GuardedImageTaskStore,
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_store.clone()
    }
}

impl FromRef<ServerState> for GuardedUserManager {
    fn from_ref(input: &ServerState) -> Self {
        input.user_manager.clone()
    }
}

impl FromRef<ServerState> for GuardedCatalogSync {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_sync.clone()
    }
}

impl FromRef<ServerState> for GuardedImageTaskStore {
    fn from_ref(input: &ServerState) -> Self {
        input.image_tasks.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
