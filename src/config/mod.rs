mod file_config;

pub use file_config::{FileConfig, ImagesConfig, RebrickableConfig};

use crate::rebrickable::DEFAULT_API_URL;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const API_KEY_ENV_VAR: &str = "REBRICKABLE_API_KEY";
pub const API_KEY_FILE_NAME: &str = ".rebrickable-key";

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_METRICS_PORT: u16 = 9091;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_API_TIMEOUT_SEC: u64 = 5;
pub const DEFAULT_IMAGE_TIMEOUT_SEC: u64 = 30;
pub const DEFAULT_IMAGE_WORKER_POLL_INTERVAL_MS: u64 = 1000;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            static_dir: None,
            port: DEFAULT_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            logging_level: RequestsLoggingLevel::default(),
            api_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub static_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub page_size: usize,

    // Rebrickable API
    pub api_url: String,
    pub api_key: Option<String>,
    pub api_timeout_sec: u64,

    // Image pipeline
    pub image_timeout_sec: u64,
    pub image_worker_poll_interval_ms: u64,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let static_dir = file
            .static_dir
            .map(PathBuf::from)
            .or_else(|| cli.static_dir.clone())
            .unwrap_or_else(|| db_dir.join("static"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let page_size = file.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            bail!("page_size must be greater than 0");
        }

        let rebrickable = file.rebrickable.unwrap_or_default();
        let api_url = rebrickable
            .api_url
            .or_else(|| cli.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_key = resolve_api_key(
            rebrickable.api_key.or_else(|| cli.api_key.clone()),
            std::env::var(API_KEY_ENV_VAR).ok(),
            &db_dir,
        );
        let api_timeout_sec = rebrickable.timeout_sec.unwrap_or(DEFAULT_API_TIMEOUT_SEC);

        let images = file.images.unwrap_or_default();
        let image_timeout_sec = images.timeout_sec.unwrap_or(DEFAULT_IMAGE_TIMEOUT_SEC);
        let image_worker_poll_interval_ms = images
            .worker_poll_interval_ms
            .unwrap_or(DEFAULT_IMAGE_WORKER_POLL_INTERVAL_MS);

        Ok(Self {
            db_dir,
            static_dir,
            port,
            metrics_port,
            logging_level,
            page_size,
            api_url,
            api_key,
            api_timeout_sec,
            image_timeout_sec,
            image_worker_poll_interval_ms,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn user_db_path(&self) -> PathBuf {
        self.db_dir.join("user.db")
    }

    pub fn image_queue_db_path(&self) -> PathBuf {
        self.db_dir.join("image_queue.db")
    }

    pub fn image_worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.image_worker_poll_interval_ms)
    }
}

/// Picks the API key from, in order: explicit config, environment, key file
/// in the db dir. Blank values are skipped.
pub fn resolve_api_key(
    configured: Option<String>,
    from_env: Option<String>,
    db_dir: &Path,
) -> Option<String> {
    let non_blank = |s: String| {
        let trimmed = s.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };
    configured
        .and_then(non_blank)
        .or_else(|| from_env.and_then(non_blank))
        .or_else(|| {
            let key_file = db_dir.join(API_KEY_FILE_NAME);
            match std::fs::read_to_string(&key_file) {
                Ok(content) => non_blank(content),
                Err(e) => {
                    debug!("No API key file at {:?}: {}", key_file, e);
                    None
                }
            }
        })
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
