use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lego_catalog::catalog_store::{CatalogStore, SqliteCatalogStore};
use lego_catalog::catalog_sync::CatalogSync;
use lego_catalog::config::{AppConfig, CliConfig, FileConfig};
use lego_catalog::image_pipeline::{
    HttpImageFetcher, ImageStorer, ImageTaskStore, ImageWorker, SqliteImageTaskStore,
};
use lego_catalog::rebrickable::RebrickableClient;
use lego_catalog::server::{self, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use lego_catalog::user::{SqliteUserStore, UserManager};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the catalog, user and image queue databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory served under /static, where downloaded images are stored.
    /// Defaults to <db_dir>/static.
    #[clap(long, value_parser = parse_path)]
    pub static_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Root URL of the Rebrickable API.
    #[clap(long)]
    pub api_url: Option<String>,

    /// Rebrickable API key. Falls back to $REBRICKABLE_API_KEY, then to
    /// <db_dir>/.rebrickable-key.
    #[clap(long)]
    pub api_key: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            static_dir: self.static_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening SQLite catalog database at {:?}...", config.catalog_db_path());
    let catalog_store: Arc<dyn CatalogStore> =
        Arc::new(SqliteCatalogStore::new(config.catalog_db_path())?);
    let user_store = Arc::new(SqliteUserStore::new(config.user_db_path())?);
    let image_tasks: Arc<dyn ImageTaskStore> =
        Arc::new(SqliteImageTaskStore::new(config.image_queue_db_path())?);

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let api_key = config.api_key.clone().unwrap_or_else(|| {
        warn!("No Rebrickable API key configured, adding sets will fail");
        String::new()
    });
    let api = Arc::new(RebrickableClient::new(
        &config.api_url,
        &api_key,
        config.api_timeout_sec,
    )?);
    let catalog_sync = Arc::new(CatalogSync::new(
        catalog_store.clone(),
        api,
        image_tasks.clone(),
    ));

    let fetcher = Arc::new(HttpImageFetcher::new(config.image_timeout_sec)?);
    let storer = Arc::new(ImageStorer::new(
        catalog_store.clone(),
        fetcher,
        config.static_dir.clone(),
    ));
    let worker = ImageWorker::new(
        image_tasks.clone(),
        storer,
        config.image_worker_poll_interval(),
    );

    let shutdown = CancellationToken::new();
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down..."),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        ctrl_c_shutdown.cancel();
    });

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
        page_size: config.page_size,
        static_dir: config.static_dir.clone(),
    };
    let state = ServerState::new(
        server_config,
        catalog_store,
        Arc::new(UserManager::new(user_store)),
        catalog_sync,
        image_tasks,
    );

    let served = run_server(state, shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        error!("Image worker task failed: {}", e);
    }
    served
}
