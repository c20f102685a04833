use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lego_catalog::catalog_store::{CatalogStore, SqliteCatalogStore};
use lego_catalog::catalog_sync::CatalogSync;
use lego_catalog::config::{AppConfig, CliConfig, FileConfig};
use lego_catalog::image_pipeline::{
    HttpImageFetcher, ImageStorer, ImageTaskStore, ImageWorker, SqliteImageTaskStore,
};
use lego_catalog::rebrickable::RebrickableClient;
use lego_catalog::user::{SqliteUserStore, UserManager};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
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

    /// Directory where downloaded images are stored.
    #[clap(long, value_parser = parse_path)]
    pub static_dir: Option<PathBuf>,

    /// Root URL of the Rebrickable API.
    #[clap(long)]
    pub api_url: Option<String>,

    /// Rebrickable API key.
    #[clap(long)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a user that can log in with the given password.
    AddUser {
        user_handle: String,
        password: String,
    },

    /// Replaces the password of an existing user.
    SetPassword {
        user_handle: String,
        password: String,
    },

    /// Shows all user handles.
    UserHandles,

    /// Adds new sets or refreshes existing ones from the Rebrickable API.
    LoadSet {
        #[clap(required = true)]
        lego_ids: Vec<String>,
    },

    /// Runs queued image tasks until the queue is empty.
    StoreImages {
        /// Stop after this many tasks.
        #[clap(long)]
        max_tasks: Option<usize>,
    },
}

impl CliArgs {
    fn resolve_config(&self) -> Result<AppConfig> {
        let file_config = self
            .config
            .as_deref()
            .map(FileConfig::load)
            .transpose()?;
        let cli = CliConfig {
            db_dir: self.db_dir.clone(),
            static_dir: self.static_dir.clone(),
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            ..CliConfig::default()
        };
        AppConfig::resolve(&cli, file_config)
    }
}

fn user_manager(config: &AppConfig) -> Result<UserManager> {
    let user_store = Arc::new(SqliteUserStore::new(config.user_db_path())?);
    Ok(UserManager::new(user_store))
}

fn open_catalog(config: &AppConfig) -> Result<(Arc<dyn CatalogStore>, Arc<dyn ImageTaskStore>)> {
    let catalog_store: Arc<dyn CatalogStore> =
        Arc::new(SqliteCatalogStore::new(config.catalog_db_path())?);
    let image_tasks: Arc<dyn ImageTaskStore> =
        Arc::new(SqliteImageTaskStore::new(config.image_queue_db_path())?);
    Ok((catalog_store, image_tasks))
}

async fn load_sets(config: &AppConfig, lego_ids: &[String]) -> Result<()> {
    let Some(api_key) = config.api_key.as_deref() else {
        bail!("A Rebrickable API key is required to load sets");
    };
    let (catalog_store, image_tasks) = open_catalog(config)?;
    let api = Arc::new(RebrickableClient::new(
        &config.api_url,
        api_key,
        config.api_timeout_sec,
    )?);
    let sync = CatalogSync::new(catalog_store, api, image_tasks);

    let mut failures = 0;
    for lego_id in lego_ids {
        match sync.update_set(lego_id).await {
            Ok(report) => println!("{}: {}", lego_id, report),
            Err(err) => {
                error!("Failed to load set {}: {}", lego_id, err);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{} of {} sets failed to load", failures, lego_ids.len());
    }
    Ok(())
}

async fn store_images(config: &AppConfig, max_tasks: Option<usize>) -> Result<()> {
    let (catalog_store, image_tasks) = open_catalog(config)?;
    let requeued = image_tasks.requeue_running()?;
    if requeued > 0 {
        info!("Requeued {} interrupted image tasks", requeued);
    }

    let fetcher = Arc::new(HttpImageFetcher::new(config.image_timeout_sec)?);
    let storer = Arc::new(ImageStorer::new(
        catalog_store,
        fetcher,
        config.static_dir.clone(),
    ));
    let worker = ImageWorker::new(image_tasks, storer, config.image_worker_poll_interval());

    let processed = worker.run_pending(max_tasks).await?;
    println!("Processed {} image tasks", processed);
    Ok(())
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

    let config = cli_args.resolve_config()?;

    match &cli_args.command {
        Command::AddUser {
            user_handle,
            password,
        } => {
            let user_manager = user_manager(&config)?;
            let user_id = user_manager.add_user(user_handle)?;
            user_manager
                .set_password(user_handle, password)
                .with_context(|| format!("User {} created without a password", user_handle))?;
            println!("Created user {} ({})", user_handle, user_id);
        }
        Command::SetPassword {
            user_handle,
            password,
        } => {
            user_manager(&config)?.set_password(user_handle, password)?;
            println!("Password updated for {}", user_handle);
        }
        Command::UserHandles => {
            for handle in user_manager(&config)?.get_all_user_handles()? {
                println!("{}", handle);
            }
        }
        Command::LoadSet { lego_ids } => load_sets(&config, lego_ids).await?,
        Command::StoreImages { max_tasks } => store_images(&config, *max_tasks).await?,
    }
    Ok(())
}
