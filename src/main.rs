use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod catalog_store;
use catalog_store::{CatalogStore, SqliteCatalogStore};

mod image_events;
use image_events::{run_consumer, ChannelSubscription, ImageEventConsumer, ImageEventTopics};

mod server;
use server::{run_server, RequestsLoggingLevel};

mod sqlite_persistence;

const IMAGE_EVENT_CHANNEL_CAPACITY: usize = 64;

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
    /// Path to the SQLite catalog database file.
    #[clap(value_parser = parse_path)]
    pub catalog_db: PathBuf,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Bearer token required on admin routes. The admin surface rejects
    /// every request when unset.
    #[clap(long)]
    pub admin_token: Option<String>,

    /// Number of read-only connections kept in the SQLite read pool.
    #[clap(long, default_value_t = 4)]
    pub read_pool_size: usize,

    /// Topic carrying image upload events.
    #[clap(long, default_value = "image.uploaded")]
    pub topic_image_uploaded: String,

    /// Topic carrying image deletion events.
    #[clap(long, default_value = "image.deleted")]
    pub topic_image_deleted: String,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,
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
        .try_init()
        .unwrap();

    info!(
        "Opening SQLite catalog database at {:?}...",
        cli_args.catalog_db
    );
    let catalog_store = Arc::new(SqliteCatalogStore::new(
        &cli_args.catalog_db,
        cli_args.read_pool_size,
    )?);

    // Initialize metrics system
    info!("Initializing metrics...");
    server::metrics::init_metrics();
    server::metrics::init_catalog_metrics(&catalog_store.counts()?);

    let topics = ImageEventTopics {
        uploaded: cli_args.topic_image_uploaded,
        deleted: cli_args.topic_image_deleted,
    };
    let (image_event_tx, subscription) = ChannelSubscription::channel(IMAGE_EVENT_CHANNEL_CAPACITY);
    let consumer = ImageEventConsumer::new(catalog_store.clone());
    tokio::spawn(async move {
        if let Err(err) = run_consumer(consumer, topics, subscription).await {
            error!("Image event consumer stopped: {}", err);
        }
    });
    // Held for the process lifetime. Broker bridges hand (topic, payload)
    // pairs to this sender.
    let _image_event_tx = image_event_tx;

    info!("Ready to serve at port {}!", cli_args.port);
    info!("Metrics available at port {}!", cli_args.metrics_port);
    run_server(
        catalog_store,
        cli_args.logging_level,
        cli_args.port,
        cli_args.metrics_port,
        cli_args.admin_token,
        cli_args.frontend_dir_path,
    )
    .await
}
