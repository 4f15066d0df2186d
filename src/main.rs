use anyhow::{Context, Result};
use bozloader::config::{AppConfig, CliConfig, FileConfig};
use bozloader::media_server::{DisabledMediaServer, MediaServer, PlexClient};
use bozloader::notifications::{
    ChatWebhook, DiscordWebhook, EmailSender, MessageRenderer, NotifierDispatch, SmtpEmailSender,
};
use bozloader::server::{metrics, AdminList, ServerConfig, ServerState};
use bozloader::uploads::{
    DecisionEngine, LibraryPublisher, SqliteUploadStore, StorageLayout, UploadIntake, UploadStore,
};
use bozloader::{run_server, RequestsLoggingLevel};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in it override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database file holding upload records.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Directory receiving uploads awaiting review.
    #[clap(long, value_parser = parse_path)]
    pub pending_root: Option<PathBuf>,

    /// Library directory watched by the media server.
    #[clap(long, value_parser = parse_path)]
    pub library_root: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8082)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            db_path: args.db_path.clone(),
            pending_root: args.pending_root.clone(),
            library_root: args.library_root.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
        }
    }
}

fn build_media_server(app_config: &AppConfig) -> Result<Arc<dyn MediaServer>> {
    match &app_config.plex {
        Some(plex) => {
            info!("Plex integration enabled at {}", plex.url);
            Ok(Arc::new(
                PlexClient::new(plex).context("Failed to create Plex client")?,
            ))
        }
        None => {
            info!("Plex integration not configured, library rescans are skipped");
            Ok(Arc::new(DisabledMediaServer))
        }
    }
}

fn build_notifier(app_config: &AppConfig) -> Result<NotifierDispatch> {
    let timeout = Duration::from_secs(app_config.notification_timeout_sec);

    let email: Option<Arc<dyn EmailSender>> = match &app_config.smtp {
        Some(smtp) => {
            info!("Email notifications enabled via {}:{}", smtp.host, smtp.port);
            Some(Arc::new(
                SmtpEmailSender::new(smtp).context("Failed to configure SMTP")?,
            ))
        }
        None => {
            info!("SMTP not configured, email notifications disabled");
            None
        }
    };

    let webhook: Option<Arc<dyn ChatWebhook>> = match &app_config.discord_webhook_url {
        Some(url) => {
            info!("Discord notifications enabled");
            Some(Arc::new(
                DiscordWebhook::new(url.clone(), timeout)
                    .context("Failed to create webhook client")?,
            ))
        }
        None => None,
    };

    if app_config.admin_emails.is_empty() {
        warn!("No admin_emails configured, admin routes will reject every caller");
    }

    Ok(NotifierDispatch::new(
        email,
        webhook,
        MessageRenderer::new(app_config.app_name.clone(), app_config.app_url.clone()),
        app_config.admin_emails.clone(),
        timeout,
    ))
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
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&CliConfig::from(&cli_args), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let layout = Arc::new(StorageLayout::new(
        &app_config.pending_root,
        &app_config.library_root,
        &app_config.upload.allowed_extensions,
    ));
    layout
        .ensure_dirs()
        .await
        .context("Failed to create storage directories")?;
    info!(
        "Pending uploads in {:?}, library in {:?}",
        layout.pending_root(),
        layout.library_root()
    );

    info!("Opening SQLite upload database at {:?}...", app_config.db_path);
    let store: Arc<dyn UploadStore> = Arc::new(SqliteUploadStore::open(&app_config.db_path)?);

    let media_server = build_media_server(&app_config)?;
    let notifier = Arc::new(build_notifier(&app_config)?);

    let intake = Arc::new(UploadIntake::new(
        layout.clone(),
        store.clone(),
        notifier.clone(),
        app_config.upload.max_size_bytes,
    ));
    let publisher = Arc::new(LibraryPublisher::new(layout, media_server.clone()));
    let decisions = Arc::new(DecisionEngine::new(store.clone(), publisher, notifier));

    let state = ServerState {
        config: ServerConfig {
            requests_logging_level: app_config.logging_level.clone(),
            port: app_config.port,
            metrics_port: app_config.metrics_port,
            app_name: app_config.app_name.clone(),
        },
        start_time: Instant::now(),
        hash: env!("GIT_HASH").to_string(),
        store,
        intake,
        decisions,
        media_server,
        admins: AdminList::new(&app_config.admin_emails),
    };

    run_server(state).await
}
