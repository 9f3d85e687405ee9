use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use restock_watcher::AppConfig;
use restock_watcher::backup::BackupManager;
use restock_watcher::cache::CachedProvider;
use restock_watcher::notify::{LogDispatcher, NotificationDispatcher, WebhookDispatcher};
use restock_watcher::provider::{HttpStockProvider, StockProvider};
use restock_watcher::repository::Repository;
use restock_watcher::scheduler::PollScheduler;

#[derive(Parser, Debug)]
#[command(name = "restock-watcher", version, about = "Stock monitor for retailer product sizes")]
struct Cli {
    /// Run a single poll cycle and exit.
    #[arg(long)]
    check_once: bool,

    /// Create a database backup and exit.
    #[arg(long)]
    backup_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Invalid configuration refuses to run.
    let config = AppConfig::from_env()?;
    let _guard = init_tracing(&config)?;

    info!("starting restock-watcher");

    let repository = Arc::new(
        Repository::open(&config.database.path, config.database.max_connections).await?,
    );
    let backup = Arc::new(BackupManager::new(
        config.database.path.clone(),
        config.backup.dir.clone(),
        config.backup.retention,
    ));

    if cli.backup_now {
        let record = backup.run_backup()?;
        info!(path = %record.path.display(), "backup written");
        return Ok(());
    }

    let provider: Arc<dyn StockProvider> =
        Arc::new(HttpStockProvider::new(config.provider.clone())?);
    let provider: Arc<dyn StockProvider> = if config.cache.enabled {
        Arc::new(CachedProvider::new(provider, config.cache.ttl()))
    } else {
        provider
    };

    let dispatcher: Arc<dyn NotificationDispatcher> =
        match WebhookDispatcher::from_config(&config.notifications)? {
            Some(webhook) => Arc::new(webhook),
            None => Arc::new(LogDispatcher),
        };

    let scheduler = PollScheduler::new(
        Arc::clone(&repository),
        provider,
        dispatcher,
        config.clone(),
    );
    let handle = scheduler.start();

    if cli.check_once {
        let summary = handle.check_now().await?;
        info!(?summary, "cycle complete");
        handle.stop().await?;
        return Ok(());
    }

    let backup_task = Arc::clone(&backup).start(config.backup.interval());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.stop().await?;
    backup_task.abort();

    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("restock_watcher=debug".parse()?);

    match &config.log.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| "restock-watcher.log".into());

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}
