use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use folio::app::AppContext;
use folio::cli::commands::{self, AddOptions};
use folio::cli::{Cli, Commands};
use folio::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(workers) = cli.workers {
        config.sync.max_concurrent_syncs = workers;
    }
    let ctx = AppContext::new(cli.db, config)?;

    match cli.command {
        Commands::Add {
            url,
            feed,
            list_selector,
            content_selector,
            fetch_bodies,
            allow_empty,
        } => {
            let options = AddOptions {
                feed,
                list_selector,
                content_selector,
                fetch_bodies,
                allow_empty,
            };
            commands::add_source(&ctx, &url, options).await?;
        }
        Commands::Remove { url } => {
            commands::remove_source(&ctx, &url).await?;
        }
        Commands::Sync { url } => {
            commands::sync_sources(&ctx, url.as_deref()).await?;
        }
        Commands::List { records } => match records {
            Some(url) => commands::list_records(&ctx, &url)?,
            None => commands::list_sources(&ctx)?,
        },
        Commands::Read { url, key } => {
            commands::read_record(&ctx, &url, &key).await?;
        }
        Commands::Daemon {
            interval,
            no_initial_sync,
        } => {
            commands::run_daemon(&ctx, interval.as_deref(), no_initial_sync).await?;
        }
    }

    Ok(())
}
