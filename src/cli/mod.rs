pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Keeps a local cache of remote catalogs and feeds in sync", long_about = None)]
pub struct Cli {
    /// Maximum sources synced at once (overrides the config file)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Database path (default: data dir/folio/folio.db)
    #[arg(long, global = true)]
    pub db: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a source and sync it once
    Add {
        /// URL of the catalog page or feed
        url: String,
        /// Treat the URL as an RSS/Atom/JSON feed
        #[arg(long)]
        feed: bool,
        /// CSS selector matching one element per entry (default: built-in catalog rules)
        #[arg(long, conflicts_with = "feed")]
        list_selector: Option<String>,
        /// CSS selector for entry body text
        #[arg(long, conflicts_with = "feed")]
        content_selector: Option<String>,
        /// Fetch entry bodies during sync instead of on first read
        #[arg(long)]
        fetch_bodies: bool,
        /// Accept documents that contain no entries
        #[arg(long)]
        allow_empty: bool,
    },
    /// Remove a source and everything cached for it
    Remove {
        /// URL of the source to remove
        url: String,
    },
    /// Sync one source, or every source
    Sync {
        /// URL of the source to sync (default: all)
        url: Option<String>,
    },
    /// List sources, or the cached records of one source
    List {
        /// Show records of this source instead of the sources
        #[arg(long, value_name = "URL")]
        records: Option<String>,
    },
    /// Print one record, fetching its body if it was never loaded
    Read {
        /// URL of the source
        url: String,
        /// Natural key of the record
        key: String,
    },
    /// Run in the foreground, syncing sources as they go stale
    Daemon {
        /// Check interval (e.g., "15m", "1h", "1d"); config value when omitted
        #[arg(short, long)]
        interval: Option<String>,

        /// Skip the check on start
        #[arg(long)]
        no_initial_sync: bool,
    },
}
