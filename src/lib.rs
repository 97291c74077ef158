//! # Folio
//!
//! Keeps a local, offline-readable cache of remote collections (chapter
//! catalogs of serial-fiction sites, RSS/Atom/JSON feeds) in sync with
//! their origin.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → Reconciler → Fetcher → Extractor → Store → Notifier
//! ```
//!
//! One sync of one source runs the reconciler pipeline: fetch the document,
//! extract candidate records, merge them against the cache inside a
//! per-source transaction, commit, then publish what changed. Readers query
//! the store and never wait on the network.
//!
//! ## Quick Start
//!
//! ```bash
//! # Add a catalog page and sync it
//! folio add https://example.com/book/1/
//!
//! # Add a feed
//! folio add --feed https://blog.rust-lang.org/feed.xml
//!
//! # Sync everything, then read one chapter
//! folio sync
//! folio read https://example.com/book/1/ 1001
//!
//! # Keep sources fresh in the foreground
//! folio daemon --interval 15m
//! ```

/// Application context and error handling.
///
/// [`AppContext`](app::AppContext) wires the store, fetcher, notifier,
/// reconciler and scheduler together.
pub mod app;

/// Command-line interface using clap.
///
/// - `add <url>` - Add a source and sync it
/// - `remove <url>` - Remove a source and its records
/// - `sync [<url>]` - Sync one or all sources
/// - `list [--records <url>]` - List sources or cached records
/// - `read <url> <key>` - Print one record, loading its body on demand
/// - `daemon` - Sync stale sources periodically
pub mod cli;

/// Configuration loaded from `~/.config/folio/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Source`](domain::Source): a remote collection and its sync state
/// - [`ContentRecord`](domain::ContentRecord): one cached entry with a content hash
/// - [`SyncRun`](domain::SyncRun): the outcome of one reconciliation
pub mod domain;

/// Turns raw catalog pages, chapter pages and feeds into candidate records.
pub mod extractor;

/// HTTP fetching with conditional requests, retries and backoff.
///
/// - [`Fetcher`](fetcher::Fetcher): async trait the reconciler fetches through
/// - [`HttpFetcher`](fetcher::HttpFetcher): retrying implementation over a [`Transport`](fetcher::Transport)
pub mod fetcher;

/// Change events for cache readers.
pub mod notifier;

/// The per-source sync pipeline.
pub mod reconciler;

/// Staleness checks, bounded concurrency and the daemon loop.
pub mod scheduler;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
