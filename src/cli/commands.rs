use crate::app::{AppContext, FolioError, Result};
use crate::config::parse_interval;
use crate::domain::{ExtractionRules, Source, SourceKind, SyncOutcome, SyncRun};
use crate::scheduler::daemon::{Daemon, DaemonConfig};
use crate::scheduler::Trigger;
use crate::store::Store;

/// Options for `folio add`.
#[derive(Debug, Default)]
pub struct AddOptions {
    pub feed: bool,
    pub list_selector: Option<String>,
    pub content_selector: Option<String>,
    pub fetch_bodies: bool,
    pub allow_empty: bool,
}

impl AddOptions {
    fn kind(&self) -> SourceKind {
        if self.feed {
            return SourceKind::Feed;
        }
        let mut rules = ExtractionRules::universal();
        if let Some(selector) = &self.list_selector {
            rules.chapter_list_selector = selector.clone();
        }
        if let Some(selector) = &self.content_selector {
            rules.content_selector = Some(selector.clone());
        }
        SourceKind::Catalog(rules)
    }
}

pub async fn add_source(ctx: &AppContext, url: &str, options: AddOptions) -> Result<()> {
    url::Url::parse(url)?;

    if ctx.store.get_source_by_location(url)?.is_some() {
        println!("Source already exists: {}", url);
        return Ok(());
    }

    let mut source = Source::new(url.to_string(), options.kind());
    source.policy.fetch_bodies = options.fetch_bodies;
    source.policy.allow_empty = options.allow_empty;
    let source_id = ctx.store.add_source(&source)?;
    println!("Added source: {}", url);

    sync_one(ctx, source_id).await
}

pub async fn remove_source(ctx: &AppContext, url: &str) -> Result<()> {
    let source = find_source(ctx, url)?;
    ctx.store.delete_source(source.id)?;
    println!("Removed source: {}", url);
    Ok(())
}

pub async fn sync_sources(ctx: &AppContext, url: Option<&str>) -> Result<()> {
    if let Some(url) = url {
        let source = find_source(ctx, url)?;
        return sync_one(ctx, source.id).await;
    }

    let sources = ctx.store.get_all_sources()?;
    if sources.is_empty() {
        println!("No sources to sync");
        return Ok(());
    }

    println!("Syncing {} sources...", sources.len());
    let runs = ctx.scheduler.sync_all().await?;

    let mut changes = 0;
    let mut errors = 0;
    for run in &runs {
        changes += run.counts.changed();
        if !run.is_success() {
            errors += 1;
        }
        if let Some(source) = sources.iter().find(|s| s.id == run.source_id) {
            print_run(source.display_title(), run);
        }
    }

    println!("Sync complete: {} changes, {} errors", changes, errors);
    Ok(())
}

async fn sync_one(ctx: &AppContext, source_id: i64) -> Result<()> {
    let ticket = ctx
        .scheduler
        .trigger(source_id, Trigger::Manual)?
        .ok_or_else(|| FolioError::Other("Sync was not started".into()))?;
    let run = ticket
        .wait()
        .await
        .ok_or_else(|| FolioError::Other("Sync task ended without a result".into()))?;

    let title = ctx
        .store
        .get_source(source_id)?
        .map(|s| s.display_title().to_string())
        .unwrap_or_else(|| source_id.to_string());
    print_run(&title, &run);
    Ok(())
}

fn print_run(title: &str, run: &SyncRun) {
    match &run.outcome {
        SyncOutcome::Completed => {
            let c = run.counts;
            println!(
                "  {}: {} new, {} updated, {} orphaned, {} removed",
                title, c.inserted, c.updated, c.orphaned, c.removed
            );
            if run.diagnostics > 0 {
                println!("  {}: {} entries skipped", title, run.diagnostics);
            }
        }
        SyncOutcome::NotModified => println!("  {}: not modified", title),
        SyncOutcome::Failed { message, .. } => eprintln!("  Error syncing {}: {}", title, message),
    }
}

pub fn list_sources(ctx: &AppContext) -> Result<()> {
    let sources = ctx.store.get_all_sources()?;

    if sources.is_empty() {
        println!("No sources");
        return Ok(());
    }

    for source in sources {
        let unread = ctx.store.get_unread_count(source.id)?;
        let synced = source
            .last_synced_at
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let failed = source
            .last_run
            .as_ref()
            .filter(|run| !run.is_success())
            .map(|_| " (last sync failed)")
            .unwrap_or("");
        println!(
            "{} ({} unread, synced {}){}\n  {}",
            source.display_title(),
            unread,
            synced,
            failed,
            source.location
        );
    }

    Ok(())
}

pub fn list_records(ctx: &AppContext, url: &str) -> Result<()> {
    let source = find_source(ctx, url)?;
    let records = ctx.query(source.id)?;

    if records.is_empty() {
        println!("No records");
        return Ok(());
    }

    for record in records {
        let read_marker = if record.is_read { " " } else { "●" };
        let orphan_marker = if record.is_orphaned() { " [gone]" } else { "" };
        println!(
            "{} {:>5} {:<16} {}{}",
            read_marker, record.position, record.natural_key, record.title, orphan_marker
        );
    }

    Ok(())
}

pub async fn read_record(ctx: &AppContext, url: &str, key: &str) -> Result<()> {
    let source = find_source(ctx, url)?;
    let record = ctx.reconciler.load_body(source.id, key).await?;

    println!("{}", record.title);
    if let Some(link) = &record.link {
        println!("{}", link);
    }
    println!();
    match &record.body {
        Some(body) => println!("{}", body),
        None => println!("(no content)"),
    }

    ctx.store.set_read(record.id, true)?;
    Ok(())
}

pub async fn run_daemon(ctx: &AppContext, interval: Option<&str>, no_initial_sync: bool) -> Result<()> {
    let check_interval_secs = match interval {
        Some(s) => parse_interval(s).map_err(FolioError::Config)?,
        None => ctx.config.sync.daemon_interval_secs,
    };

    let daemon = Daemon::new(
        ctx.scheduler.clone(),
        DaemonConfig {
            check_interval_secs,
            sync_on_start: !no_initial_sync,
        },
    );
    daemon.run().await
}

fn find_source(ctx: &AppContext, url: &str) -> Result<Source> {
    ctx.store
        .get_source_by_location(url)?
        .ok_or_else(|| FolioError::SourceNotFound(url.to_string()))
}
