use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{FolioError, Result};
use crate::config::Config;
use crate::domain::ContentRecord;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::notifier::{ChangeNotifier, Subscription};
use crate::reconciler::Reconciler;
use crate::scheduler::SyncScheduler;
use crate::store::{SqliteStore, Store};

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub notifier: Arc<ChangeNotifier>,
    pub reconciler: Arc<Reconciler>,
    pub scheduler: Arc<SyncScheduler>,
}

impl AppContext {
    pub fn new(db_path: Option<PathBuf>, config: Config) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let fetcher = Arc::new(HttpFetcher::with_user_agent(&config.fetch.user_agent)?);
        Ok(Self::with_parts(store, fetcher, config))
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let fetcher = Arc::new(HttpFetcher::with_user_agent(&config.fetch.user_agent)?);
        Ok(Self::with_parts(store, fetcher, config))
    }

    /// Wire the engine around an existing store and fetcher.
    pub fn with_parts(
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        config: Config,
    ) -> Self {
        let notifier = Arc::new(ChangeNotifier::new(config.notifier.buffer));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            fetcher.clone(),
            notifier.clone(),
            config.sync.clone(),
            config.fetch.clone(),
        ));
        let scheduler = Arc::new(SyncScheduler::new(reconciler.clone(), &config.sync));

        Self {
            config,
            store,
            fetcher,
            notifier,
            reconciler,
            scheduler,
        }
    }

    /// Cached records of a source in reading order. Never touches the network.
    pub fn query(&self, source_id: i64) -> Result<Vec<ContentRecord>> {
        self.store.get_records(source_id)
    }

    pub fn subscribe(&self, source_id: Option<i64>) -> Subscription {
        self.notifier.subscribe(source_id)
    }

    pub fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| FolioError::Config("Could not find data directory".into()))?;
        let folio_dir = data_dir.join("folio");
        std::fs::create_dir_all(&folio_dir)?;
        Ok(folio_dir.join("folio.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Source, SourceKind};
    use crate::fetcher::testing::ScriptedTransport;
    use crate::fetcher::TransportResponse;
    use crate::notifier::ChangeEvent;
    use crate::scheduler::Trigger;

    const FEED: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel>
        <title>Context Feed</title>
        <item><guid>a</guid><title>First</title><link>https://example.com/a</link>
          <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
        <item><guid>b</guid><title>Second</title><link>https://example.com/b</link>
          <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate></item>
        </channel></rss>"#;

    #[tokio::test]
    async fn test_sync_then_query_from_cache() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("https://example.com/feed", Ok(TransportResponse::ok(FEED)));
        let ctx = AppContext::with_parts(
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(HttpFetcher::with_transport(transport.clone())),
            Config::default(),
        );
        let id = ctx
            .store
            .add_source(&Source::new("https://example.com/feed".into(), SourceKind::Feed))
            .unwrap();
        let mut sub = ctx.subscribe(Some(id));

        let run = ctx
            .scheduler
            .trigger(id, Trigger::Manual)
            .unwrap()
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(run.counts.inserted, 2);

        let records = ctx.query(id).unwrap();
        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);

        // Reading again does not hit the network.
        ctx.query(id).unwrap();
        assert_eq!(transport.requests().len(), 1);

        let mut inserted = 0;
        while let Some(event) = sub.try_recv() {
            if matches!(event, ChangeEvent::Inserted(_)) {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 2);
    }
}
