use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::SyncRun;

/// Selector set used to pull a chapter catalog out of an HTML page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionRules {
    /// Selects one element per chapter entry.
    pub chapter_list_selector: String,
    /// Title element inside each entry; the entry's own text when unset.
    pub chapter_title_selector: Option<String>,
    /// Link element inside each entry; the entry itself or its first `<a>` when unset.
    pub chapter_link_selector: Option<String>,
    /// Attribute carrying a stable key. Falls back to the link's last path segment.
    pub key_attribute: Option<String>,
    /// Attribute carrying an explicit ordering value. Overrides document order.
    pub order_attribute: Option<String>,
    /// Selector for chapter body text on a chapter page.
    pub content_selector: Option<String>,
    /// Elements skipped when reading chapter bodies.
    pub remove_selectors: Vec<String>,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self::universal()
    }
}

impl ExtractionRules {
    /// Catch-all rule set covering the markup of most serial-fiction sites.
    pub fn universal() -> Self {
        Self {
            chapter_list_selector: [
                "#list dd a",
                ".listmain dd a",
                "#chapterlist a",
                ".chapter-list a",
                ".mulu a",
                ".catalog a",
                ".volume a",
                "ul.list a",
                ".chapters a",
                "#catalog a",
                ".booklist a",
                ".dirlist a",
                "#dir a",
                ".chapterlist a",
                "ol.toc a",
            ]
            .join(", "),
            chapter_title_selector: None,
            chapter_link_selector: None,
            key_attribute: None,
            order_attribute: None,
            content_selector: Some(
                [
                    "#content",
                    "#chaptercontent",
                    "#booktxt",
                    "#booktext",
                    "#htmlContent",
                    ".chapter-content",
                    ".read-content",
                    ".article-content",
                ]
                .join(", "),
            ),
            remove_selectors: [
                "script", "style", "iframe", ".ad", ".ads", ".advertisement", ".banner",
                ".popup", ".comment", ".comments",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Which structural rule set applies to a source's documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// An HTML table of contents, read with CSS selectors.
    Catalog(ExtractionRules),
    /// An RSS, Atom or JSON feed.
    Feed,
}

impl SourceKind {
    pub fn rules(&self) -> Option<&ExtractionRules> {
        match self {
            SourceKind::Catalog(rules) => Some(rules),
            SourceKind::Feed => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Overrides the global staleness TTL for this source.
    pub staleness_ttl_secs: Option<u64>,
    /// Accept a document with zero records instead of failing the run.
    pub allow_empty: bool,
    /// Fetch chapter bodies during sync rather than on first read.
    pub fetch_bodies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub location: String,
    pub kind: SourceKind,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub policy: SyncPolicy,
    pub last_run: Option<SyncRun>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn new(location: String, kind: SourceKind) -> Self {
        Self {
            id: 0,
            location,
            kind,
            title: None,
            author: None,
            description: None,
            etag: None,
            last_modified: None,
            last_synced_at: None,
            policy: SyncPolicy::default(),
            last_run: None,
            created_at: Utc::now(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.location)
    }

    pub fn staleness_ttl(&self, default_ttl_secs: u64) -> Duration {
        let secs = self.policy.staleness_ttl_secs.unwrap_or(default_ttl_secs);
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// A source is due when it has never synced or its last sync is older than its TTL.
    pub fn is_due(&self, now: DateTime<Utc>, default_ttl_secs: u64) -> bool {
        match self.last_synced_at {
            None => true,
            Some(last) => now.signed_duration_since(last) > self.staleness_ttl(default_ttl_secs),
        }
    }
}

/// Metadata about the collection itself, refreshed on every successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMeta {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
}

/// HTTP cache validators remembered for the next conditional fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Fields to change on a source. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    /// Replaces both stored validators, clearing the ones that are `None`.
    pub validators: Option<Validators>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_run: Option<SyncRun>,
}

impl SourceUpdate {
    pub fn with_meta(mut self, meta: SourceMeta) -> Self {
        self.title = meta.title;
        self.author = meta.author;
        self.description = meta.description;
        self
    }
}
