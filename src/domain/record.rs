use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A record produced by extraction, not yet merged into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub natural_key: String,
    pub title: String,
    pub position: i64,
    pub link: Option<String>,
    /// `None` means the body is unknown, not empty. Merging keeps the cached body.
    pub body: Option<String>,
}

impl Candidate {
    pub fn new(natural_key: impl Into<String>, title: impl Into<String>, position: i64) -> Self {
        Self {
            natural_key: natural_key.into(),
            title: title.into(),
            position,
            link: None,
            body: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: i64,
    pub source_id: i64,
    pub natural_key: String,
    pub title: String,
    pub position: i64,
    pub link: Option<String>,
    pub body: Option<String>,
    pub content_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub orphaned_at: Option<DateTime<Utc>>,
    // Local-only state, never written by a sync.
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl ContentRecord {
    pub fn from_candidate(source_id: i64, candidate: Candidate, now: DateTime<Utc>) -> Self {
        let content_hash = Self::compute_hash(&candidate.title, candidate.body.as_deref());
        Self {
            id: 0,
            source_id,
            natural_key: candidate.natural_key,
            title: candidate.title,
            position: candidate.position,
            link: candidate.link,
            body: candidate.body,
            content_hash,
            first_seen_at: now,
            last_updated_at: now,
            last_seen_at: now,
            orphaned_at: None,
            is_read: false,
            read_at: None,
            note: None,
        }
    }

    /// SHA-256 over title and body; a missing body hashes like an empty one.
    pub fn compute_hash(title: &str, body: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update([0u8]);
        hasher.update(body.unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Replace the body and keep the hash in step with it.
    pub fn replace_body(&mut self, body: Option<String>) {
        self.content_hash = Self::compute_hash(&self.title, body.as_deref());
        self.body = body;
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned_at.is_some()
    }

    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }
}
