//! Turns fetched documents into candidate records.
//!
//! Catalog sources are HTML tables of contents read with CSS selectors;
//! feed sources go through feed-rs. Both produce [`RawCandidate`]s which
//! are validated one by one here: a broken entry is dropped with a
//! [`Diagnostic`] and never aborts the rest of the document.

mod body;
mod catalog;
mod charset;
mod consts;
mod feed;

use std::collections::HashSet;

use tracing::debug;

use crate::app::{ExtractionFailure, Result};
use crate::domain::{Candidate, SourceKind, SourceMeta};

/// Why a single entry of a document was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Index of the entry in document order.
    pub index: usize,
    pub failure: ExtractionFailure,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub meta: SourceMeta,
    /// Valid candidates in document order.
    pub candidates: Vec<Candidate>,
    pub diagnostics: Vec<Diagnostic>,
}

/// An entry as read from the markup, before validation.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawCandidate {
    pub key: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub body: Option<String>,
    /// Explicit ordering value declared by the document.
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a source's record listing.
    ///
    /// `content_type` is the response header, used to pick the charset of
    /// HTML documents. Feeds declare their own encoding.
    ///
    /// Fails with [`ExtractionFailure::EmptyResult`] when no entry survives validation.
    pub fn extract(
        &self,
        kind: &SourceKind,
        base_url: &str,
        raw: &[u8],
        content_type: Option<&str>,
    ) -> Result<Extraction> {
        let (meta, raws) = match kind {
            SourceKind::Catalog(rules) => {
                let html = charset::decode(raw, content_type);
                catalog::extract(rules, base_url, &html)?
            }
            SourceKind::Feed => feed::extract(raw)?,
        };

        let found = raws.len();
        let extraction = validate(meta, raws);
        debug!(
            "Extracted {} of {} entries from {} ({} dropped)",
            extraction.candidates.len(),
            found,
            base_url,
            extraction.diagnostics.len()
        );

        if extraction.candidates.is_empty() {
            return Err(ExtractionFailure::EmptyResult.into());
        }
        Ok(extraction)
    }

    /// Pull readable text out of a record's own page.
    pub fn extract_body(
        &self,
        kind: &SourceKind,
        raw: &[u8],
        content_type: Option<&str>,
    ) -> Option<String> {
        let html = charset::decode(raw, content_type);
        body::extract(kind.rules(), &html)
    }
}

/// Drop entries without key or title and later duplicates of a key.
///
/// Explicit ordering values are used only when every valid entry carries
/// one; otherwise positions follow document order.
fn validate(meta: SourceMeta, raws: Vec<RawCandidate>) -> Extraction {
    let mut seen = HashSet::new();
    let mut diagnostics = Vec::new();
    let mut valid = Vec::new();

    for (index, raw) in raws.into_iter().enumerate() {
        let key = raw.key.as_deref().map(str::trim).unwrap_or_default();
        let title = raw.title.as_deref().map(str::trim).unwrap_or_default();

        let reason = if key.is_empty() {
            Some("missing natural key".to_string())
        } else if title.is_empty() {
            Some(format!("entry `{}` has no title", key))
        } else if !seen.insert(key.to_string()) {
            Some(format!("duplicate natural key `{}`", key))
        } else {
            None
        };

        if let Some(reason) = reason {
            debug!("Dropping entry {}: {}", index, reason);
            diagnostics.push(Diagnostic {
                index,
                failure: ExtractionFailure::MalformedCandidate(reason),
            });
            continue;
        }

        let mut candidate = Candidate::new(key, title, index as i64);
        candidate.link = raw.link;
        candidate.body = raw.body.filter(|b| !b.trim().is_empty());
        valid.push((candidate, raw.order));
    }

    let explicit = !valid.is_empty() && valid.iter().all(|(_, order)| order.is_some());
    let candidates = valid
        .into_iter()
        .enumerate()
        .map(|(i, (mut candidate, order))| {
            candidate.position = if explicit {
                order.unwrap_or_default()
            } else {
                i as i64
            };
            candidate
        })
        .collect();

    Extraction {
        meta,
        candidates,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::FolioError;
    use crate::domain::ExtractionRules;

    fn raw(key: Option<&str>, title: Option<&str>) -> RawCandidate {
        RawCandidate {
            key: key.map(String::from),
            title: title.map(String::from),
            ..RawCandidate::default()
        }
    }

    #[test]
    fn test_validate_drops_invalid_and_keeps_order() {
        let raws = vec![
            raw(Some("a"), Some("A")),
            raw(None, Some("no key")),
            raw(Some("b"), Some("  ")),
            raw(Some("c"), Some("C")),
            raw(Some("a"), Some("A again")),
        ];
        let extraction = validate(SourceMeta::default(), raws);

        let keys: Vec<_> = extraction
            .candidates
            .iter()
            .map(|c| c.natural_key.as_str())
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(extraction.candidates[1].position, 1);

        let dropped: Vec<_> = extraction.diagnostics.iter().map(|d| d.index).collect();
        assert_eq!(dropped, vec![1, 2, 4]);
    }

    #[test]
    fn test_explicit_order_wins_only_when_complete() {
        let mut first = raw(Some("a"), Some("A"));
        first.order = Some(20);
        let mut second = raw(Some("b"), Some("B"));
        second.order = Some(10);

        let extraction = validate(SourceMeta::default(), vec![first.clone(), second]);
        assert_eq!(extraction.candidates[0].position, 20);
        assert_eq!(extraction.candidates[1].position, 10);
        // Output stays in document order.
        assert_eq!(extraction.candidates[0].natural_key, "a");

        let extraction = validate(
            SourceMeta::default(),
            vec![first, raw(Some("b"), Some("B"))],
        );
        assert_eq!(extraction.candidates[0].position, 0);
        assert_eq!(extraction.candidates[1].position, 1);
    }

    #[test]
    fn test_blank_body_treated_as_unknown() {
        let mut entry = raw(Some("a"), Some("A"));
        entry.body = Some("   ".into());
        let extraction = validate(SourceMeta::default(), vec![entry]);
        assert_eq!(extraction.candidates[0].body, None);
    }

    #[test]
    fn test_empty_document_is_empty_result() {
        let kind = SourceKind::Catalog(ExtractionRules::universal());
        let err = Extractor::new()
            .extract(
                &kind,
                "https://example.com/book/1/",
                b"<html><body></body></html>",
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            FolioError::Extraction(ExtractionFailure::EmptyResult)
        ));
    }

    #[test]
    fn test_gbk_catalog_decoded_from_header() {
        let html = r#"<html><head><title>长夜</title></head><body><div id="list"><dl>
            <dd><a href="/book/1/1.html">第一章 出发</a></dd>
            <dd><a href="/book/1/2.html">第二章 归来</a></dd>
        </dl></div></body></html>"#;
        let (raw, _, _) = encoding_rs::GBK.encode(html);
        let kind = SourceKind::Catalog(ExtractionRules::universal());

        let extraction = Extractor::new()
            .extract(
                &kind,
                "https://example.com/book/1/",
                &raw,
                Some("text/html; charset=gbk"),
            )
            .unwrap();
        let titles: Vec<_> = extraction
            .candidates
            .iter()
            .map(|c| c.title.as_str())
            .collect();
        assert_eq!(titles, vec!["第一章 出发", "第二章 归来"]);
    }

    #[test]
    fn test_gbk_body_decoded_from_meta() {
        let story = "雨下了一整夜，街上没有一个行人。".repeat(10);
        let html = format!(
            r#"<html><head><meta charset="gbk"></head><body><div id="content">{}</div></body></html>"#,
            story
        );
        let (raw, _, _) = encoding_rs::GBK.encode(&html);
        let kind = SourceKind::Catalog(ExtractionRules::universal());

        let body = Extractor::new().extract_body(&kind, &raw, None).unwrap();
        assert_eq!(body, story);
    }

    #[test]
    fn test_all_invalid_is_empty_result() {
        let html = r#"<div id="list"><dl>
            <dd><a href="javascript:void(0)">Broken</a></dd>
            <dd><a href="/book/1/2.html"></a></dd>
        </dl></div>"#;
        let kind = SourceKind::Catalog(ExtractionRules::universal());
        let err = Extractor::new()
            .extract(&kind, "https://example.com/book/1/", html.as_bytes(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            FolioError::Extraction(ExtractionFailure::EmptyResult)
        ));
    }
}
