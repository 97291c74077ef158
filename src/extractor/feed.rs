use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::{ExtractionFailure, Result};
use crate::domain::SourceMeta;
use crate::extractor::RawCandidate;

pub(crate) fn extract(raw: &[u8]) -> Result<(SourceMeta, Vec<RawCandidate>)> {
    let feed = parser::parse(raw).map_err(|e| ExtractionFailure::FeedParse(e.to_string()))?;

    let meta = SourceMeta {
        title: feed
            .title
            .map(|t| decode_html_entities(&t.content).to_string()),
        author: feed.authors.first().map(|a| a.name.clone()),
        description: feed
            .description
            .map(|d| decode_html_entities(&d.content).to_string()),
    };

    let raws = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let key = if entry.id.trim().is_empty() {
                link.clone()
            } else {
                Some(entry.id)
            };

            RawCandidate {
                key,
                title: entry
                    .title
                    .map(|t| decode_html_entities(&t.content).trim().to_string()),
                link,
                body: entry
                    .content
                    .and_then(|c| c.body)
                    .or_else(|| entry.summary.map(|s| s.content)),
                order: entry.published.or(entry.updated).map(|dt| dt.timestamp()),
            }
        })
        .collect();

    Ok((meta, raws))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::FolioError;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Serial &amp; Co</title>
    <description>Weekly episodes</description>
    <item>
      <title>Episode 2</title>
      <link>https://example.com/ep2</link>
      <guid>ep-2</guid>
      <pubDate>Mon, 08 Jan 2024 00:00:00 GMT</pubDate>
      <description>Second</description>
    </item>
    <item>
      <title>Episode 1</title>
      <link>https://example.com/ep1</link>
      <guid>ep-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
      <description>First</description>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Serial</title>
  <author><name>R. Vale</name></author>
  <entry>
    <title>Part One</title>
    <link href="https://example.com/part-1"/>
    <id>urn:part:1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <content type="html">&lt;p&gt;Body one&lt;/p&gt;</content>
    <summary>Summary one</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let (meta, raws) = extract(RSS_SAMPLE.as_bytes()).unwrap();

        assert_eq!(meta.title.as_deref(), Some("Serial & Co"));
        assert_eq!(meta.description.as_deref(), Some("Weekly episodes"));
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[0].key.as_deref(), Some("ep-2"));
        assert_eq!(raws[0].title.as_deref(), Some("Episode 2"));
        assert_eq!(raws[0].link.as_deref(), Some("https://example.com/ep2"));
        assert_eq!(raws[0].body.as_deref(), Some("Second"));
        assert!(raws[0].order > raws[1].order);
    }

    #[test]
    fn test_parse_atom_prefers_content() {
        let (meta, raws) = extract(ATOM_SAMPLE.as_bytes()).unwrap();

        assert_eq!(meta.author.as_deref(), Some("R. Vale"));
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].key.as_deref(), Some("urn:part:1"));
        assert!(raws[0].body.as_deref().unwrap().contains("Body one"));
    }

    #[test]
    fn test_garbage_is_feed_parse_error() {
        let err = extract(b"definitely not a feed").unwrap_err();
        assert!(matches!(
            err,
            FolioError::Extraction(ExtractionFailure::FeedParse(_))
        ));
    }
}
