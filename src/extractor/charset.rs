use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use tracing::debug;

use crate::extractor::consts::CHARSET_REGEX;

/// How far into a document a `<meta charset>` declaration is looked for.
const META_SNIFF_LEN: usize = 1024;

/// Decode a fetched document to text.
///
/// A byte order mark wins, then the `Content-Type` charset, then a
/// `<meta>` declaration near the top of the markup. UTF-8 otherwise.
/// Undecodable bytes become U+FFFD.
pub(crate) fn decode<'a>(raw: &'a [u8], content_type: Option<&str>) -> Cow<'a, str> {
    let encoding = content_type
        .and_then(label)
        .or_else(|| {
            let head = String::from_utf8_lossy(&raw[..raw.len().min(META_SNIFF_LEN)]);
            label(&head)
        })
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(raw);
    if had_errors {
        debug!("Document had bytes invalid in {}", used.name());
    }
    text
}

fn label(haystack: &str) -> Option<&'static Encoding> {
    let name = CHARSET_REGEX.captures(haystack)?.get(1)?.as_str();
    let encoding = Encoding::for_label(name.as_bytes());
    if encoding.is_none() {
        debug!("Unknown charset `{}`", name);
    }
    encoding
}
