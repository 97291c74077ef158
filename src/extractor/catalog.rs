use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::app::{ExtractionFailure, Result};
use crate::domain::{ExtractionRules, SourceMeta};
use crate::extractor::consts::{
    ANCHOR_SELECTOR, AUTHOR_PREFIX_REGEX, AUTHOR_SELECTORS, DESCRIPTION_SELECTORS,
    PAGE_TITLE_SELECTOR, PAGE_TITLE_SUFFIX_REGEX, TITLE_SELECTORS, WHITESPACE_REGEX,
};
use crate::extractor::RawCandidate;

pub(crate) fn parse_selector(css: &str) -> std::result::Result<Selector, ExtractionFailure> {
    Selector::parse(css).map_err(|_| ExtractionFailure::InvalidSelector(css.to_string()))
}

pub(crate) fn extract(
    rules: &ExtractionRules,
    base_url: &str,
    html: &str,
) -> Result<(SourceMeta, Vec<RawCandidate>)> {
    let base = Url::parse(base_url)?;
    let list = parse_selector(&rules.chapter_list_selector)?;
    let title_selector = rules
        .chapter_title_selector
        .as_deref()
        .map(parse_selector)
        .transpose()?;
    let link_selector = rules
        .chapter_link_selector
        .as_deref()
        .map(parse_selector)
        .transpose()?;

    let document = Html::parse_document(html);

    let raws = document
        .select(&list)
        .map(|entry| {
            read_entry(
                entry,
                &base,
                rules,
                title_selector.as_ref(),
                link_selector.as_ref(),
            )
        })
        .collect();

    Ok((page_meta(&document), raws))
}

fn read_entry(
    entry: ElementRef,
    base: &Url,
    rules: &ExtractionRules,
    title_selector: Option<&Selector>,
    link_selector: Option<&Selector>,
) -> RawCandidate {
    let title_el = match title_selector {
        Some(selector) => entry.select(selector).next(),
        None => Some(entry),
    };
    let title = title_el.map(element_text).filter(|t| !t.is_empty());

    let link_el = match link_selector {
        Some(selector) => entry.select(selector).next(),
        None if entry.value().name() == "a" => Some(entry),
        None => entry.select(&ANCHOR_SELECTOR).next(),
    };
    let link = link_el
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| resolve_link(base, href));

    let attr = |name: &str| {
        entry
            .value()
            .attr(name)
            .or_else(|| link_el.and_then(|el| el.value().attr(name)))
            .map(|v| v.trim().to_string())
    };

    let key = match &rules.key_attribute {
        Some(name) => attr(name),
        None => link.as_ref().and_then(slug_key),
    };
    let order = rules
        .order_attribute
        .as_deref()
        .and_then(attr)
        .and_then(|v| v.parse::<i64>().ok());

    RawCandidate {
        key,
        title,
        link: link.map(String::from),
        body: None,
        order,
    }
}

/// Resolve against the catalog URL, keeping only web links.
fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Last non-empty path segment without its extension, plus any query string.
///
/// `/book/12/3456.html` gives `3456`; `/read.php?id=9` gives `read?id=9`.
fn slug_key(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.rfind(|s| !s.is_empty())?;
    let stem = segment
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(segment);

    Some(match url.query() {
        Some(query) => format!("{}?{}", stem, query),
        None => stem.to_string(),
    })
}

fn element_text(el: ElementRef) -> String {
    let text: String = el.text().collect();
    WHITESPACE_REGEX.replace_all(text.trim(), " ").into_owned()
}

/// Text of the first matching element; `<meta>` tags yield their content.
fn first_value(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        document.select(&selector).find_map(|el| {
            let value = if el.value().name() == "meta" {
                el.value().attr("content").map(|c| c.trim().to_string())?
            } else {
                element_text(el)
            };
            (!value.is_empty()).then_some(value)
        })
    })
}

fn page_meta(document: &Html) -> SourceMeta {
    let title = first_value(document, TITLE_SELECTORS).or_else(|| {
        document
            .select(&PAGE_TITLE_SELECTOR)
            .next()
            .map(element_text)
            .map(|t| PAGE_TITLE_SUFFIX_REGEX.replace(&t, "").into_owned())
            .filter(|t| !t.is_empty())
    });

    let author = first_value(document, AUTHOR_SELECTORS)
        .map(|a| AUTHOR_PREFIX_REGEX.replace(&a, "").trim().to_string())
        .filter(|a| !a.is_empty());

    SourceMeta {
        title,
        author,
        description: first_value(document, DESCRIPTION_SELECTORS),
    }
}
