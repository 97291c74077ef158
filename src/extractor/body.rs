use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::domain::ExtractionRules;
use crate::extractor::consts::{
    AD_PHRASE_REGEX, BLOCK_CANDIDATE_SELECTOR, BOOKMARK_LINE_REGEX, CHROME_MARKERS,
    CLOSING_QUOTE_REGEX, CONTENT_SELECTORS, NAV_LINE_REGEX, NOISE_SELECTORS,
    TEXTLESS_LINE_REGEX, URL_LINE_REGEX,
};

/// Fallback selectors must match at least this much text to be trusted.
const MIN_SELECTOR_TEXT: usize = 100;
/// The largest-block heuristic ignores anything shorter.
const MIN_BLOCK_TEXT: usize = 200;

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "pre", "tr",
];

pub(crate) fn extract(rules: Option<&ExtractionRules>, html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let skip = skipped_nodes(&document, rules);

    let configured = rules
        .and_then(|r| r.content_selector.as_deref())
        .and_then(|css| match Selector::parse(css) {
            Ok(selector) => Some(selector),
            Err(_) => {
                debug!("Ignoring invalid content selector `{}`", css);
                None
            }
        });

    let from_configured = configured.as_ref().and_then(|selector| {
        document
            .select(selector)
            .map(|el| clean(&render(el, &skip)))
            .find(|text| !text.is_empty())
    });

    let text = from_configured
        .or_else(|| {
            CONTENT_SELECTORS.iter().find_map(|css| {
                let selector = Selector::parse(css).ok()?;
                document
                    .select(&selector)
                    .map(|el| clean(&render(el, &skip)))
                    .find(|text| text.chars().count() > MIN_SELECTOR_TEXT)
            })
        })
        .or_else(|| largest_block(&document, &skip))?;

    (!text.is_empty()).then_some(text)
}

/// Noise elements plus whatever the rules ask to remove.
fn skipped_nodes<'a>(document: &'a Html, rules: Option<&ExtractionRules>) -> Vec<ElementRef<'a>> {
    let extra = rules.map(|r| r.remove_selectors.as_slice()).unwrap_or_default();

    NOISE_SELECTORS
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .filter_map(|css| Selector::parse(css).ok())
        .flat_map(|selector| document.select(&selector).collect::<Vec<_>>())
        .collect()
}

fn largest_block(document: &Html, skip: &[ElementRef]) -> Option<String> {
    document
        .select(&BLOCK_CANDIDATE_SELECTOR)
        .filter(|el| !skip.contains(el) && !is_page_chrome(*el))
        .map(|el| clean(&render(el, skip)))
        .filter(|text| text.chars().count() > MIN_BLOCK_TEXT)
        .max_by_key(|text| text.chars().count())
}

fn is_page_chrome(el: ElementRef) -> bool {
    let value = el.value();
    let id = value.id().unwrap_or_default().to_ascii_lowercase();
    let class = value.attr("class").unwrap_or_default().to_ascii_lowercase();
    CHROME_MARKERS
        .iter()
        .any(|marker| id.contains(marker) || class.contains(marker))
}

/// Flatten an element to text, turning `<br>` and block boundaries into newlines.
fn render(el: ElementRef, skip: &[ElementRef]) -> String {
    let mut out = String::new();
    render_into(el, skip, &mut out);
    out
}

fn render_into(el: ElementRef, skip: &[ElementRef], out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&text.replace(['\r', '\n'], " ")),
            Node::Element(element) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                if skip.contains(&child_el) {
                    continue;
                }
                let name = element.name();
                if name == "br" {
                    out.push('\n');
                } else if BLOCK_TAGS.contains(&name) {
                    out.push('\n');
                    render_into(child_el, skip, out);
                    out.push('\n');
                } else {
                    render_into(child_el, skip, out);
                }
            }
            _ => {}
        }
    }
}

/// Trim lines, drop empty ones and the usual site furniture.
pub(crate) fn clean(text: &str) -> String {
    let text = if text.trim().contains('\n') {
        text.to_string()
    } else {
        CLOSING_QUOTE_REGEX.replace_all(text, "$1\n").into_owned()
    };

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !NAV_LINE_REGEX.is_match(line))
        .filter(|line| !URL_LINE_REGEX.is_match(line))
        .filter(|line| !BOOKMARK_LINE_REGEX.is_match(line))
        .map(strip_ads)
        .filter(|line| !TEXTLESS_LINE_REGEX.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove inline ad phrases and bracketed promos; a line left with only punctuation goes too.
fn strip_ads(line: &str) -> String {
    AD_PHRASE_REGEX.replace_all(line, "").trim().to_string()
}
