use regex::Regex;
use scraper::Selector;
use std::sync::LazyLock;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        pub(crate) static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

selector!(ANCHOR_SELECTOR, "a[href]");
selector!(PAGE_TITLE_SELECTOR, "title");
selector!(BLOCK_CANDIDATE_SELECTOR, "div, article, section, main");

/// Fallback selectors for chapter bodies, most specific first.
pub(crate) const CONTENT_SELECTORS: &[&str] = &[
    "#content",
    "#chaptercontent",
    "#chapter-content",
    "#bookcontent",
    "#booktext",
    "#htmlContent",
    "#nr1",
    "#TextContent",
    ".content",
    ".chaptercontent",
    ".chapter-content",
    ".read-content",
    ".novel-content",
    ".article-content",
    ".txt",
    ".text_content",
    ".book-content",
    ".main-content",
    ".post-content",
    ".entry-content",
    "article",
    "[itemprop='articleBody']",
];

/// Elements that never hold chapter text.
pub(crate) const NOISE_SELECTORS: &[&str] = &[
    "script",
    "style",
    "iframe",
    "noscript",
    "nav",
    ".ad",
    ".ads",
    ".advertisement",
    ".advert",
    "#ad",
    "#ads",
    "#advertisement",
    // Class or id tokens starting with `ad-`/`ads-`; a bare substring would hit `read-content`.
    "[class^='ad-']",
    "[class*=' ad-']",
    "[class^='ads-']",
    "[class*=' ads-']",
    "[id^='ad-']",
    "[id^='ads-']",
    ".banner",
    "#banner",
    ".popup",
    "#popup",
    ".sponsor",
    "#sponsor",
    ".comment",
    "#comment",
    ".comments",
    "#comments",
];

pub(crate) const TITLE_SELECTORS: &[&str] = &[
    "meta[property='og:novel:book_name']",
    "meta[property='og:title']",
    "h1",
    ".book-title",
    ".novel-title",
    "#title",
    ".title",
];

pub(crate) const AUTHOR_SELECTORS: &[&str] = &[
    "meta[property='og:novel:author']",
    "meta[name='author']",
    ".author",
    "#author",
    ".book-author",
    ".writer",
    "[itemprop='author']",
];

pub(crate) const DESCRIPTION_SELECTORS: &[&str] = &[
    "meta[property='og:description']",
    "meta[name='description']",
    ".description",
    "#description",
    ".intro",
    "#intro",
    ".book-intro",
    ".summary",
];

/// Class or id fragments that disqualify a block from the largest-block fallback.
pub(crate) const CHROME_MARKERS: &[&str] =
    &["nav", "header", "footer", "sidebar", "menu", "comment"];

regex!(AUTHOR_PREFIX_REGEX, r"^(作者|作　者|Author|By)\s*[：:]?\s*");
regex!(PAGE_TITLE_SUFFIX_REGEX, r"\s*(_|\s[-|–]\s).*$");
regex!(
    NAV_LINE_REGEX,
    r"(?i)^(上一章|下一章|上一页|下一页|目录|返回目录|加入书签|previous chapter|next chapter|table of contents)$"
);
regex!(URL_LINE_REGEX, r"^(https?://|www\.)\S+$");
regex!(BOOKMARK_LINE_REGEX, r"(?i)ctrl\s*\+\s*d");
regex!(
    AD_PHRASE_REGEX,
    r"(?i)广告|推荐阅读|本章未完|点击[^\n]*?继续阅读|加入书签|手机阅读|\[[^\]\n]*\]"
);
regex!(TEXTLESS_LINE_REGEX, r"^[\p{P}\p{S}\s]*$");
regex!(CHARSET_REGEX, r#"(?i)charset\s*=\s*["']?\s*([a-z0-9_.:-]+)"#);
regex!(CLOSING_QUOTE_REGEX, r"([\x{201D}\x{2019}])\s*");
regex!(WHITESPACE_REGEX, r"\s+");
