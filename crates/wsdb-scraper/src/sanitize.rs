//! Title and text cleanup shared by every marketplace adapter.

use std::sync::LazyLock;

use regex::Regex;

use crate::extract::decode_entities;

/// Trailing marketplace ids such as `_1600512345678.html` or `-889900112`.
static TRAILING_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\s_-]+\d{6,}(?:\.[a-z0-9]{2,5})?\s*$").expect("valid regex")
});

/// Runs of separators (with surrounding space) that collapse to one ` - `.
static SEPARATOR_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:[|｜]\s*|-\s+-\s*)+").expect("valid regex"));

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

/// Site names stripped from the end of page titles.
const SITE_SUFFIXES: &[&str] = &[
    "alibaba.com",
    "dhgate.com",
    "dhgate",
    "made-in-china.com",
    "made in china",
];

/// Decodes entities, strips tags and collapses whitespace. Empty input
/// yields `None`.
#[must_use]
pub fn clean_text(raw: &str) -> Option<String> {
    let without_tags = TAG_RE.replace_all(raw, " ");
    let decoded = decode_entities(&without_tags);
    let collapsed = WHITESPACE_RE.replace_all(decoded.trim(), " ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// A title is junky when it has no letters at all, e.g. `"1/ 6"` (a gallery
/// counter) or `"12345"`.
#[must_use]
pub fn is_junky_title(title: &str) -> bool {
    let trimmed = title.trim();
    trimmed.chars().count() < 2 || !trimmed.chars().any(char::is_alphabetic)
}

/// Cleans a scraped title: strips trailing marketplace ids and site-name
/// suffixes, collapses separators, and rejects junky results.
#[must_use]
pub fn sanitize_title(raw: &str) -> Option<String> {
    let mut title = clean_text(raw)?;
    title = title.replace('_', " ");
    title = TRAILING_ID_RE.replace(&title, "").into_owned();
    title = SEPARATOR_RUN_RE.replace_all(&title, " - ").into_owned();
    title = strip_site_suffix(&title);
    title = WHITESPACE_RE.replace_all(&title, " ").into_owned();
    let title = title
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '|' | ',' | ':'))
        .to_owned();

    if is_junky_title(&title) {
        None
    } else {
        Some(title)
    }
}

/// Removes ` - Buy X on Alibaba.com`-style tails naming a marketplace.
fn strip_site_suffix(title: &str) -> String {
    let mut current = title.to_owned();
    loop {
        let Some(idx) = current.rfind(" - ") else {
            return current;
        };
        let tail = current[idx + 3..].to_ascii_lowercase();
        if SITE_SUFFIXES.iter().any(|s| tail.contains(s)) {
            current.truncate(idx);
        } else {
            return current;
        }
    }
}

/// Derives a readable title from the last meaningful URL path segment, e.g.
/// `/product/cotton-crew-socks/889900112.html` → `"Cotton crew socks"`.
#[must_use]
pub fn title_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();

    segments.iter().rev().find_map(|segment| {
        let stem = segment.rsplit_once('.').map_or(*segment, |(stem, _)| stem);
        let words: Vec<&str> = stem
            .split(['-', '_', '+'])
            .filter(|w| !w.is_empty() && !w.chars().all(|c| c.is_ascii_digit()))
            .collect();
        if words.len() < 2 {
            return None;
        }
        let joined = words.join(" ");
        let decoded = decode_entities(&joined);
        sanitize_title(&capitalize(&decoded))
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// First usable title among `candidates`, then a URL-derived title, then a
/// supplier-derived one, then a generic placeholder.
#[must_use]
pub fn resolve_title(candidates: &[Option<&str>], url: &str, supplier: Option<&str>) -> String {
    candidates
        .iter()
        .flatten()
        .find_map(|c| sanitize_title(c))
        .or_else(|| title_from_url(url))
        .or_else(|| {
            supplier
                .and_then(clean_text)
                .map(|name| format!("Product from {name}"))
        })
        .unwrap_or_else(|| "Untitled listing".to_owned())
}
