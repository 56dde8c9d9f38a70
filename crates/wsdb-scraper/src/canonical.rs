//! URL canonicalization for listing dedupe and image cache keys.

use reqwest::Url;

/// Query parameters that only carry tracking or session state.
const TRACKING_PARAMS: &[&str] = &[
    "spm",
    "scm",
    "ref",
    "from",
    "tracelog",
    "traffic_type",
    "dspm",
    "f",
    "fbclid",
    "gclid",
    "s",
    "sid",
    "skuid",
];

const TRACKING_PREFIXES: &[&str] = &["utm_", "algo_", "_t", "aff_", "dh_"];

/// File extensions that on their own are a data-entry defect, not an image.
const BARE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "bmp"];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str()) || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Parses `raw`, accepting protocol-relative (`//host/...`) input.
fn parse_absolute(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    let url = if raw.starts_with("//") {
        Url::parse(&format!("https:{raw}")).ok()?
    } else {
        Url::parse(raw).ok()?
    };
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Cleans a listing URL for fetching: no fragment, tracking parameters
/// removed, no trailing slash. Protocol-relative input becomes https; path
/// case is preserved.
#[must_use]
pub fn clean_listing_url(raw: &str) -> Option<String> {
    let mut url = parse_absolute(raw)?;
    url.host_str()?;
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut out = url.to_string();
    if out.ends_with('/') && url.path() != "/" && url.query().is_none() {
        out.pop();
    }
    Some(out)
}

/// Dedupe key for listings: the cleaned URL with host and path lower-cased.
#[must_use]
pub fn canonical_listing_key(raw: &str) -> Option<String> {
    let cleaned = clean_listing_url(raw)?;
    let url = Url::parse(&cleaned).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").to_ascii_lowercase();
    let path = url.path().trim_end_matches('/').to_ascii_lowercase();
    let mut key = format!("{host}{path}");
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    Some(key)
}

/// `true` for strings such as `"jpg"` or `".png"` that name a format but
/// not an image.
#[must_use]
pub fn is_bare_extension(raw: &str) -> bool {
    let s = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    BARE_EXTENSIONS.contains(&s.as_str())
}

/// Normalizes an image reference: protocol-relative → https, relative paths
/// resolved against `base`, fragments dropped. Blank values and bare
/// extensions yield `None`.
#[must_use]
pub fn normalize_image_url(raw: &str, base: Option<&str>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || is_bare_extension(raw) || raw.starts_with("data:") {
        return None;
    }
    let mut url = match parse_absolute(raw) {
        Some(url) => url,
        None => {
            let base = parse_absolute(base?)?;
            let joined = base.join(raw).ok()?;
            matches!(joined.scheme(), "http" | "https").then_some(joined)?
        }
    };
    url.host_str()?;
    url.set_fragment(None);
    Some(url.to_string())
}
