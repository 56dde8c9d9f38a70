//! Marketplace adapters and their registry.
//!
//! Every marketplace implements [`PlatformAdapter`] and is registered by
//! platform id; callers look adapters up in an [`AdapterRegistry`] instead of
//! branching on platform names. The three bundled marketplaces share one
//! driver, [`MarketplaceAdapter`], and differ only in their
//! [`MarketplaceProfile`]: URL builders, required anchors and parsers.

pub mod alibaba;
pub mod dhgate;
pub mod made_in_china;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use wsdb_core::{AppConfig, ConfigError, ListingStub};

use crate::canonical::{canonical_listing_key, clean_listing_url, normalize_image_url};
use crate::error::ScraperError;
use crate::extract::{
    extract_attr, find_meta_content, json_ld_product, key_value_rows, parse_price_range,
    parse_quantity_range,
};
use crate::fetch::{FailureKind, FetchAttempt, Fetcher, PageRequest};
use crate::sanitize::{clean_text, sanitize_title};
use crate::types::{RawDetail, RawTier};

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Overrides the adapter's headless default for this search.
    pub headless: Option<bool>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone, Default)]
pub struct DetailOptions {
    /// Fetch even if this URL previously failed permanently.
    pub force: bool,
    /// Overrides the adapter's headless default for this fetch.
    pub headless: Option<bool>,
    pub cancel: Option<CancellationToken>,
}

/// Outcome of [`PlatformAdapter::fetch_detail`]: the raw detail, or the
/// failure kind that ended the attempt chain.
#[derive(Debug)]
pub struct DetailFetch {
    pub raw: Option<RawDetail>,
    pub failure: Option<FailureKind>,
    pub attempts: Vec<FetchAttempt>,
}

impl DetailFetch {
    fn failed(kind: FailureKind, attempts: Vec<FetchAttempt>) -> Self {
        Self {
            raw: None,
            failure: Some(kind),
            attempts,
        }
    }
}

/// Capability every marketplace exposes. Implementations never return
/// errors across this boundary: failures become empty results or a
/// `DetailFetch` with `raw = None`.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Paginated search, deduplicated by canonical URL, at most `limit` stubs.
    async fn search_listings(
        &self,
        query: &str,
        limit: usize,
        options: &SearchOptions,
    ) -> Vec<ListingStub>;

    async fn fetch_detail(&self, url: &str, options: &DetailOptions) -> DetailFetch;
}

/// Adapters keyed by platform id.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under its id, replacing any previous registration.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.id().to_owned(), adapter);
    }

    #[must_use]
    pub fn get(&self, platform: &str) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(platform).cloned()
    }

    /// # Errors
    ///
    /// Returns [`ScraperError::UnknownPlatform`] if nothing is registered for `platform`.
    pub fn require(&self, platform: &str) -> Result<Arc<dyn PlatformAdapter>, ScraperError> {
        self.get(platform)
            .ok_or_else(|| ScraperError::UnknownPlatform(platform.to_owned()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

type AdapterFactory = fn(&AppConfig, Arc<Fetcher>) -> Result<Arc<dyn PlatformAdapter>, ScraperError>;

/// Built-in marketplaces, by platform id.
const BUILTIN_PLATFORMS: &[(&str, AdapterFactory)] = &[
    (alibaba::PLATFORM_ID, alibaba::adapter),
    (dhgate::PLATFORM_ID, dhgate::adapter),
    (made_in_china::PLATFORM_ID, made_in_china::adapter),
];

/// Registers an adapter for every platform enabled in `config`.
///
/// # Errors
///
/// Returns [`ScraperError::UnknownPlatform`] for an enabled id with no
/// built-in adapter, or [`ScraperError::Config`] when an enabled adapter is
/// missing a required credential.
pub fn build_registry(
    config: &AppConfig,
    fetcher: &Arc<Fetcher>,
) -> Result<AdapterRegistry, ScraperError> {
    let mut registry = AdapterRegistry::new();
    for platform in &config.platforms {
        let (_, factory) = BUILTIN_PLATFORMS
            .iter()
            .find(|(id, _)| *id == platform.as_str())
            .ok_or_else(|| ScraperError::UnknownPlatform(platform.clone()))?;
        registry.register(factory(config, Arc::clone(fetcher))?);
        tracing::debug!(platform = %platform, "registered platform adapter");
    }
    Ok(registry)
}

/// Reads a required session credential, failing startup when it is absent.
fn require_session(value: Option<&String>, var: &str) -> Result<String, ScraperError> {
    value
        .cloned()
        .ok_or_else(|| ScraperError::Config(ConfigError::MissingEnvVar(var.to_owned())))
}

/// What distinguishes one marketplace from another.
pub trait MarketplaceProfile: Send + Sync + 'static {
    fn id(&self) -> &'static str;

    /// Absolute URL of results page `page` (1-based) for `query`.
    fn search_url(&self, query: &str, page: usize) -> String;

    fn max_search_pages(&self) -> usize {
        5
    }

    fn parse_search(&self, html: &str, page_url: &str) -> Vec<ListingStub>;

    /// Pattern a real detail page always matches; its absence means the page
    /// was a wall, an empty shell, or needs rendering.
    fn detail_anchor(&self) -> &Regex;

    fn parse_detail(&self, html: &str, page_url: &str) -> RawDetail;

    fn session_cookie(&self) -> Option<&str> {
        None
    }
}

/// Shared driver: pagination, dedupe, rate buckets, fetch escalation and the
/// negative memo of permanently failed URLs.
pub struct MarketplaceAdapter<P> {
    profile: P,
    fetcher: Arc<Fetcher>,
    headless_default: bool,
    search_bucket: String,
    detail_bucket: String,
    failed_permanently: Mutex<HashSet<String>>,
}

impl<P: MarketplaceProfile> MarketplaceAdapter<P> {
    #[must_use]
    pub fn new(profile: P, fetcher: Arc<Fetcher>, headless_default: bool) -> Self {
        let id = profile.id();
        Self {
            search_bucket: format!("{id}-search"),
            detail_bucket: format!("{id}-detail"),
            profile,
            fetcher,
            headless_default,
            failed_permanently: Mutex::new(HashSet::new()),
        }
    }

    fn memo(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.failed_permanently
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<P: MarketplaceProfile> PlatformAdapter for MarketplaceAdapter<P> {
    fn id(&self) -> &str {
        self.profile.id()
    }

    async fn search_listings(
        &self,
        query: &str,
        limit: usize,
        options: &SearchOptions,
    ) -> Vec<ListingStub> {
        let mut seen = HashSet::new();
        let mut out: Vec<ListingStub> = Vec::new();

        for page in 1..=self.profile.max_search_pages() {
            if out.len() >= limit {
                break;
            }
            let url = self.profile.search_url(query, page);
            let request = PageRequest {
                url: &url,
                bucket: &self.search_bucket,
                anchor: None,
                allow_headless: options.headless.unwrap_or(self.headless_default),
                session_cookie: self.profile.session_cookie(),
                cancel: options.cancel.as_ref(),
            };
            let fetched = match self.fetcher.fetch_page(&request).await.page {
                Ok(fetched) => fetched,
                Err(kind) => {
                    tracing::warn!(platform = self.profile.id(), page, failure = %kind, "search page fetch failed");
                    break;
                }
            };

            let mut added = 0usize;
            for stub in self.profile.parse_search(&fetched.html, &fetched.final_url) {
                let Some(source_url) = clean_listing_url(&stub.source_url) else {
                    continue;
                };
                let Some(key) = canonical_listing_key(&source_url) else {
                    continue;
                };
                if !seen.insert(key) {
                    continue;
                }
                out.push(ListingStub {
                    platform: self.profile.id().to_owned(),
                    source_url,
                    title: stub.title.as_deref().and_then(sanitize_title),
                    ..stub
                });
                added += 1;
                if out.len() >= limit {
                    break;
                }
            }

            tracing::debug!(platform = self.profile.id(), page, added, total = out.len(), "search page parsed");
            if added == 0 {
                break;
            }
        }

        out
    }

    async fn fetch_detail(&self, url: &str, options: &DetailOptions) -> DetailFetch {
        let Some(source_url) = clean_listing_url(url) else {
            tracing::warn!(platform = self.profile.id(), url, "malformed listing URL");
            return DetailFetch::failed(FailureKind::Permanent, Vec::new());
        };
        let key = canonical_listing_key(&source_url).unwrap_or_else(|| source_url.clone());

        let previously_failed = self.memo().contains(&key);
        if previously_failed && !options.force {
            tracing::debug!(platform = self.profile.id(), url = %source_url, "skipping previously failed URL");
            return DetailFetch::failed(FailureKind::Permanent, Vec::new());
        }

        let request = PageRequest {
            url: &source_url,
            bucket: &self.detail_bucket,
            anchor: Some(self.profile.detail_anchor()),
            allow_headless: options.headless.unwrap_or(self.headless_default),
            session_cookie: self.profile.session_cookie(),
            cancel: options.cancel.as_ref(),
        };
        let fetch = self.fetcher.fetch_page(&request).await;

        match fetch.page {
            Ok(page) => {
                self.memo().remove(&key);
                let raw = self.profile.parse_detail(&page.html, &page.final_url);
                DetailFetch {
                    raw: Some(raw),
                    failure: None,
                    attempts: fetch.attempts,
                }
            }
            Err(kind) => {
                if kind == FailureKind::Permanent {
                    self.memo().insert(key);
                }
                tracing::warn!(platform = self.profile.id(), url = %source_url, failure = %kind, "detail fetch failed");
                DetailFetch::failed(kind, fetch.attempts)
            }
        }
    }
}

/// `base` + `path` with `params` form-encoded into the query string.
pub(crate) fn search_page_url(base: &str, path: &str, params: &[(&str, &str)]) -> String {
    let raw = format!("{}{path}", base.trim_end_matches('/'));
    match reqwest::Url::parse(&raw) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(params);
            url.to_string()
        }
        Err(_) => raw,
    }
}

/// Splits `html` into the chunks that follow each occurrence of `marker`,
/// one per result card.
pub(crate) fn split_cards<'a>(html: &'a str, marker: &str) -> Vec<&'a str> {
    let starts: Vec<usize> = html.match_indices(marker).map(|(i, _)| i).collect();
    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(html.len());
            &html[start..end]
        })
        .collect()
}

/// First `href` in `card` matching `link_re`, resolved against `page_url`.
pub(crate) fn card_link(card: &str, link_re: &Regex, page_url: &str) -> Option<String> {
    let href = link_re.captures(card)?.get(1)?.as_str();
    let base = reqwest::Url::parse(page_url).ok()?;
    let href = href.replace("&amp;", "&");
    let joined = if href.starts_with("//") {
        reqwest::Url::parse(&format!("https:{href}")).ok()?
    } else {
        base.join(&href).ok()?
    };
    Some(joined.to_string())
}

/// Builds a stub from one search card's extracted pieces.
pub(crate) fn card_stub(
    platform: &str,
    source_url: String,
    title: Option<String>,
    price_raw: Option<String>,
    image: Option<String>,
    page_url: &str,
) -> ListingStub {
    let (price_min, price_max) = price_raw
        .as_deref()
        .map_or((None, None), parse_price_range);
    let currency = price_raw.as_deref().and_then(detect_currency);
    ListingStub {
        platform: platform.to_owned(),
        source_url,
        title,
        price_raw,
        price_min,
        price_max,
        currency,
        image: image.and_then(|u| normalize_image_url(&u, Some(page_url))),
    }
}

fn detect_currency(price: &str) -> Option<String> {
    let upper = price.to_ascii_uppercase();
    if upper.contains("US") || price.contains('$') {
        Some("USD".to_owned())
    } else if price.contains('€') || upper.contains("EUR") {
        Some("EUR".to_owned())
    } else if price.contains('¥') || upper.contains("CNY") || upper.contains("RMB") {
        Some("CNY".to_owned())
    } else {
        None
    }
}

/// Image URL of the first `<img>` in `card`, preferring lazy-load attributes.
pub(crate) fn card_image(card: &str) -> Option<String> {
    let start = card.find("<img")?;
    let end = card[start..].find('>').map_or(card.len(), |e| start + e + 1);
    let tag = &card[start..end];
    ["data-src", "data-original", "data-lazy", "src"]
        .iter()
        .find_map(|attr| extract_attr(tag, attr))
        .filter(|src| !src.starts_with("data:"))
}

/// Platform-independent detail extraction: JSON-LD `Product`, OpenGraph
/// tags and label/value rows. Parsers use it to fill what their own
/// selectors missed.
pub(crate) fn generic_detail(html: &str) -> RawDetail {
    let mut raw = RawDetail::default();

    if let Some(product) = json_ld_product(html) {
        raw.title = product.name;
        raw.gallery = product.images;
        raw.supplier_name = product.brand;
        raw.attributes = product.properties;
        for offer in &product.offers {
            let Some(price) = offer.price.clone().or_else(|| offer.low_price.clone()) else {
                continue;
            };
            if let Some(min) = offer.min_quantity {
                raw.price_tiers.push(RawTier {
                    min,
                    max: offer.max_quantity,
                    price_text: price.clone(),
                });
            }
            if raw.price_text.is_none() {
                raw.price_text = Some(match (&offer.low_price, &offer.high_price) {
                    (Some(low), Some(high)) if low != high => format!("{low} - {high}"),
                    _ => price,
                });
            }
        }
        raw.debug_source = Some("json-ld".to_owned());
    }

    if raw.title.is_none() {
        raw.title = find_meta_content(html, "og:title");
    }
    if raw.gallery.is_empty() {
        raw.gallery.extend(find_meta_content(html, "og:image"));
    }
    if raw.attributes.is_empty() {
        raw.attributes = key_value_rows(html);
    }
    if raw.debug_source.is_none() && !raw.is_empty() {
        raw.debug_source = Some("html".to_owned());
    }
    raw
}

/// Fills every empty field of `primary` from `fallback`.
pub(crate) fn merge_missing(mut primary: RawDetail, fallback: RawDetail) -> RawDetail {
    fn fill<T>(slot: &mut Option<T>, other: Option<T>) {
        if slot.is_none() {
            *slot = other;
        }
    }
    fn fill_vec<T>(slot: &mut Vec<T>, other: Vec<T>) {
        if slot.is_empty() {
            *slot = other;
        }
    }

    fill(&mut primary.title, fallback.title);
    fill(&mut primary.price_text, fallback.price_text);
    fill_vec(&mut primary.price_tiers, fallback.price_tiers);
    fill(&mut primary.moq_text, fallback.moq_text);
    fill_vec(&mut primary.attributes, fallback.attributes);
    fill_vec(&mut primary.packaging, fallback.packaging);
    fill_vec(&mut primary.protections, fallback.protections);
    fill(&mut primary.supplier_name, fallback.supplier_name);
    fill(&mut primary.supplier_logo, fallback.supplier_logo);
    fill(&mut primary.hero_image, fallback.hero_image);
    fill_vec(&mut primary.gallery, fallback.gallery);
    fill(&mut primary.sold_count, fallback.sold_count);
    fill(&mut primary.debug_source, fallback.debug_source);
    primary
}

/// Moves packaging rows ("Packaging Details", "Package Size") out of the
/// attribute list into `label: value` packaging lines.
pub(crate) fn split_packaging(raw: &mut RawDetail) {
    let (packaging, attributes): (Vec<_>, Vec<_>) = std::mem::take(&mut raw.attributes)
        .into_iter()
        .partition(|(label, _)| label.to_ascii_lowercase().contains("packag"));
    raw.attributes = attributes;
    raw.packaging
        .extend(packaging.into_iter().map(|(label, value)| format!("{label}: {value}")));
}

/// Up to `max_len` bytes of `html` starting at the first `marker`.
pub(crate) fn section_after<'a>(html: &'a str, marker: &str, max_len: usize) -> Option<&'a str> {
    let start = html.find(marker)?;
    let mut end = (start + max_len).min(html.len());
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    Some(&html[start..end])
}

/// Tier rows given as `(quantity text, price text)` pairs.
pub(crate) fn tiers_from_text(rows: &[(String, String)]) -> Vec<RawTier> {
    rows.iter()
        .filter_map(|(qty, price)| {
            let (min, max) = parse_quantity_range(qty)?;
            let price_text = clean_text(price)?;
            Some(RawTier {
                min,
                max,
                price_text,
            })
        })
        .collect()
}
