//! DHgate search results and product pages.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use wsdb_core::{AppConfig, ListingStub};

use super::{
    card_image, card_link, card_stub, generic_detail, merge_missing, search_page_url,
    section_after, split_cards, split_packaging, tiers_from_text, MarketplaceAdapter,
    MarketplaceProfile, PlatformAdapter,
};
use crate::error::ScraperError;
use crate::extract::{all_capture_text, extract_attr, first_capture_text};
use crate::types::RawDetail;

pub const PLATFORM_ID: &str = "dhgate";

const DEFAULT_BASE_URL: &str = "https://www.dhgate.com";

const CARD_MARKER: &str = r#"class="gitem""#;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*/product/[^"]+)""#).expect("valid regex"));
static CARD_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bgitem-title\b[^"]*"[^>]*>(.*?)</(?:a|h3|div|p)>"#)
        .expect("valid regex")
});
static CARD_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bprice\b[^"]*"[^>]*>(.*?)</(?:div|p)>"#).expect("valid regex")
});

static DETAIL_ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>\s*[^<\s]").expect("valid regex"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").expect("valid regex"));
static PRICE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bprice-range\b[^"]*"[^>]*>(.*?)</(?:div|p)>"#)
        .expect("valid regex")
});
static TIER_QTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bwprice-qty\b[^"]*"[^>]*>(.*?)</"#).expect("valid regex")
});
static TIER_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bwprice-price\b[^"]*"[^>]*>(.*?)</"#).expect("valid regex")
});
static MOQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bmin-order\b[^"]*"[^>]*>(.*?)</(?:div|p|span)>"#)
        .expect("valid regex")
});
static STORE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bstore-name\b[^"]*"[^>]*>(.*?)</(?:a|div|span)>"#)
        .expect("valid regex")
});
static SOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,.]*\s*[kw]?\+?)\s*(?:sold|orders)\b").expect("valid regex")
});
static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<li\b[^>]*>(.*?)</li>").expect("valid regex"));

pub struct DhgateProfile {
    base_url: String,
}

impl DhgateProfile {
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

impl Default for DhgateProfile {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }
}

/// # Errors
///
/// Never fails; the signature matches the other built-in factories.
#[allow(clippy::unnecessary_wraps)]
pub fn adapter(
    config: &AppConfig,
    fetcher: Arc<crate::fetch::Fetcher>,
) -> Result<Arc<dyn PlatformAdapter>, ScraperError> {
    Ok(Arc::new(MarketplaceAdapter::new(
        DhgateProfile::default(),
        fetcher,
        config.headless_default,
    )))
}

impl MarketplaceProfile for DhgateProfile {
    fn id(&self) -> &'static str {
        PLATFORM_ID
    }

    fn search_url(&self, query: &str, page: usize) -> String {
        let page = page.to_string();
        search_page_url(
            &self.base_url,
            "/wholesale/search.do",
            &[("searchkey", query), ("pageNum", &page)],
        )
    }

    fn parse_search(&self, html: &str, page_url: &str) -> Vec<ListingStub> {
        split_cards(html, CARD_MARKER)
            .into_iter()
            .filter_map(|card| {
                let url = card_link(card, &LINK_RE, page_url)?;
                let title = first_capture_text(card, &CARD_TITLE_RE).or_else(|| {
                    let start = card.find("<a")?;
                    extract_attr(&card[start..], "title")
                });
                let price = first_capture_text(card, &CARD_PRICE_RE);
                Some(card_stub(PLATFORM_ID, url, title, price, card_image(card), page_url))
            })
            .collect()
    }

    fn detail_anchor(&self) -> &Regex {
        &DETAIL_ANCHOR_RE
    }

    fn parse_detail(&self, html: &str, _page_url: &str) -> RawDetail {
        let tier_rows: Vec<(String, String)> = split_cards(html, r#"class="wprice-item""#)
            .into_iter()
            .filter_map(|row| {
                Some((
                    first_capture_text(row, &TIER_QTY_RE)?,
                    first_capture_text(row, &TIER_PRICE_RE)?,
                ))
            })
            .collect();

        let gallery: Vec<String> = split_cards(html, r#"class="img-item""#)
            .into_iter()
            .filter_map(card_image)
            .collect();

        let protections = section_after(html, r#"class="buyer-protection""#, 4000)
            .map(|section| all_capture_text(section, &LIST_ITEM_RE))
            .unwrap_or_default();

        let mut raw = RawDetail {
            title: first_capture_text(html, &TITLE_RE),
            price_text: first_capture_text(html, &PRICE_RANGE_RE),
            price_tiers: tiers_from_text(&tier_rows),
            moq_text: first_capture_text(html, &MOQ_RE),
            supplier_name: first_capture_text(html, &STORE_NAME_RE),
            supplier_logo: section_after(html, r#"class="store-logo""#, 1000).and_then(card_image),
            hero_image: gallery.first().cloned(),
            gallery,
            protections,
            sold_count: SOLD_RE
                .captures(html)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_owned()),
            debug_source: Some("dhgate-html".to_owned()),
            ..RawDetail::default()
        };
        raw = merge_missing(raw, generic_detail(html));
        split_packaging(&mut raw);
        raw
    }
}
