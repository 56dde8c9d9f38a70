//! Alibaba.com search results and product-detail pages.
//!
//! Both page types carry their data as inline script JSON (`offerList` on
//! search pages, `window.detailData` on product pages); the HTML is only a
//! fallback. Detail pages are gated behind a signed-in session, so the
//! adapter refuses to start without `WSDB_ALIBABA_SESSION_COOKIE`.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use wsdb_core::{AppConfig, ListingStub};

use super::{
    card_image, card_link, card_stub, generic_detail, merge_missing, require_session,
    search_page_url, split_cards, MarketplaceAdapter, MarketplaceProfile, PlatformAdapter,
};
use crate::error::ScraperError;
use crate::extract::{embedded_json, first_capture_text, json_text};
use crate::types::{RawDetail, RawTier};

pub const PLATFORM_ID: &str = "alibaba";

pub const SESSION_COOKIE_VAR: &str = "WSDB_ALIBABA_SESSION_COOKIE";

const DEFAULT_BASE_URL: &str = "https://www.alibaba.com";

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*/product-detail/[^"]+)""#).expect("valid regex"));
static CARD_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bsearch-card-e-title\b[^"]*"[^>]*>(.*?)</(?:h2|div|a)>"#)
        .expect("valid regex")
});
static CARD_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bsearch-card-e-price-main\b[^"]*"[^>]*>(.*?)</div>"#)
        .expect("valid regex")
});
static DETAIL_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:window\.detailData\s*=|<h1\b[^>]*>\s*[^<\s])"#).expect("valid regex")
});

pub struct AlibabaProfile {
    base_url: String,
    session_cookie: String,
}

impl AlibabaProfile {
    #[must_use]
    pub fn new(session_cookie: String) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, session_cookie)
    }

    #[must_use]
    pub fn with_base_url(base_url: &str, session_cookie: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            session_cookie,
        }
    }
}

/// # Errors
///
/// Returns [`ScraperError::Config`] when no Alibaba session cookie is configured.
pub fn adapter(
    config: &AppConfig,
    fetcher: Arc<crate::fetch::Fetcher>,
) -> Result<Arc<dyn PlatformAdapter>, ScraperError> {
    let cookie = require_session(config.alibaba_session_cookie.as_ref(), SESSION_COOKIE_VAR)?;
    Ok(Arc::new(MarketplaceAdapter::new(
        AlibabaProfile::new(cookie),
        fetcher,
        config.headless_default,
    )))
}

impl MarketplaceProfile for AlibabaProfile {
    fn id(&self) -> &'static str {
        PLATFORM_ID
    }

    fn search_url(&self, query: &str, page: usize) -> String {
        let page = page.to_string();
        search_page_url(
            &self.base_url,
            "/trade/search",
            &[("SearchText", query), ("page", &page)],
        )
    }

    fn parse_search(&self, html: &str, page_url: &str) -> Vec<ListingStub> {
        let from_json = search_from_json(html, page_url);
        if !from_json.is_empty() {
            return from_json;
        }
        split_cards(html, r#"class="search-card-item""#)
            .into_iter()
            .filter_map(|card| {
                let url = card_link(card, &LINK_RE, page_url)?;
                Some(card_stub(
                    PLATFORM_ID,
                    url,
                    first_capture_text(card, &CARD_TITLE_RE),
                    first_capture_text(card, &CARD_PRICE_RE),
                    card_image(card),
                    page_url,
                ))
            })
            .collect()
    }

    fn detail_anchor(&self) -> &Regex {
        &DETAIL_ANCHOR_RE
    }

    fn parse_detail(&self, html: &str, _page_url: &str) -> RawDetail {
        let primary = embedded_json(html, "window.detailData")
            .map(|data| detail_from_json(&data))
            .unwrap_or_default();
        merge_missing(primary, generic_detail(html))
    }

    fn session_cookie(&self) -> Option<&str> {
        Some(&self.session_cookie)
    }
}

fn search_from_json(html: &str, page_url: &str) -> Vec<ListingStub> {
    let Some(Value::Array(offers)) = embedded_json(html, "offerList") else {
        return Vec::new();
    };
    let base = reqwest::Url::parse(page_url).ok();
    offers
        .iter()
        .filter_map(|offer| {
            let href = json_text(offer.pointer("/information/productUrl"))?;
            let url = if href.starts_with("//") {
                format!("https:{href}")
            } else {
                base.as_ref()?.join(&href).ok()?.to_string()
            };
            Some(card_stub(
                PLATFORM_ID,
                url,
                json_text(offer.pointer("/information/title")),
                json_text(offer.pointer("/tradePrice/price")),
                json_text(offer.pointer("/image/mainImage")),
                page_url,
            ))
        })
        .collect()
}

fn label_value_pairs(value: Option<&Value>) -> Vec<(String, String)> {
    value
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    Some((
                        json_text(row.get("attrName"))?,
                        json_text(row.get("attrValue"))?,
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn detail_from_json(data: &Value) -> RawDetail {
    let product = data.pointer("/globalData/product").unwrap_or(&Value::Null);
    let seller = data.pointer("/globalData/seller").unwrap_or(&Value::Null);

    let price_tiers = product
        .pointer("/price/productLadderPrices")
        .and_then(Value::as_array)
        .map(|ladder| {
            ladder
                .iter()
                .filter_map(|step| {
                    Some(RawTier {
                        min: step.get("min").and_then(Value::as_u64)?,
                        // -1 marks the open-ended top step.
                        max: step.get("max").and_then(Value::as_u64).filter(|m| *m > 0),
                        price_text: json_text(step.get("formatPrice"))?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let gallery: Vec<String> = product
        .get("mediaItems")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) != Some("video"))
                .filter_map(|item| {
                    json_text(item.pointer("/imageUrl/big"))
                        .or_else(|| json_text(item.pointer("/imageUrl/normal")))
                })
                .collect()
        })
        .unwrap_or_default();

    let protections = data
        .pointer("/globalData/trade/protections")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|p| json_text(p.get("title")).or_else(|| json_text(Some(p))))
                .collect()
        })
        .unwrap_or_default();

    let packaging = label_value_pairs(product.get("productPackagingProperties"))
        .into_iter()
        .map(|(label, value)| format!("{label}: {value}"))
        .collect();

    RawDetail {
        title: json_text(product.get("subject")),
        price_text: json_text(product.pointer("/price/productRangePrices/formatPrice")),
        price_tiers,
        moq_text: json_text(product.get("moqText")),
        attributes: label_value_pairs(product.get("productBasicProperties")),
        packaging,
        protections,
        supplier_name: json_text(seller.get("companyName")),
        supplier_logo: json_text(seller.get("companyLogoFileUrl")),
        hero_image: gallery.first().cloned(),
        gallery,
        sold_count: json_text(product.get("soldCount")),
        debug_source: Some("alibaba-detail-data".to_owned()),
    }
}
