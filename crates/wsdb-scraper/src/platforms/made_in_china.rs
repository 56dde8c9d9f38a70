//! Made-in-China.com search results and product pages.

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

pub const PLATFORM_ID: &str = "made_in_china";

const DEFAULT_BASE_URL: &str = "https://www.made-in-china.com";

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*/product/[^"]+)""#).expect("valid regex"));
static CARD_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bproduct-name\b[^"]*"[^>]*>(.*?)</(?:h2|div)>"#)
        .expect("valid regex")
});
static CARD_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<strong[^>]*class="[^"]*\bprice\b[^"]*"[^>]*>(.*?)</strong>"#)
        .expect("valid regex")
});

static DETAIL_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:"@type"\s*:\s*"Product"|<h1\b[^>]*>\s*[^<\s])"#).expect("valid regex")
});
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").expect("valid regex"));
static TIER_PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="price"[^>]*>(.*?)</(?:div|span|strong)>"#)
        .expect("valid regex")
});
static TIER_NUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bnum\b[^"]*"[^>]*>(.*?)</(?:div|span)>"#).expect("valid regex")
});
static COMPANY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bcompany-name\b[^"]*"[^>]*>(.*?)</(?:div|a|span)>"#)
        .expect("valid regex")
});
static MOQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d,]*\s*[a-z]+\s*\(MOQ\))").expect("valid regex")
});
static BADGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*\bauth-item\b[^"]*"[^>]*>(.*?)</(?:span|li|div)>"#)
        .expect("valid regex")
});

pub struct MadeInChinaProfile {
    base_url: String,
}

impl MadeInChinaProfile {
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

impl Default for MadeInChinaProfile {
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
        MadeInChinaProfile::default(),
        fetcher,
        config.headless_default,
    )))
}

impl MarketplaceProfile for MadeInChinaProfile {
    fn id(&self) -> &'static str {
        PLATFORM_ID
    }

    fn search_url(&self, query: &str, page: usize) -> String {
        let page = page.to_string();
        search_page_url(
            &self.base_url,
            "/productSearch",
            &[("keyword", query), ("currentPage", &page)],
        )
    }

    fn parse_search(&self, html: &str, page_url: &str) -> Vec<ListingStub> {
        split_cards(html, r#"class="list-node""#)
            .into_iter()
            .filter_map(|card| {
                let url = card_link(card, &LINK_RE, page_url)?;
                let title = first_capture_text(card, &CARD_NAME_RE).or_else(|| {
                    let start = card.find("<a")?;
                    extract_attr(&card[start..], "title")
                });
                Some(card_stub(
                    PLATFORM_ID,
                    url,
                    title,
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
        let tier_rows: Vec<(String, String)> = split_cards(html, r#"class="price-item""#)
            .into_iter()
            .filter_map(|row| {
                Some((
                    first_capture_text(row, &TIER_NUM_RE)?,
                    first_capture_text(row, &TIER_PRICE_RE)?,
                ))
            })
            .collect();

        let gallery: Vec<String> = split_cards(html, r#"class="pic-item""#)
            .into_iter()
            .filter_map(card_image)
            .collect();

        let company = section_after(html, r#"class="com-info""#, 3000);

        let mut raw = RawDetail {
            title: first_capture_text(html, &TITLE_RE),
            price_tiers: tiers_from_text(&tier_rows),
            moq_text: first_capture_text(html, &MOQ_RE),
            supplier_name: first_capture_text(html, &COMPANY_RE),
            supplier_logo: company.and_then(card_image),
            hero_image: gallery.first().cloned(),
            gallery,
            protections: company
                .map(|section| all_capture_text(section, &BADGE_RE))
                .unwrap_or_default(),
            debug_source: Some("made-in-china-html".to_owned()),
            ..RawDetail::default()
        };
        raw = merge_missing(raw, generic_detail(html));
        split_packaging(&mut raw);
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_HTML: &str = r#"
        <div class="list-node">
          <div class="prod-image"><img data-original="//image.made-in-china.com/jar.jpg" src="//www.made-in-china.com/blank.gif"></div>
          <h2 class="product-name"><a href="//ningbo.en.made-in-china.com/product/AbCdEfGh/China-Glass-Jar.html" title="Glass Jar">Glass Jar 500ml with Bamboo Lid</a></h2>
          <strong class="price">US$0.35-0.50</strong>
        </div>
        <div class="list-node">
          <h2 class="product-name"><a href="//ningbo.en.made-in-china.com/product/AbCdEfGh/China-Glass-Jar.html">Glass Jar duplicate</a></h2>
        </div>"#;

    const DETAIL_HTML: &str = r#"<html><head>
        <script type="application/ld+json">{"@context":"https://schema.org","@type":"Product",
          "name":"Glass Jar 500ml | Made-in-China.com","image":["https://image.made-in-china.com/ld.jpg"],
          "offers":{"@type":"AggregateOffer","lowPrice":"0.35","highPrice":"0.50","priceCurrency":"USD"}}</script>
        </head><body>
        <div class="price-item"><div class="price">US$0.50</div><div class="num">100-499 Pieces</div></div>
        <div class="price-item"><div class="price">US$0.35</div><div class="num">500+ Pieces</div></div>
        <div>500 Pieces (MOQ)</div>
        <ul><li class="pic-item"><img src="//image.made-in-china.com/1.jpg"></li></ul>
        <table>
          <tr><th>Capacity</th><td>500ml</td></tr>
          <tr><th>Lid</th><td>Bamboo</td></tr>
          <tr><th>Packaging</th><td>Carton</td></tr>
        </table>
        <div class="com-info"><img src="//image.made-in-china.com/logo.png">
          <div class="company-name"><a href="/">Ningbo Glassware Co., Ltd.</a></div>
          <span class="auth-item">Audited Supplier</span>
        </div>
        </body></html>"#;

    fn profile() -> MadeInChinaProfile {
        MadeInChinaProfile::default()
    }

    #[test]
    fn search_url_pages_by_current_page() {
        assert_eq!(
            profile().search_url("glass jar", 2),
            "https://www.made-in-china.com/productSearch?keyword=glass+jar&currentPage=2"
        );
    }

    #[test]
    fn parse_search_reads_product_cards() {
        let stubs = profile().parse_search(SEARCH_HTML, "https://www.made-in-china.com/productSearch");
        // Both cards parse; dedupe happens in the shared driver.
        assert_eq!(stubs.len(), 2);
        assert_eq!(
            stubs[0].source_url,
            "https://ningbo.en.made-in-china.com/product/AbCdEfGh/China-Glass-Jar.html"
        );
        assert_eq!(stubs[0].title.as_deref(), Some("Glass Jar 500ml with Bamboo Lid"));
        assert_eq!(stubs[0].image.as_deref(), Some("https://image.made-in-china.com/jar.jpg"));
        assert_eq!(stubs[0].currency.as_deref(), Some("USD"));
    }

    #[test]
    fn parse_detail_combines_html_and_json_ld() {
        let raw = profile().parse_detail(DETAIL_HTML, "https://ningbo.en.made-in-china.com/product/a.html");
        assert_eq!(raw.price_tiers.len(), 2);
        assert_eq!(raw.price_tiers[0].min, 100);
        assert_eq!(raw.price_text.as_deref(), Some("0.35 - 0.50"));
        assert_eq!(raw.moq_text.as_deref(), Some("500 Pieces (MOQ)"));
        assert_eq!(raw.supplier_name.as_deref(), Some("Ningbo Glassware Co., Ltd."));
        assert_eq!(raw.supplier_logo.as_deref(), Some("//image.made-in-china.com/logo.png"));
        assert_eq!(raw.gallery, vec!["//image.made-in-china.com/1.jpg"]);
        assert_eq!(raw.protections, vec!["Audited Supplier"]);
        assert_eq!(raw.attributes.len(), 2);
        assert_eq!(raw.packaging, vec!["Packaging: Carton"]);
        assert_eq!(raw.title.as_deref(), Some("Glass Jar 500ml | Made-in-China.com"));
    }

    #[test]
    fn detail_anchor_accepts_json_ld_product() {
        assert!(profile().detail_anchor().is_match(DETAIL_HTML));
        assert!(!profile().detail_anchor().is_match("<html><body>Access denied</body></html>"));
    }
}
