//! Listing and detail record types shared by the scraper, the audit sweep,
//! and the listing store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A minimal search-result record, produced before detail enrichment.
///
/// Stubs are never mutated in place; re-scraping produces a new stub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingStub {
    /// Registered platform id, e.g. `"dhgate"`.
    pub platform: String,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Price exactly as shown on the search card, e.g. `"$5-10"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_min: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_max: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ListingStub {
    /// A stub carrying only platform and URL.
    #[must_use]
    pub fn bare(platform: &str, source_url: &str) -> Self {
        Self {
            platform: platform.to_owned(),
            source_url: source_url.to_owned(),
            title: None,
            price_raw: None,
            price_min: None,
            price_max: None,
            currency: None,
            image: None,
        }
    }
}

/// One quantity-based price break.
///
/// `max = None` marks the open-ended tier ("100 pieces and up").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    pub min: u64,
    pub max: Option<u64>,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// The canonical product-detail record.
///
/// Every optional field is either a trimmed non-empty value or `None`;
/// `price_tiers` is sorted ascending by `min` and only its last tier may be
/// open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_text: Option<String>,
    #[serde(default)]
    pub price_tiers: Vec<PriceTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moq_text: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub packaging: Vec<String>,
    #[serde(default)]
    pub protections: Vec<String>,
    #[serde(default)]
    pub supplier: Supplier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_image: Option<String>,
    #[serde(default)]
    pub gallery: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_count: Option<u64>,
}

impl DetailRecord {
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.price_tiers.len()
    }

    #[must_use]
    pub fn has_hero_image(&self) -> bool {
        self.hero_image.is_some()
    }

    #[must_use]
    pub fn has_supplier_name(&self) -> bool {
        self.supplier.name.is_some()
    }

    /// Every image reference carried by the record, hero first, without repeats.
    #[must_use]
    pub fn image_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        let candidates = self
            .hero_image
            .iter()
            .chain(self.gallery.iter())
            .chain(self.supplier.logo.iter());
        for url in candidates {
            if !urls.contains(&url.as_str()) {
                urls.push(url);
            }
        }
        urls
    }

    /// Checks the tier ordering invariant: ascending `min`, and at most one
    /// open-ended tier which must be the last.
    #[must_use]
    pub fn tiers_well_formed(&self) -> bool {
        let ascending = self.price_tiers.windows(2).all(|w| w[0].min < w[1].min);
        let open_ended = self
            .price_tiers
            .iter()
            .filter(|t| t.max.is_none())
            .count();
        let last_is_open = self.price_tiers.last().is_some_and(|t| t.max.is_none());
        ascending && (open_ended == 0 || (open_ended == 1 && last_is_open))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(min: u64, max: Option<u64>, price: i64) -> PriceTier {
        PriceTier {
            min,
            max,
            price: Decimal::new(price, 2),
        }
    }

    fn record_with_tiers(price_tiers: Vec<PriceTier>) -> DetailRecord {
        DetailRecord {
            title: "Cotton crew socks".to_owned(),
            price_text: None,
            price_tiers,
            moq_text: None,
            attributes: Vec::new(),
            packaging: Vec::new(),
            protections: Vec::new(),
            supplier: Supplier::default(),
            hero_image: None,
            gallery: Vec::new(),
            sold_count: None,
        }
    }

    #[test]
    fn tiers_well_formed_accepts_single_trailing_open_tier() {
        let record = record_with_tiers(vec![tier(1, Some(99), 510), tier(100, None, 450)]);
        assert!(record.tiers_well_formed());
    }

    #[test]
    fn tiers_well_formed_rejects_open_tier_in_middle() {
        let record = record_with_tiers(vec![tier(1, None, 510), tier(100, Some(200), 450)]);
        assert!(!record.tiers_well_formed());
    }

    #[test]
    fn tiers_well_formed_rejects_unsorted() {
        let record = record_with_tiers(vec![tier(100, Some(200), 450), tier(1, Some(99), 510)]);
        assert!(!record.tiers_well_formed());
    }

    #[test]
    fn image_urls_dedupes_hero_from_gallery() {
        let mut record = record_with_tiers(Vec::new());
        record.hero_image = Some("https://img.example.com/a.jpg".to_owned());
        record.gallery = vec![
            "https://img.example.com/a.jpg".to_owned(),
            "https://img.example.com/b.jpg".to_owned(),
        ];
        assert_eq!(
            record.image_urls(),
            vec!["https://img.example.com/a.jpg", "https://img.example.com/b.jpg"]
        );
    }

    #[test]
    fn detail_record_serializes_camel_case_and_omits_absent_fields() {
        let mut record = record_with_tiers(vec![tier(2, None, 500)]);
        record.hero_image = Some("https://img.example.com/a.jpg".to_owned());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["heroImage"], "https://img.example.com/a.jpg");
        assert!(json.get("priceText").is_none());
        assert!(json["priceTiers"][0]["max"].is_null());
        assert_eq!(json["priceTiers"][0]["price"], "5.00");
    }
}
