use serde::{Deserialize, Serialize};

/// One price break as scraped: quantity bounds already parsed, price still text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTier {
    pub min: u64,
    pub max: Option<u64>,
    pub price_text: String,
}

/// Unnormalized detail-page output of one platform parser.
///
/// Every field may be blank or duplicated; [`crate::normalize::normalize`]
/// turns it into a [`wsdb_core::DetailRecord`]. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetail {
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub price_tiers: Vec<RawTier>,
    pub moq_text: Option<String>,
    /// `(label, value)` pairs in page order.
    pub attributes: Vec<(String, String)>,
    pub packaging: Vec<String>,
    pub protections: Vec<String>,
    pub supplier_name: Option<String>,
    pub supplier_logo: Option<String>,
    pub hero_image: Option<String>,
    pub gallery: Vec<String>,
    /// Sold/order count text, e.g. `"1,234 sold"`.
    pub sold_count: Option<String>,
    /// Which extraction path produced the data, e.g. `"json-ld"`.
    pub debug_source: Option<String>,
}

impl RawDetail {
    /// `true` when the parser found nothing at all worth normalizing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.price_text.is_none()
            && self.price_tiers.is_empty()
            && self.attributes.is_empty()
            && self.supplier_name.is_none()
            && self.hero_image.is_none()
            && self.gallery.is_empty()
    }
}
