//! Normalization from platform [`RawDetail`] output to the canonical
//! [`DetailRecord`].
//!
//! Pure and deterministic. Field precedence is: a non-empty raw value, then
//! the matching [`ListingStub`] field, then absent. Classification of the
//! result lives in [`wsdb_core::classify`].

use std::collections::HashSet;

use rust_decimal::Decimal;
use wsdb_core::{Attribute, DetailRecord, ListingStub, PriceTier, Supplier};

use crate::canonical::normalize_image_url;
use crate::extract::{parse_count, parse_price};
use crate::sanitize::{clean_text, resolve_title};
use crate::types::{RawDetail, RawTier};

/// Builds the canonical record for `stub` from `raw`, which is `None` when
/// the detail fetch produced nothing.
#[must_use]
pub fn normalize(raw: Option<&RawDetail>, stub: &ListingStub) -> DetailRecord {
    let empty = RawDetail::default();
    let raw = raw.unwrap_or(&empty);
    let base = stub.source_url.as_str();

    let supplier = Supplier {
        name: raw.supplier_name.as_deref().and_then(clean_text),
        logo: raw
            .supplier_logo
            .as_deref()
            .and_then(|u| normalize_image_url(u, Some(base))),
    };

    let title = resolve_title(
        &[raw.title.as_deref(), stub.title.as_deref()],
        base,
        supplier.name.as_deref(),
    );

    let price_text = raw
        .price_text
        .as_deref()
        .and_then(clean_text)
        .or_else(|| stub.price_raw.as_deref().and_then(clean_text));

    let gallery = normalize_images(&raw.gallery, base);
    let hero_image = raw
        .hero_image
        .as_deref()
        .and_then(|u| normalize_image_url(u, Some(base)))
        .or_else(|| gallery.first().cloned())
        .or_else(|| {
            stub.image
                .as_deref()
                .and_then(|u| normalize_image_url(u, Some(base)))
        });

    DetailRecord {
        title,
        price_text,
        price_tiers: normalize_tiers(&raw.price_tiers),
        moq_text: raw.moq_text.as_deref().and_then(clean_text),
        attributes: normalize_attributes(&raw.attributes),
        packaging: normalize_list(&raw.packaging),
        protections: normalize_list(&raw.protections),
        supplier,
        hero_image,
        gallery,
        sold_count: raw.sold_count.as_deref().and_then(parse_count),
    }
}

/// Trims labels and values, drops empties, and collapses duplicate labels
/// (case-insensitively) to their last occurrence.
fn normalize_attributes(raw: &[(String, String)]) -> Vec<Attribute> {
    let mut out: Vec<Attribute> = Vec::with_capacity(raw.len());
    for (label, value) in raw {
        let (Some(label), Some(value)) = (clean_text(label), clean_text(value)) else {
            continue;
        };
        out.retain(|a| !a.label.eq_ignore_ascii_case(&label));
        out.push(Attribute { label, value });
    }
    out
}

fn normalize_list(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|s| clean_text(s))
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect()
}

fn normalize_images(raw: &[String], base: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|u| normalize_image_url(u, Some(base)))
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

/// Parses tier prices, sorts ascending by `min`, keeps one tier per `min`,
/// and closes every tier but the last so only the last can be open-ended.
///
/// Among tiers sharing a `min`, a bounded tier wins over an open one, then
/// the narrower `max`, then the lower price, whatever their page order.
fn normalize_tiers(raw: &[RawTier]) -> Vec<PriceTier> {
    let mut tiers: Vec<PriceTier> = raw
        .iter()
        .filter_map(|t| {
            let price = parse_price(&t.price_text)?;
            let min = t.min.max(1);
            if price <= Decimal::ZERO || t.max.is_some_and(|max| max < min) {
                return None;
            }
            Some(PriceTier {
                min,
                max: t.max,
                price,
            })
        })
        .collect();

    tiers.sort_by(|a, b| {
        a.min
            .cmp(&b.min)
            .then_with(|| a.max.is_none().cmp(&b.max.is_none()))
            .then_with(|| a.max.cmp(&b.max))
            .then_with(|| a.price.cmp(&b.price))
    });
    tiers.dedup_by_key(|t| t.min);

    let next_mins: Vec<Option<u64>> = tiers
        .iter()
        .skip(1)
        .map(|t| Some(t.min))
        .chain(std::iter::once(None))
        .collect();
    for (tier, next_min) in tiers.iter_mut().zip(next_mins) {
        if let Some(next_min) = next_min {
            let ceiling = next_min - 1;
            tier.max = Some(tier.max.map_or(ceiling, |max| max.min(ceiling)));
        }
    }
    tiers
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
