//! Never-regress rules shared by the heal sweep and the refresh trigger.
//!
//! Both paths compare a freshly normalized record against what is stored and
//! write only when the comparison allows it. Stored records may predate the
//! current normalizer, so image fields holding a bare extension such as
//! `"jpg"` are treated as absent before any comparison.

use wsdb_core::{classify, ClassificationConfig, DetailRecord, QualityClass};
use wsdb_scraper::canonical::is_bare_extension;

fn usable_image(value: &str) -> bool {
    !value.trim().is_empty() && !is_bare_extension(value)
}

/// Copy of `record` with unusable image references removed.
#[must_use]
pub fn scrub_images(record: &DetailRecord) -> DetailRecord {
    let mut scrubbed = record.clone();
    scrubbed.hero_image = scrubbed.hero_image.filter(|h| usable_image(h));
    scrubbed.gallery.retain(|g| usable_image(g));
    scrubbed.supplier.logo = scrubbed.supplier.logo.filter(|l| usable_image(l));
    scrubbed
}

/// Quality class of a stored record after scrubbing; a missing record is weak.
#[must_use]
pub fn stored_quality(record: Option<&DetailRecord>, config: &ClassificationConfig) -> QualityClass {
    record.map_or(QualityClass::Weak, |r| classify(&scrub_images(r), config))
}

/// The fields dominance is judged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signals {
    attributes: usize,
    tiers: usize,
    hero: bool,
    supplier: bool,
}

impl Signals {
    fn of(record: &DetailRecord) -> Self {
        Self {
            attributes: record.attribute_count(),
            tiers: record.tier_count(),
            hero: record.hero_image.as_deref().is_some_and(usable_image),
            supplier: record.has_supplier_name(),
        }
    }

    fn covers(self, other: Self) -> bool {
        self.attributes >= other.attributes
            && self.tiers >= other.tiers
            && (self.hero || !other.hero)
            && (self.supplier || !other.supplier)
    }
}

/// `true` when `new` loses nothing `old` has and gains at least one of: more
/// attributes, more price tiers, a hero image, a supplier name.
#[must_use]
pub fn dominates(new: &DetailRecord, old: &DetailRecord) -> bool {
    let (new, old) = (Signals::of(new), Signals::of(old));
    new.covers(old) && new != old
}

/// `true` when `new` has fewer attributes or tiers than `old`, or drops its
/// hero image or supplier name.
#[must_use]
pub fn regresses(new: &DetailRecord, old: &DetailRecord) -> bool {
    !Signals::of(new).covers(Signals::of(old))
}

/// Whether a heal may overwrite `old` with `new`: strict dominance, or a
/// weak stored record replaced by a non-weak one.
#[must_use]
pub fn should_persist_heal(
    old: Option<&DetailRecord>,
    new: &DetailRecord,
    config: &ClassificationConfig,
) -> bool {
    let new_weak = classify(new, config) == QualityClass::Weak;
    match old {
        None => !new_weak,
        Some(old) => {
            let old = scrub_images(old);
            let old_weak = classify(&old, config) == QualityClass::Weak;
            dominates(new, &old) || (old_weak && !new_weak)
        }
    }
}
