//! Completeness classification for [`DetailRecord`]s.
//!
//! Completeness is data, not an error: the audit sweep uses the class to
//! decide what to re-fetch, and nothing in the pipeline fails because a
//! record is weak.

use serde::{Deserialize, Serialize};

use crate::detail::DetailRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityClass {
    Weak,
    Acceptable,
    Correct,
}

impl std::fmt::Display for QualityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityClass::Weak => write!(f, "weak"),
            QualityClass::Acceptable => write!(f, "acceptable"),
            QualityClass::Correct => write!(f, "correct"),
        }
    }
}

/// Thresholds driving [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Attribute count at or above which a record can be `correct`.
    pub min_attributes_for_correct: usize,
    /// Whether `correct` additionally requires at least one price tier.
    pub require_tier_for_correct: bool,
    /// When `true`, a record is weak only if attributes, tiers, hero image
    /// and supplier name are all absent. When `false`, a supplier name alone
    /// no longer lifts a record out of `weak`.
    pub weak_requires_all_empty: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            min_attributes_for_correct: 5,
            require_tier_for_correct: true,
            weak_requires_all_empty: true,
        }
    }
}

/// Classifies a record as `weak`, `acceptable`, or `correct`.
///
/// Checks run weakest-first so a record that satisfies the weak rule is never
/// reported as anything better.
#[must_use]
pub fn classify(record: &DetailRecord, config: &ClassificationConfig) -> QualityClass {
    let has_core_signal =
        record.attribute_count() > 0 || record.tier_count() > 0 || record.has_hero_image();

    let weak = if config.weak_requires_all_empty {
        !has_core_signal && !record.has_supplier_name()
    } else {
        !has_core_signal
    };
    if weak {
        return QualityClass::Weak;
    }

    let enough_attributes = record.attribute_count() >= config.min_attributes_for_correct;
    let tier_ok = !config.require_tier_for_correct || record.tier_count() > 0;
    if enough_attributes && tier_ok {
        return QualityClass::Correct;
    }

    QualityClass::Acceptable
}

/// Classifies an optional stored record; a missing record is weak.
#[must_use]
pub fn classify_stored(record: Option<&DetailRecord>, config: &ClassificationConfig) -> QualityClass {
    record.map_or(QualityClass::Weak, |r| classify(r, config))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::detail::{Attribute, PriceTier, Supplier};

    fn empty_record() -> DetailRecord {
        DetailRecord {
            title: "Silicone spatula".to_owned(),
            price_text: Some("$5-10".to_owned()),
            price_tiers: Vec::new(),
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

    fn attr(label: &str) -> Attribute {
        Attribute {
            label: label.to_owned(),
            value: "x".to_owned(),
        }
    }

    #[test]
    fn all_empty_record_is_weak_even_with_price_text() {
        let record = empty_record();
        assert_eq!(
            classify(&record, &ClassificationConfig::default()),
            QualityClass::Weak
        );
    }

    #[test]
    fn one_attribute_flips_weak_to_acceptable() {
        let mut record = empty_record();
        record.attributes.push(attr("Material"));
        assert_eq!(
            classify(&record, &ClassificationConfig::default()),
            QualityClass::Acceptable
        );
    }

    #[test]
    fn supplier_name_alone_is_not_weak_under_all_empty_rule() {
        let mut record = empty_record();
        record.supplier.name = Some("Yiwu Trading Co.".to_owned());
        assert_eq!(
            classify(&record, &ClassificationConfig::default()),
            QualityClass::Acceptable
        );
    }

    #[test]
    fn supplier_name_alone_is_weak_when_all_empty_rule_disabled() {
        let mut record = empty_record();
        record.supplier.name = Some("Yiwu Trading Co.".to_owned());
        let config = ClassificationConfig {
            weak_requires_all_empty: false,
            ..ClassificationConfig::default()
        };
        assert_eq!(classify(&record, &config), QualityClass::Weak);
    }

    #[test]
    fn correct_requires_min_attributes_and_tier() {
        let mut record = empty_record();
        record.attributes = (0..5).map(|i| attr(&format!("a{i}"))).collect();
        assert_eq!(
            classify(&record, &ClassificationConfig::default()),
            QualityClass::Acceptable
        );

        record.price_tiers.push(PriceTier {
            min: 1,
            max: None,
            price: Decimal::new(499, 2),
        });
        assert_eq!(
            classify(&record, &ClassificationConfig::default()),
            QualityClass::Correct
        );
    }

    #[test]
    fn tier_requirement_can_be_disabled() {
        let mut record = empty_record();
        record.attributes = (0..3).map(|i| attr(&format!("a{i}"))).collect();
        let config = ClassificationConfig {
            min_attributes_for_correct: 3,
            require_tier_for_correct: false,
            weak_requires_all_empty: true,
        };
        assert_eq!(classify(&record, &config), QualityClass::Correct);
    }

    #[test]
    fn missing_stored_record_is_weak() {
        assert_eq!(
            classify_stored(None, &ClassificationConfig::default()),
            QualityClass::Weak
        );
    }

    #[test]
    fn quality_classes_order_weakest_first() {
        assert!(QualityClass::Weak < QualityClass::Acceptable);
        assert!(QualityClass::Acceptable < QualityClass::Correct);
    }
}
