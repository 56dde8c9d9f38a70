//! Regex-based HTML extraction helpers shared by the marketplace parsers.
//!
//! Marketplace markup is too inconsistent for a DOM walk to pay off; these
//! helpers pull the handful of structures every platform exposes in some
//! form: meta tags, JSON-LD `Product` blocks, embedded JSON state,
//! label/value rows and quantity/price/sold-count text.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::sanitize::clean_text;

static META_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static JSON_LD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]+type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("valid regex")
});

static DT_DD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<dt\b[^>]*>(.*?)</dt>\s*<dd\b[^>]*>(.*?)</dd>").expect("valid regex")
});

static TABLE_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<tr\b[^>]*>\s*<t[hd]\b[^>]*>(.*?)</t[hd]>\s*<td\b[^>]*>(.*?)</td>\s*</tr>")
        .expect("valid regex")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid regex"));

static QTY_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d,]*)\s*(?:-|~|–|to)\s*(\d[\d,]*)").expect("valid regex"));

static QTY_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:(?:≥|>=|>|over|above|from)\s*(\d[\d,]*))|(?:(\d[\d,]*)\s*(?:\+|[a-z()]*\s*(?:and|or)\s+(?:up|above|more)))")
        .expect("valid regex")
});

static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*(?:([kw])\b)?").expect("valid regex"));

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));

/// Decodes the HTML entities that show up in marketplace titles and cells.
#[must_use]
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_owned();
    }
    ENTITY_RE
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ if name.starts_with("#x") || name.starts_with("#X") => {
                    u32::from_str_radix(&name[2..], 16).ok().and_then(char::from_u32)
                }
                _ if name.starts_with('#') => name[1..].parse().ok().and_then(char::from_u32),
                _ => None,
            };
            decoded.map_or_else(|| caps[0].to_owned(), String::from)
        })
        .into_owned()
}

/// Value of attribute `attr` in a single tag, entity-decoded and trimmed.
#[must_use]
pub fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    ATTR_RE.captures_iter(tag).find_map(|c| {
        if !c[1].eq_ignore_ascii_case(attr) {
            return None;
        }
        let value = c.get(2).or_else(|| c.get(3))?.as_str();
        let value = decode_entities(value.trim());
        (!value.is_empty()).then_some(value)
    })
}

/// `content` of the first `<meta>` whose `property`, `name` or `itemprop`
/// equals `key` (case-insensitive).
#[must_use]
pub fn find_meta_content(html: &str, key: &str) -> Option<String> {
    META_TAG_RE.find_iter(html).find_map(|m| {
        let tag = m.as_str();
        let matches_key = ["property", "name", "itemprop"]
            .iter()
            .filter_map(|a| extract_attr(tag, a))
            .any(|v| v.eq_ignore_ascii_case(key));
        if matches_key {
            extract_attr(tag, "content")
        } else {
            None
        }
    })
}

/// Cleaned text of capture group 1 of the first match of `re`.
#[must_use]
pub fn first_capture_text(html: &str, re: &Regex) -> Option<String> {
    re.captures_iter(html)
        .find_map(|c| c.get(1).and_then(|m| clean_text(m.as_str())))
}

/// Cleaned text of capture group 1 of every match of `re`, empties dropped.
#[must_use]
pub fn all_capture_text(html: &str, re: &Regex) -> Vec<String> {
    re.captures_iter(html)
        .filter_map(|c| c.get(1).and_then(|m| clean_text(m.as_str())))
        .collect()
}

/// Raw capture group 1 of every match of `re` (e.g. image `src` values).
#[must_use]
pub fn all_capture_raw(html: &str, re: &Regex) -> Vec<String> {
    re.captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| decode_entities(m.as_str().trim())))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Label/value pairs from `<dt>/<dd>` lists and two-cell table rows.
#[must_use]
pub fn key_value_rows(html: &str) -> Vec<(String, String)> {
    DT_DD_RE
        .captures_iter(html)
        .chain(TABLE_ROW_RE.captures_iter(html))
        .filter_map(|c| {
            let label = clean_text(&c[1])?;
            let value = clean_text(&c[2])?;
            let label = label.trim_end_matches([':', '：']).trim().to_owned();
            (!label.is_empty()).then_some((label, value))
        })
        .collect()
}

/// Every JSON-LD node on the page, with top-level arrays and `@graph`
/// containers flattened.
#[must_use]
pub fn json_ld_nodes(html: &str) -> Vec<Value> {
    let mut nodes = Vec::new();
    for cap in JSON_LD_RE.captures_iter(html) {
        let Ok(value) = serde_json::from_str::<Value>(cap[1].trim()) else {
            continue;
        };
        let top = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for item in top {
            if let Some(graph) = item.get("@graph").and_then(Value::as_array) {
                nodes.extend(graph.iter().cloned());
            }
            nodes.push(item);
        }
    }
    nodes
}

fn has_type(node: &Value, wanted: &str) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case(wanted),
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(Value::as_str)
            .any(|t| t.eq_ignore_ascii_case(wanted)),
        _ => false,
    }
}

/// String form of a JSON scalar (numbers included), trimmed, non-empty.
#[must_use]
pub fn json_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => clean_text(s)?,
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn json_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.trunc() as u64)
        }),
        Value::String(s) => parse_count(s),
        _ => None,
    }
}

/// One schema.org `Offer` / `AggregateOffer`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonLdOffer {
    pub price: Option<String>,
    pub low_price: Option<String>,
    pub high_price: Option<String>,
    pub currency: Option<String>,
    pub min_quantity: Option<u64>,
    pub max_quantity: Option<u64>,
}

/// The fields of a schema.org `Product` node the parsers use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonLdProduct {
    pub name: Option<String>,
    pub images: Vec<String>,
    pub brand: Option<String>,
    pub offers: Vec<JsonLdOffer>,
    pub properties: Vec<(String, String)>,
}

fn offer_from(node: &Value) -> JsonLdOffer {
    let quantity = node.get("eligibleQuantity");
    JsonLdOffer {
        price: json_text(node.get("price")),
        low_price: json_text(node.get("lowPrice")),
        high_price: json_text(node.get("highPrice")),
        currency: json_text(node.get("priceCurrency")),
        min_quantity: quantity.and_then(|q| json_u64(q.get("minValue"))),
        max_quantity: quantity.and_then(|q| json_u64(q.get("maxValue"))),
    }
}

/// First JSON-LD node typed `Product`.
#[must_use]
pub fn json_ld_product(html: &str) -> Option<JsonLdProduct> {
    let node = json_ld_nodes(html)
        .into_iter()
        .find(|n| has_type(n, "Product"))?;

    let images = match node.get("image") {
        Some(Value::String(s)) => vec![s.trim().to_owned()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str().or_else(|| i.get("url").and_then(Value::as_str)))
            .map(|s| s.trim().to_owned())
            .collect(),
        Some(obj @ Value::Object(_)) => obj
            .get("url")
            .and_then(Value::as_str)
            .map(|s| vec![s.trim().to_owned()])
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    let brand = match node.get("brand").or_else(|| node.get("manufacturer")) {
        Some(Value::String(s)) => clean_text(s),
        Some(obj) => json_text(obj.get("name")),
        None => None,
    };

    let offers = match node.get("offers") {
        Some(Value::Array(items)) => items.iter().map(offer_from).collect(),
        Some(obj @ Value::Object(_)) => {
            let mut offers = vec![offer_from(obj)];
            if let Some(Value::Array(nested)) = obj.get("offers") {
                offers.extend(nested.iter().map(offer_from));
            }
            offers
        }
        _ => Vec::new(),
    };

    let properties = node
        .get("additionalProperty")
        .and_then(Value::as_array)
        .map(|props| {
            props
                .iter()
                .filter_map(|p| Some((json_text(p.get("name"))?, json_text(p.get("value"))?)))
                .collect()
        })
        .unwrap_or_default();

    Some(JsonLdProduct {
        name: json_text(node.get("name")),
        images: images.into_iter().filter(|s| !s.is_empty()).collect(),
        brand,
        offers,
        properties,
    })
}

/// Extracts the balanced JSON value (`{…}` or `[…]`) starting at `s[0]`,
/// honoring string literals and escapes. `None` if unterminated.
#[must_use]
pub fn extract_balanced(s: &str) -> Option<&str> {
    let (open, close) = match s.chars().next()? {
        '[' => ('[', ']'),
        '{' => ('{', '}'),
        _ => return None,
    };
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape = false;
    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses the JSON value assigned to `"key":` (or `key =`) somewhere in the
/// page's inline scripts, e.g. `window.runParams = {...}`.
#[must_use]
pub fn embedded_json(html: &str, key: &str) -> Option<Value> {
    let patterns = [format!("\"{key}\""), format!("{key} ="), format!("{key}=")];
    for pattern in &patterns {
        let mut search_from = 0;
        while let Some(pos) = html[search_from..].find(pattern.as_str()) {
            let after = search_from + pos + pattern.len();
            let rest = html[after..].trim_start_matches(|c: char| c.is_whitespace() || c == ':' || c == '=');
            if let Some(raw) = extract_balanced(rest) {
                if let Ok(value) = serde_json::from_str::<Value>(raw) {
                    return Some(value);
                }
            }
            search_from = after;
        }
    }
    None
}

fn parse_grouped_u64(s: &str) -> Option<u64> {
    s.replace(',', "").parse().ok()
}

/// Quantity bounds from tier text: `"2 - 99 pieces"` → `(2, Some(99))`,
/// `"≥ 100 pieces"` / `">= 100"` / `"100+ pieces"` → `(100, None)`,
/// a lone `"50 pieces"` → `(50, None)`.
#[must_use]
pub fn parse_quantity_range(text: &str) -> Option<(u64, Option<u64>)> {
    if let Some(c) = QTY_RANGE_RE.captures(text) {
        let min = parse_grouped_u64(&c[1])?;
        let max = parse_grouped_u64(&c[2])?;
        return Some((min, Some(max)));
    }
    if let Some(c) = QTY_OPEN_RE.captures(text) {
        let raw = c.get(1).or_else(|| c.get(2))?.as_str();
        let min = parse_grouped_u64(raw)?;
        return Some((min, None));
    }
    let first = NUMBER_RE.find(text)?.as_str();
    if first.contains('.') {
        return None;
    }
    Some((parse_grouped_u64(first)?, None))
}

/// First decimal number in `text`: `"US $5.10 / Piece"` → `5.10`.
#[must_use]
pub fn parse_price(text: &str) -> Option<Decimal> {
    let raw = NUMBER_RE.find(text)?.as_str().replace(',', "");
    Decimal::from_str(&raw).ok()
}

/// Low and high price of a range such as `"$5.00 - $10.00"`; a single price
/// fills both ends.
#[must_use]
pub fn parse_price_range(text: &str) -> (Option<Decimal>, Option<Decimal>) {
    let prices: Vec<Decimal> = NUMBER_RE
        .find_iter(text)
        .filter_map(|m| Decimal::from_str(&m.as_str().replace(',', "")).ok())
        .collect();
    match prices.as_slice() {
        [] => (None, None),
        [only] => (Some(*only), Some(*only)),
        [first, .., last] => (Some(*first), Some(*last)),
    }
}

/// Sold/order count from text such as `"1,234 sold"`, `"2.5k+ orders"` or
/// `"1.2w"` (万, ten thousand).
#[must_use]
pub fn parse_count(text: &str) -> Option<u64> {
    let c = COUNT_RE.captures(text)?;
    let base = Decimal::from_str(&c[1].replace(',', "")).ok()?;
    let scale = match c.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(s) if s == "k" => Decimal::from(1_000),
        Some(s) if s == "w" => Decimal::from(10_000),
        _ => Decimal::ONE,
    };
    (base * scale).trunc().to_u64()
}
