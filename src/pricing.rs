//! Price parsing shared by every storefront.
//!
//! Prices travel as display strings (`"₹32"`, `"₹ 120.50"`). Anything that does not carry a
//! currency-prefixed number is treated as absent rather than as an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const CURRENCY: &str = "₹";

static PRICE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"₹\s*(\d+(?:\.\d+)?)").expect("price pattern compiles"));

/// Leading amount after the currency symbol.
pub fn parse_amount(text: &str) -> Option<f64> {
    PRICE_TOKEN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// Whole amounts print without decimals, fractional ones with two.
pub fn format_amount(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if (rounded - rounded.trunc()).abs() < f64::EPSILON {
        format!("{CURRENCY}{:.0}", rounded)
    } else {
        format!("{CURRENCY}{:.2}", rounded)
    }
}

/// Prefixes the currency symbol onto raw price text or numbers. Blank input yields `None`.
pub fn with_currency(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with(CURRENCY) {
        Some(trimmed.to_string())
    } else {
        Some(format!("{CURRENCY}{trimmed}"))
    }
}

/// Price fields arrive as numbers or strings depending on the storefront.
pub fn price_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| *v > 0.0).map(format_amount),
        Value::String(s) => with_currency(s),
        _ => None,
    }
}

/// `original - current`, only when both parse and the original is higher.
pub fn savings(price: &str, original: Option<&str>) -> Option<String> {
    let current = parse_amount(price)?;
    let original = parse_amount(original?)?;
    (original > current).then(|| format_amount(original - current))
}

/// `"N% OFF"` label derived from the two prices.
pub fn discount_label(price: &str, original: Option<&str>) -> Option<String> {
    let current = parse_amount(price)?;
    let original = parse_amount(original?)?;
    if original <= current || original <= 0.0 {
        return None;
    }
    let percent = ((original - current) / original * 100.0).round();
    Some(format!("{percent:.0}% OFF"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_first_currency_token() {
        assert_eq!(parse_amount("₹32"), Some(32.0));
        assert_eq!(parse_amount("MRP ₹ 120.50 incl."), Some(120.5));
        assert_eq!(parse_amount("32"), None);
        assert_eq!(parse_amount("Price Not Available"), None);
    }

    #[test]
    fn savings_require_higher_original() {
        assert_eq!(savings("₹30", Some("₹32")), Some("₹2".to_string()));
        assert_eq!(savings("₹99.50", Some("₹120")), Some("₹20.50".to_string()));
        assert_eq!(savings("₹32", Some("₹32")), None);
        assert_eq!(savings("₹40", Some("₹32")), None);
        assert_eq!(savings("₹40", None), None);
        assert_eq!(savings("Price Not Available", Some("₹50")), None);
    }

    #[test]
    fn savings_match_parsed_difference() {
        let price = "₹61";
        let original = "₹75";
        let saved = savings(price, Some(original)).unwrap();
        let diff = parse_amount(original).unwrap() - parse_amount(price).unwrap();
        assert_eq!(parse_amount(&saved), Some(diff));
    }

    #[test]
    fn values_gain_currency_prefix() {
        assert_eq!(price_from_value(&json!(45)), Some("₹45".into()));
        assert_eq!(price_from_value(&json!(45.5)), Some("₹45.50".into()));
        assert_eq!(price_from_value(&json!("₹12")), Some("₹12".into()));
        assert_eq!(price_from_value(&json!("12")), Some("₹12".into()));
        assert_eq!(price_from_value(&json!(null)), None);
        assert_eq!(price_from_value(&json!("  ")), None);
    }

    #[test]
    fn discount_is_rounded_percentage() {
        assert_eq!(discount_label("₹75", Some("₹100")), Some("25% OFF".into()));
        assert_eq!(discount_label("₹66", Some("₹99")), Some("33% OFF".into()));
        assert_eq!(discount_label("₹100", Some("₹100")), None);
    }
}
