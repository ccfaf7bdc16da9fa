use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// Merchant-facing card type names to the brand strings the SDK reports.
    static ref BRANDS: HashMap<&'static str, &'static str> = HashMap::from([
        ("visa", "VISA"),
        ("mastercard", "MASTERCARD"),
        ("amex", "AMERICAN_EXPRESS"),
        ("discover", "DISCOVER"),
        ("jcb", "JCB"),
        ("diners", "DINERS_CLUB"),
        ("union", "UNIONPAY"),
    ]);
}

pub fn sdk_brand(card_type: &str) -> Option<&'static str> {
    BRANDS.get(card_type.trim().to_lowercase().as_str()).copied()
}

/// SDK brand names the merchant accepts. Unknown card types are ignored.
pub fn allowed_brands<S: AsRef<str>>(available_card_types: &[S]) -> HashSet<&'static str> {
    available_card_types
        .iter()
        .filter_map(|t| sdk_brand(t.as_ref()))
        .collect()
}

pub fn brand_allowed<S: AsRef<str>>(brand: &str, available_card_types: &[S]) -> bool {
    allowed_brands(available_card_types).contains(brand)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_card_type() {
        assert_eq!(sdk_brand("amex"), Some("AMERICAN_EXPRESS"));
        assert_eq!(sdk_brand("Diners"), Some("DINERS_CLUB"));
        assert_eq!(sdk_brand("union"), Some("UNIONPAY"));
        assert_eq!(sdk_brand("maestro"), None);
        assert_eq!(allowed_brands(&["visa", "mastercard", "bogus"]).len(), 2);
    }

    #[test]
    fn jcb_requires_merchant_opt_in() {
        assert!(!brand_allowed("JCB", &["visa", "mastercard"]));
        assert!(brand_allowed("JCB", &["visa", "jcb"]));
        assert!(!brand_allowed("JCB", &[] as &[&str]));
    }
}
