use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which side wins when the two catalogs disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceOfTruth {
    #[default]
    Square,
    Woocommerce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AutoSync {
    #[serde(rename = "isActive", default)]
    pub is_active: bool,
    #[serde(default)]
    pub stock: bool,
    #[serde(default)]
    pub title: bool,
    #[serde(default)]
    pub sku: bool,
    #[serde(default)]
    pub price: bool,
    #[serde(default)]
    pub description: bool,
    #[serde(default)]
    pub images: bool,
    #[serde(default)]
    pub category: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CronSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub source: SourceOfTruth,
    /// `hourly`, `twicedaily`, `daily` or `weekly`.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(rename = "batches", default)]
    pub batch_size: Option<u32>,
    #[serde(rename = "dataToUpdate", default)]
    pub data_to_update: Map<String, Value>,
}

/// Plugin-side settings object. Unknown keys are carried through untouched so
/// a round trip never drops configuration this client does not model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PluginSettings {
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "squareAuto", default)]
    pub square_auto: AutoSync,
    #[serde(rename = "wooAuto", default)]
    pub woo_auto: AutoSync,
    #[serde(default)]
    pub cron: CronSettings,
    #[serde(rename = "accessToken", default)]
    pub access_token_set: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AccessTokenStatus {
    #[serde(default)]
    pub access_token: Option<String>,
}

impl AccessTokenStatus {
    pub fn is_set(&self) -> bool {
        self.access_token.as_deref().map(|t| !t.is_empty()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocationsResponse {
    #[serde(default)]
    pub locations: Vec<Location>,
}

/// Parses a CLI value into JSON, falling back to a plain string.
pub fn setting_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_keep_unknown_keys() {
        let raw = json!({
            "environment": "sandbox",
            "location": "L1",
            "squareAuto": {"isActive": true, "stock": true},
            "cron": {"enabled": true, "source": "woocommerce", "schedule": "hourly", "batches": 30},
            "accessToken": true,
            "customOrderStatus": "wc-processing"
        });
        let s: PluginSettings = serde_json::from_value(raw).unwrap();
        assert!(s.square_auto.is_active);
        assert!(!s.woo_auto.is_active);
        assert_eq!(s.cron.source, SourceOfTruth::Woocommerce);
        assert_eq!(s.cron.batch_size, Some(30));
        assert!(s.access_token_set);
        let back = serde_json::to_value(&s).unwrap();
        assert_eq!(back["customOrderStatus"], json!("wc-processing"));
    }

    #[test]
    fn setting_value_parses_json_or_string() {
        assert_eq!(setting_value("true"), json!(true));
        assert_eq!(setting_value("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(setting_value("L123"), json!("L123"));
    }

    #[test]
    fn masked_token_counts_as_set() {
        let t: AccessTokenStatus =
            serde_json::from_value(json!({"access_token": "EAAA****"})).unwrap();
        assert!(t.is_set());
        assert!(!AccessTokenStatus::default().is_set());
    }
}
