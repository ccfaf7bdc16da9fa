use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Link state of a Square item against WooCommerce. On the wire this is
/// `true`, `false` or the string `"partial"` (some variations linked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Unlinked,
    Linked,
    Partial,
}

impl Serialize for SyncStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SyncStatus::Linked => serializer.serialize_bool(true),
            SyncStatus::Unlinked => serializer.serialize_bool(false),
            SyncStatus::Partial => serializer.serialize_str("partial"),
        }
    }
}

impl<'de> Deserialize<'de> for SyncStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StatusVisitor;

        impl<'de> de::Visitor<'de> for StatusVisitor {
            type Value = SyncStatus;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a boolean or \"partial\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<SyncStatus, E> {
                Ok(if v { SyncStatus::Linked } else { SyncStatus::Unlinked })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SyncStatus, E> {
                match v {
                    "partial" => Ok(SyncStatus::Partial),
                    "true" => Ok(SyncStatus::Linked),
                    "false" | "" => Ok(SyncStatus::Unlinked),
                    other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }

            fn visit_unit<E: de::Error>(self) -> Result<SyncStatus, E> {
                Ok(SyncStatus::Unlinked)
            }
        }

        deserializer.deserialize_any(StatusVisitor)
    }
}

/// Either a single value or the min/max across variations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ranged<T> {
    Single(T),
    Range { min: T, max: T },
}

impl<T: PartialOrd + Copy> Ranged<T> {
    pub fn low(&self) -> T {
        match self {
            Ranged::Single(v) => *v,
            Ranged::Range { min, .. } => *min,
        }
    }
}

impl<T: fmt::Display + PartialEq> fmt::Display for Ranged<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ranged::Single(v) => write!(f, "{}", v),
            Ranged::Range { min, max } if min == max => write!(f, "{}", min),
            Ranged::Range { min, max } => write!(f, "{} - {}", min, max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InventoryItem {
    pub id: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub name: String,
    #[serde(default)]
    pub price: Option<Ranged<Decimal>>,
    #[serde(default)]
    pub stock: Option<Ranged<i64>>,
    #[serde(default)]
    pub image: Vec<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(rename = "subRows", default, skip_serializing_if = "Option::is_none")]
    pub sub_rows: Option<Vec<InventoryItem>>,
    #[serde(default)]
    pub woocommerce_product_id: Option<u64>,
}

impl InventoryItem {
    pub fn is_linked(&self) -> bool {
        self.woocommerce_product_id.is_some() && self.status == SyncStatus::Linked
    }

    /// Variation rows, empty for simple products.
    pub fn variations(&self) -> &[InventoryItem] {
        self.sub_rows.as_deref().unwrap_or(&[])
    }
}

pub fn find_by_id<'a>(inventory: &'a [InventoryItem], id: &str) -> Option<&'a InventoryItem> {
    inventory.iter().find(|item| item.id == id)
}

#[derive(Debug, Default)]
pub struct InventorySummary {
    pub total: usize,
    pub linked: usize,
    pub partial: usize,
    pub unlinked: usize,
}

pub fn summarize(inventory: &[InventoryItem]) -> InventorySummary {
    let mut summary = InventorySummary { total: inventory.len(), ..Default::default() };
    for item in inventory {
        match item.status {
            SyncStatus::Linked => summary.linked += 1,
            SyncStatus::Partial => summary.partial += 1,
            SyncStatus::Unlinked => summary.unlinked += 1,
        }
    }
    summary
}
