use anyhow::Result;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::api::SwsApi;
use super::import::{create_batches, link_items, BatchSize};
use super::inventory::InventoryItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchCandidate {
    pub square_id: String,
    pub sku: String,
}

/// Body for `POST /sws/v1/matcher`.
#[derive(Debug, Serialize)]
pub struct MatchRequest {
    pub products: Vec<MatchCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductMatch {
    pub square_id: String,
    pub product_id: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatchResponse {
    #[serde(default)]
    pub matches: Vec<ProductMatch>,
}

#[derive(Debug, Default)]
pub struct MatchSummary {
    pub candidates: usize,
    pub matched: usize,
    pub failed_batches: usize,
}

/// Unlinked items with a usable SKU.
pub fn candidates(inventory: &[InventoryItem]) -> Vec<MatchCandidate> {
    inventory
        .iter()
        .filter(|item| item.woocommerce_product_id.is_none())
        .filter_map(|item| match item.sku.as_deref().map(str::trim) {
            Some(sku) if !sku.is_empty() => Some(MatchCandidate {
                square_id: item.id.clone(),
                sku: sku.to_string(),
            }),
            _ => None,
        })
        .collect()
}

/// Sends SKU candidates to the matcher one batch at a time and links every
/// item the plugin matched. A failing batch is logged and skipped.
pub async fn auto_match(
    api: &SwsApi,
    inventory: &[InventoryItem],
    batch_size: BatchSize,
) -> Result<(Vec<InventoryItem>, MatchSummary)> {
    let candidates = candidates(inventory);
    let mut summary = MatchSummary { candidates: candidates.len(), ..Default::default() };
    let mut found: Vec<ProductMatch> = Vec::new();
    for batch in create_batches(&candidates, batch_size.get()) {
        let request = MatchRequest { products: batch.to_vec() };
        match api.match_products(&request).await {
            Ok(res) => found.extend(res.matches),
            Err(e) => {
                error!("matcher batch failed: {}", e);
                summary.failed_batches += 1;
            }
        }
    }
    let links: HashMap<&str, u64> =
        found.iter().map(|m| (m.square_id.as_str(), m.product_id)).collect();
    summary.matched = links.len();
    info!("matched {} of {} candidates", summary.matched, summary.candidates);
    Ok((link_items(inventory, &links), summary))
}
