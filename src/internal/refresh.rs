use anyhow::{anyhow, bail, Result};
use log::*;
use std::time::Duration;

use super::api::SwsApi;
use super::inventory::InventoryItem;
use super::settings::Refresh;

/// Exponential backoff between polls of the saved inventory.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn from_settings(refresh: &Refresh) -> Self {
        Backoff {
            initial: refresh.initial_interval(),
            max: refresh.max_interval(),
            multiplier: refresh.multiplier.max(1),
            max_attempts: refresh.max_attempts.max(1),
        }
    }

    /// Delay before poll number `attempt + 1` (attempt counts from zero).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 0..attempt.min(32) {
            delay = delay.saturating_mul(self.multiplier);
            if delay >= self.max {
                return self.max;
            }
        }
        delay.min(self.max)
    }
}

/// Triggers a catalog rebuild on the plugin and waits for it to finish.
pub async fn refresh_inventory(api: &SwsApi, backoff: &Backoff) -> Result<Vec<InventoryItem>> {
    api.request_inventory().await?;
    info!("inventory refresh requested, polling for completion");
    for attempt in 0..backoff.max_attempts {
        let saved = api.saved_inventory().await?;
        if let Some(err) = saved.error {
            bail!("inventory refresh failed: {}", err);
        }
        if !saved.loading {
            if let Some(data) = saved.data {
                info!("inventory ready after {} polls: {} items", attempt + 1, data.len());
                return Ok(data);
            }
        }
        let delay = backoff.delay(attempt);
        debug!("inventory still loading, next poll in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
    Err(anyhow!(
        "inventory refresh did not complete after {} attempts",
        backoff.max_attempts
    ))
}
