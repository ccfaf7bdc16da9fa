use anyhow::{anyhow, Result};
use log::*;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::import::{ImportPayload, ImportResponseEntry};
use super::inventory::InventoryItem;
use super::logs::{LogEntry, LogWrite, LogsResponse};
use super::matcher::{MatchRequest, MatchResponse};
use super::orders::{CreateOrderRequest, CreateOrderResponse, OrdersPage};
use super::payment::PaymentRequestOptions;
use super::plugin::{AccessTokenStatus, Location, LocationsResponse, PluginSettings};
use super::settings::Site;

const NAMESPACE: &str = "/sws/v1";
const NONCE_HEADER: &str = "X-WP-Nonce";

#[derive(Serialize)]
struct Empty {}

/// Reply from `GET /square-inventory/saved-inventory/`. `loading` stays true
/// while the plugin is still paging through the Square catalog.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SavedInventory {
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub data: Option<Vec<InventoryItem>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// WordPress admin-ajax envelope (`wp_send_json_success` / `_error`).
#[derive(Debug, Deserialize)]
struct AjaxResponse<T> {
    success: bool,
    data: Option<T>,
}

#[derive(Clone)]
pub struct SwsApi {
    client: Client,
    rest_root: String,
    ajax_url: String,
    nonce: String,
    ajax_nonce: String,
    username: String,
    app_password: String,
}

pub fn create_api(site: &Site) -> Result<SwsApi> {
    let client = Client::builder()
        .cookie_store(true)
        .timeout(Duration::from_secs(site.timeout_seconds.max(1)))
        .user_agent(concat!("square_woo_sync/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(SwsApi {
        client,
        rest_root: site.rest_root(),
        ajax_url: site.ajax_url(),
        nonce: site.nonce.to_string(),
        ajax_nonce: site.ajax_nonce.to_string(),
        username: site.username.to_string(),
        app_password: site.app_password.to_string(),
    })
}

fn status_error(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    // WP_Error bodies carry a `message`; prefer it over the bare status line.
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(|m| m.to_string()));
    match message {
        Some(m) => anyhow!("{} ({})", m, status.as_u16()),
        None => {
            let reason = status
                .canonical_reason()
                .map(|r| r.to_string())
                .unwrap_or_else(|| format!("UNKNOWN CODE: {}", status.as_str()));
            anyhow!("{}", reason)
        }
    }
}

impl SwsApi {
    pub async fn call<T: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        query: Option<&[(&str, String)]>,
        json: Option<&T>,
    ) -> Result<String> {
        let url = format!("{}{}{}", self.rest_root, NAMESPACE, endpoint);
        debug!("{} {}", method, url);
        let mut builder = self.client.request(method, url);
        if !self.nonce.is_empty() {
            builder = builder.header(NONCE_HEADER, &self.nonce);
        }
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, Some(&self.app_password));
        }
        if let Some(query) = query {
            builder = builder.query(query);
        }
        if let Some(json) = json {
            let mut json_hdrs = HeaderMap::new();
            json_hdrs.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            builder = builder.headers(json_hdrs).json(json);
        }
        let res = builder.send().await;
        match res {
            Ok(result) => {
                let status = result.status();
                let text_response = result.text().await?;
                if status.is_success() {
                    Ok(text_response)
                } else {
                    Err(status_error(status, &text_response))
                }
            }
            Err(e) => Err(anyhow!("{}", e.to_string())),
        }
    }

    pub async fn get_json<R: DeserializeOwned>(&self, endpoint: &str) -> Result<R> {
        let text = self.call::<Empty>(Method::GET, endpoint, None, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        json: &T,
    ) -> Result<R> {
        let text = self.call(Method::POST, endpoint, None, Some(json)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn get_settings(&self) -> Result<PluginSettings> {
        self.get_json("/settings").await
    }

    /// Sends a single key; the plugin merges it and returns the full object.
    pub async fn update_setting(&self, key: &str, value: Value) -> Result<PluginSettings> {
        let mut body = serde_json::Map::new();
        body.insert(key.to_string(), value);
        self.post_json("/settings", &body).await
    }

    pub async fn get_access_token(&self) -> Result<AccessTokenStatus> {
        self.get_json("/settings/access-token").await
    }

    pub async fn set_access_token(&self, token: &str) -> Result<AccessTokenStatus> {
        self.post_json("/settings/access-token", &json!({ "access_token": token })).await
    }

    pub async fn delete_access_token(&self) -> Result<AccessTokenStatus> {
        let text = self
            .call::<Empty>(Method::DELETE, "/settings/access-token", None, None)
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn get_locations(&self) -> Result<Vec<Location>> {
        let res: LocationsResponse = self.get_json("/settings/get-locations").await?;
        Ok(res.locations)
    }

    pub async fn export_to_square(&self) -> Result<Value> {
        self.get_json("/settings/export-to-square").await
    }

    /// Asks the plugin to start rebuilding its copy of the Square catalog.
    pub async fn request_inventory(&self) -> Result<Value> {
        self.get_json("/square-inventory/").await
    }

    pub async fn saved_inventory(&self) -> Result<SavedInventory> {
        self.get_json("/square-inventory/saved-inventory/").await
    }

    pub async fn post_import(
        &self,
        payload: &ImportPayload<'_>,
    ) -> Result<Vec<ImportResponseEntry>> {
        self.post_json("/square-inventory/import", payload).await
    }

    pub async fn write_log(&self, entry: &LogWrite) -> Result<()> {
        self.call(Method::POST, "/logs", None, Some(entry)).await?;
        Ok(())
    }

    pub async fn get_logs(&self) -> Result<Vec<LogEntry>> {
        let res: LogsResponse = self.get_json("/logs").await?;
        Ok(res.logs)
    }

    pub async fn get_orders(&self, page: u32, per_page: u32) -> Result<OrdersPage> {
        let query = [("page", page.to_string()), ("per_page", per_page.to_string())];
        let text = self
            .call::<Empty>(Method::GET, "/orders", Some(&query[..]), None)
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Creates the Square order and payment for a WooCommerce order.
    pub async fn create_square_order(&self, order_id: u64) -> Result<CreateOrderResponse> {
        self.post_json("/orders", &CreateOrderRequest { order_id }).await
    }

    pub async fn match_products(&self, request: &MatchRequest) -> Result<MatchResponse> {
        self.post_json("/matcher", request).await
    }

    pub async fn ajax<R: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<R> {
        let mut form: Vec<(&str, String)> = vec![
            ("action", action.to_string()),
            ("nonce", self.ajax_nonce.to_string()),
        ];
        form.extend(params.iter().cloned());
        debug!("admin-ajax {}", action);
        let res = self.client.post(&self.ajax_url).form(&form).send().await;
        let result = match res {
            Ok(result) => result,
            Err(e) => return Err(anyhow!("{}", e.to_string())),
        };
        let status = result.status();
        let text = result.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        let envelope: AjaxResponse<Value> = serde_json::from_str(&text)?;
        if !envelope.success {
            let message = match &envelope.data {
                Some(Value::String(s)) => s.to_string(),
                Some(v) => v
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("request rejected")
                    .to_string(),
                None => "request rejected".to_string(),
            };
            return Err(anyhow!("{} failed: {}", action, message));
        }
        Ok(serde_json::from_value(envelope.data.unwrap_or(Value::Null))?)
    }

    pub async fn sync_to_square(&self, product_id: u64) -> Result<Value> {
        self.ajax("sync_to_square", &[("product_id", product_id.to_string())]).await
    }

    pub async fn export_to_square_ajax(&self, product_ids: &[u64]) -> Result<Value> {
        let ids = product_ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        self.ajax("export_to_square", &[("product_ids", ids)]).await
    }

    /// `context` is `product`, `cart` or `checkout`.
    pub async fn get_payment_request(&self, context: &str) -> Result<PaymentRequestOptions> {
        self.ajax("get_payment_request", &[("context", context.to_string())]).await
    }

    pub async fn get_needs_shipping(&self) -> Result<bool> {
        self.ajax("get_needs_shipping", &[]).await
    }
}
