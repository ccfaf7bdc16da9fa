use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderCustomer {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderSummary {
    pub id: u64,
    pub status: String,
    #[serde(default)]
    pub date: Option<String>,
    pub total: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer: Option<OrderCustomer>,
    /// Set once the order has been pushed to Square.
    #[serde(default)]
    pub square_order_id: Option<String>,
}

impl OrderSummary {
    pub fn synced(&self) -> bool {
        self.square_order_id.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn customer_name(&self) -> String {
        match &self.customer {
            Some(c) => format!("{} {}", c.first_name, c.last_name).trim().to_string(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdersPage {
    #[serde(default)]
    pub orders: Vec<OrderSummary>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderRequest {
    pub order_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}
