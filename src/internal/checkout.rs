use lazy_static::lazy_static;
use log::*;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

pub const PAYMENT_TOKEN_FIELD: &str = "square_payment_token";
pub const VERIFICATION_TOKEN_FIELD: &str = "square_verification_token";

lazy_static! {
    static ref PHONE_JUNK: Regex = Regex::new(r"[^0-9+]+").unwrap();
}

/// State of the storefront checkout form the payment flow writes into:
/// billing inputs, hidden token inputs, the loader and the error panel.
#[derive(Debug, Default, Clone)]
pub struct CheckoutForm {
    fields: HashMap<String, String>,
    hidden: Vec<(String, String)>,
    errors: Vec<String>,
    loader_visible: bool,
}

impl CheckoutForm {
    pub fn new() -> Self {
        CheckoutForm::default()
    }

    pub fn with_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        CheckoutForm {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ..Default::default()
        }
    }

    pub fn set_field(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), value.to_string());
    }

    /// Trimmed value of a visible field, `None` when missing or blank.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    /// Replaces an existing hidden input of the same name, otherwise appends.
    pub fn upsert_hidden(&mut self, name: &str, value: &str) {
        match self.hidden.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.hidden.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_hidden(&mut self, name: &str) {
        self.hidden.retain(|(n, _)| n != name);
    }

    pub fn hidden(&self, name: &str) -> Option<&str> {
        self.hidden.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn hidden_count(&self, name: &str) -> usize {
        self.hidden.iter().filter(|(n, _)| n == name).count()
    }

    pub fn clear_tokens(&mut self) {
        self.remove_hidden(PAYMENT_TOKEN_FIELD);
        self.remove_hidden(VERIFICATION_TOKEN_FIELD);
    }

    pub fn show_loader(&mut self) {
        self.loader_visible = true;
    }

    pub fn hide_loader(&mut self) {
        self.loader_visible = false;
    }

    pub fn loader_visible(&self) -> bool {
        self.loader_visible
    }

    /// Replaces the contents of the single error panel.
    pub fn report_errors<I, S>(&mut self, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors = messages.into_iter().map(Into::into).collect();
        for e in &self.errors {
            warn!("checkout error: {}", e);
        }
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

pub fn normalize_phone(phone: &str) -> String {
    PHONE_JUNK.replace_all(phone, "").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BillingContact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub address_lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

impl BillingContact {
    /// Reads the WooCommerce `billing_*` inputs.
    pub fn from_form(form: &CheckoutForm) -> Self {
        let get = |name: &str| form.field(name).map(|v| v.to_string());
        BillingContact {
            given_name: get("billing_first_name"),
            family_name: get("billing_last_name"),
            email: get("billing_email"),
            phone: form.field("billing_phone").map(normalize_phone).filter(|p| !p.is_empty()),
            address_lines: ["billing_address_1", "billing_address_2"]
                .iter()
                .filter_map(|f| get(f))
                .collect(),
            city: get("billing_city"),
            state: get("billing_state"),
            postal_code: get("billing_postcode"),
            country_code: get("billing_country"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Charge,
    Store,
}

/// Payload for the SDK's buyer verification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub amount: String,
    pub currency_code: String,
    pub intent: Intent,
    pub billing_contact: BillingContact,
}
