use async_trait::async_trait;
use itertools::Itertools;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::card_brand::brand_allowed;
use super::checkout::{
    BillingContact, CheckoutForm, Intent, VerificationDetails, PAYMENT_TOKEN_FIELD,
    VERIFICATION_TOKEN_FIELD,
};
use super::settings::Payments;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),
    #[error("payment request has not been built yet")]
    MissingPaymentRequest,
    #[error("{}", .0.iter().join("; "))]
    Tokenization(Vec<String>),
    #[error("card brand {0} is not accepted")]
    BrandRejected(String),
    #[error("buyer verification failed")]
    VerificationFailed,
    #[error("{0}")]
    Sdk(String),
}

impl PaymentError {
    /// Lines for the error panel.
    pub fn messages(&self) -> Vec<String> {
        match self {
            PaymentError::Tokenization(list) if !list.is_empty() => list.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// Whether wallet payments go through buyer verification before submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WalletVerification {
    #[default]
    Skip,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletKind {
    ApplePay,
    GooglePay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub amount: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub id: String,
    pub label: String,
    pub amount: String,
}

/// Cart-derived options the SDK builds a payment request from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestOptions {
    pub country_code: String,
    pub currency_code: String,
    pub total: LineItem,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub request_billing_contact: bool,
    #[serde(default)]
    pub request_shipping_contact: bool,
    #[serde(default)]
    pub shipping_options: Vec<ShippingOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub options: PaymentRequestOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardDetails {
    pub brand: String,
    #[serde(default)]
    pub last4: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TokenDetails {
    #[serde(default)]
    pub card: Option<CardDetails>,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdkError {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
}

/// Result of an instrument's `tokenize()`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResult {
    pub status: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub details: Option<TokenDetails>,
    #[serde(default)]
    pub errors: Vec<SdkError>,
}

impl TokenResult {
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }

    pub fn card_brand(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|d| d.card.as_ref())
            .map(|c| c.brand.as_str())
    }

    pub fn error_messages(&self) -> Vec<String> {
        if self.errors.is_empty() {
            return vec![format!("Tokenization failed with status {}", self.status)];
        }
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

/// A card field or wallet button created by the SDK.
#[async_trait]
pub trait Instrument: Send + Sync {
    async fn attach(&self, container: &str) -> Result<(), PaymentError>;
    async fn tokenize(&self) -> Result<TokenResult, PaymentError>;
    async fn destroy(&self) -> Result<(), PaymentError>;
}

/// The payments object from the Square Web Payments SDK.
#[async_trait]
pub trait PaymentsSdk: Send + Sync {
    async fn card(&self) -> Result<Box<dyn Instrument>, PaymentError>;
    async fn apple_pay(
        &self,
        request: &PaymentRequest,
    ) -> Result<Box<dyn Instrument>, PaymentError>;
    async fn google_pay(
        &self,
        request: &PaymentRequest,
    ) -> Result<Box<dyn Instrument>, PaymentError>;
    fn payment_request(
        &self,
        options: &PaymentRequestOptions,
    ) -> Result<PaymentRequest, PaymentError>;
    /// `Ok(None)` when the SDK completed without issuing a verification token.
    async fn verify_buyer(
        &self,
        source_id: &str,
        details: &VerificationDetails,
    ) -> Result<Option<String>, PaymentError>;
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub application_id: String,
    pub location_id: String,
    pub available_card_types: Vec<String>,
    pub wallet_verification: WalletVerification,
}

impl PaymentConfig {
    pub fn from_settings(payments: &Payments) -> Self {
        PaymentConfig {
            application_id: payments.application_id.to_string(),
            location_id: payments.location_id.to_string(),
            available_card_types: payments.available_card_types.clone(),
            wallet_verification: payments.wallet_verification,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    Idle,
    Tokenizing,
    Verifying,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Card,
    Wallet(WalletKind),
}

/// Puts the session and form back into a retryable state when a submit is
/// dropped before it resolves.
struct SubmitGuard<'a> {
    session: &'a mut PaymentSession,
    form: &'a mut CheckoutForm,
    finished: bool,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("payment submit abandoned while {:?}", self.session.state);
            self.form.clear_tokens();
            self.form.hide_loader();
            self.session.state = CheckoutState::Failed;
        }
    }
}

/// Owns every SDK object for one checkout page: the card field, cached wallet
/// buttons and the current payment request.
pub struct PaymentSession {
    sdk: Arc<dyn PaymentsSdk>,
    config: PaymentConfig,
    card: Option<Box<dyn Instrument>>,
    wallets: HashMap<WalletKind, Box<dyn Instrument>>,
    payment_request: Option<PaymentRequest>,
    state: CheckoutState,
}

impl PaymentSession {
    /// Builds the card field and attaches it to `container`.
    pub async fn mount(
        sdk: Arc<dyn PaymentsSdk>,
        config: PaymentConfig,
        container: &str,
    ) -> Result<Self, PaymentError> {
        if config.application_id.is_empty() || config.location_id.is_empty() {
            error!("square application id or location id missing");
            return Err(PaymentError::Validation("payments are not configured".to_string()));
        }
        if container.trim().is_empty() {
            error!("no container to attach the card field to");
            return Err(PaymentError::Validation("card container missing".to_string()));
        }
        let card = sdk.card().await?;
        card.attach(container).await?;
        debug!("card attached to {}", container);
        Ok(PaymentSession {
            sdk,
            config,
            card: Some(card),
            wallets: HashMap::new(),
            payment_request: None,
            state: CheckoutState::Idle,
        })
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    pub fn payment_request(&self) -> Option<&PaymentRequest> {
        self.payment_request.as_ref()
    }

    fn in_flight(&self) -> bool {
        matches!(self.state, CheckoutState::Tokenizing | CheckoutState::Verifying)
    }

    /// Rebuilds the payment request after a cart, shipping or coupon change.
    /// Cached wallet buttons were built against the old request, so they are
    /// torn down and re-created on next use.
    pub async fn refresh_payment_request(
        &mut self,
        options: PaymentRequestOptions,
    ) -> Result<(), PaymentError> {
        let request = self.sdk.payment_request(&options)?;
        for (kind, wallet) in self.wallets.drain() {
            if let Err(e) = wallet.destroy().await {
                warn!("could not destroy {:?} button: {}", kind, e);
            }
        }
        debug!("payment request rebuilt, total {}", request.options.total.amount);
        self.payment_request = Some(request);
        Ok(())
    }

    /// Creates and attaches the wallet button once per payment request.
    pub async fn ensure_wallet(
        &mut self,
        kind: WalletKind,
        container: &str,
    ) -> Result<(), PaymentError> {
        if self.wallets.contains_key(&kind) {
            return Ok(());
        }
        let request = self
            .payment_request
            .as_ref()
            .ok_or(PaymentError::MissingPaymentRequest)?;
        let wallet = match kind {
            WalletKind::ApplePay => self.sdk.apple_pay(request).await?,
            WalletKind::GooglePay => self.sdk.google_pay(request).await?,
        };
        wallet.attach(container).await?;
        self.wallets.insert(kind, wallet);
        Ok(())
    }

    fn fail(&mut self, form: &mut CheckoutForm, err: PaymentError) {
        error!("payment failed: {}", err);
        form.report_errors(err.messages());
        form.clear_tokens();
        form.hide_loader();
        self.state = CheckoutState::Failed;
    }

    /// Card checkout. Returns true when both tokens are on the form and the
    /// order may be submitted.
    pub async fn submit_card(&mut self, form: &mut CheckoutForm) -> bool {
        self.submit(Method::Card, form).await
    }

    async fn submit(&mut self, method: Method, form: &mut CheckoutForm) -> bool {
        if self.in_flight() {
            debug!("payment already in progress");
            return false;
        }
        form.clear_errors();
        form.show_loader();
        let mut guard = SubmitGuard { session: self, form, finished: false };
        let result = match method {
            Method::Card => guard.session.card_flow(guard.form).await,
            Method::Wallet(kind) => guard.session.wallet_flow(kind, guard.form).await,
        };
        guard.finished = true;
        match result {
            Ok(()) => {
                guard.session.state = CheckoutState::Succeeded;
                true
            }
            Err(e) => {
                guard.session.fail(guard.form, e);
                false
            }
        }
    }

    async fn card_flow(&mut self, form: &mut CheckoutForm) -> Result<(), PaymentError> {
        let (amount, currency) = match &self.payment_request {
            Some(r) => (r.options.total.amount.clone(), r.options.currency_code.clone()),
            None => return Err(PaymentError::MissingPaymentRequest),
        };
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| PaymentError::Validation("card is not attached".to_string()))?;

        self.state = CheckoutState::Tokenizing;
        let result = card.tokenize().await?;
        if !result.is_ok() {
            return Err(PaymentError::Tokenization(result.error_messages()));
        }
        let brand = result.card_brand().unwrap_or("UNKNOWN").to_string();
        if !brand_allowed(&brand, &self.config.available_card_types) {
            return Err(PaymentError::BrandRejected(brand));
        }
        let token = result
            .token
            .ok_or_else(|| PaymentError::Tokenization(vec!["no token returned".to_string()]))?;
        form.upsert_hidden(PAYMENT_TOKEN_FIELD, &token);

        self.verify(form, &token, amount, currency).await
    }

    async fn verify(
        &mut self,
        form: &mut CheckoutForm,
        token: &str,
        amount: String,
        currency_code: String,
    ) -> Result<(), PaymentError> {
        self.state = CheckoutState::Verifying;
        let details = VerificationDetails {
            amount,
            currency_code,
            intent: Intent::Charge,
            billing_contact: BillingContact::from_form(form),
        };
        match self.sdk.verify_buyer(token, &details).await? {
            Some(verification) => {
                form.upsert_hidden(VERIFICATION_TOKEN_FIELD, &verification);
                Ok(())
            }
            None => Err(PaymentError::VerificationFailed),
        }
    }

    /// Wallet checkout; same result contract as [`PaymentSession::submit_card`].
    pub async fn submit_wallet(&mut self, kind: WalletKind, form: &mut CheckoutForm) -> bool {
        self.submit(Method::Wallet(kind), form).await
    }

    async fn wallet_flow(
        &mut self,
        kind: WalletKind,
        form: &mut CheckoutForm,
    ) -> Result<(), PaymentError> {
        let (amount, currency) = match &self.payment_request {
            Some(r) => (r.options.total.amount.clone(), r.options.currency_code.clone()),
            None => return Err(PaymentError::MissingPaymentRequest),
        };
        let wallet = self
            .wallets
            .get(&kind)
            .ok_or_else(|| PaymentError::Validation(format!("{:?} is not available", kind)))?;

        self.state = CheckoutState::Tokenizing;
        let result = wallet.tokenize().await?;
        if !result.is_ok() {
            return Err(PaymentError::Tokenization(result.error_messages()));
        }
        // Apple Pay hides the card network; Google Pay reports it.
        if let Some(brand) = result.card_brand() {
            if !brand_allowed(brand, &self.config.available_card_types) {
                return Err(PaymentError::BrandRejected(brand.to_string()));
            }
        }
        let token = result
            .token
            .ok_or_else(|| PaymentError::Tokenization(vec!["no token returned".to_string()]))?;
        form.upsert_hidden(PAYMENT_TOKEN_FIELD, &token);

        match self.config.wallet_verification {
            WalletVerification::Required => self.verify(form, &token, amount, currency).await,
            WalletVerification::Skip => {
                info!("{:?} payment submitted without buyer verification", kind);
                Ok(())
            }
        }
    }

    /// Tears down every SDK object the session created.
    pub async fn dispose(mut self) {
        if let Some(card) = self.card.take() {
            if let Err(e) = card.destroy().await {
                warn!("could not destroy card field: {}", e);
            }
        }
        for (kind, wallet) in self.wallets.drain() {
            if let Err(e) = wallet.destroy().await {
                warn!("could not destroy {:?} button: {}", kind, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeInstrument {
        result: Value,
        tokenized: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Instrument for FakeInstrument {
        async fn attach(&self, _container: &str) -> Result<(), PaymentError> {
            Ok(())
        }

        async fn tokenize(&self) -> Result<TokenResult, PaymentError> {
            self.tokenized.fetch_add(1, Ordering::SeqCst);
            serde_json::from_value(self.result.clone())
                .map_err(|e| PaymentError::Sdk(e.to_string()))
        }

        async fn destroy(&self) -> Result<(), PaymentError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeSdk {
        token: Mutex<Value>,
        verification: Option<String>,
        verify_error: bool,
        verify_hangs: AtomicBool,
        verify_calls: Mutex<Vec<(String, VerificationDetails)>>,
        wallets_built: AtomicUsize,
        tokenized: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
    }

    impl FakeSdk {
        fn new(token: Value, verification: Option<&str>) -> Self {
            FakeSdk {
                token: Mutex::new(token),
                verification: verification.map(|v| v.to_string()),
                verify_error: false,
                verify_hangs: AtomicBool::new(false),
                verify_calls: Mutex::new(vec![]),
                wallets_built: AtomicUsize::new(0),
                tokenized: Arc::new(AtomicUsize::new(0)),
                destroyed: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn instrument(&self) -> Box<dyn Instrument> {
            Box::new(FakeInstrument {
                result: self.token.lock().unwrap().clone(),
                tokenized: self.tokenized.clone(),
                destroyed: self.destroyed.clone(),
            })
        }

        fn verify_calls(&self) -> Vec<(String, VerificationDetails)> {
            self.verify_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PaymentsSdk for FakeSdk {
        async fn card(&self) -> Result<Box<dyn Instrument>, PaymentError> {
            Ok(self.instrument())
        }

        async fn apple_pay(
            &self,
            _request: &PaymentRequest,
        ) -> Result<Box<dyn Instrument>, PaymentError> {
            self.wallets_built.fetch_add(1, Ordering::SeqCst);
            Ok(self.instrument())
        }

        async fn google_pay(
            &self,
            _request: &PaymentRequest,
        ) -> Result<Box<dyn Instrument>, PaymentError> {
            self.wallets_built.fetch_add(1, Ordering::SeqCst);
            Ok(self.instrument())
        }

        fn payment_request(
            &self,
            options: &PaymentRequestOptions,
        ) -> Result<PaymentRequest, PaymentError> {
            Ok(PaymentRequest { id: Uuid::new_v4(), options: options.clone() })
        }

        async fn verify_buyer(
            &self,
            source_id: &str,
            details: &VerificationDetails,
        ) -> Result<Option<String>, PaymentError> {
            self.verify_calls
                .lock()
                .unwrap()
                .push((source_id.to_string(), details.clone()));
            if self.verify_hangs.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.verify_error {
                return Err(PaymentError::Sdk("3DS challenge window closed".to_string()));
            }
            Ok(self.verification.clone())
        }
    }

    fn options(amount: &str) -> PaymentRequestOptions {
        serde_json::from_value(json!({
            "countryCode": "US",
            "currencyCode": "USD",
            "total": {"amount": amount, "label": "Total"},
            "requestShippingContact": false
        }))
        .unwrap()
    }

    fn config(card_types: &[&str], wallet_verification: WalletVerification) -> PaymentConfig {
        PaymentConfig {
            application_id: "sq0idp-app".to_string(),
            location_id: "L1".to_string(),
            available_card_types: card_types.iter().map(|s| s.to_string()).collect(),
            wallet_verification,
        }
    }

    fn visa_token() -> Value {
        json!({
            "status": "OK",
            "token": "tok_1",
            "details": {"card": {"brand": "VISA", "last4": "1111"}}
        })
    }

    fn billing_form() -> CheckoutForm {
        CheckoutForm::with_fields([
            ("billing_first_name", "Ada"),
            ("billing_last_name", "Lovelace"),
            ("billing_email", "ada@example.com"),
        ])
    }

    async fn session(
        sdk: &Arc<FakeSdk>,
        card_types: &[&str],
        wv: WalletVerification,
    ) -> PaymentSession {
        let mut s = PaymentSession::mount(sdk.clone(), config(card_types, wv), "#card-container")
            .await
            .expect("mount");
        s.refresh_payment_request(options("42.50")).await.expect("request");
        s
    }

    #[tokio::test]
    async fn visa_passes_brand_check_and_verifies_total() {
        let sdk = Arc::new(FakeSdk::new(visa_token(), Some("verf_1")));
        let mut s = session(&sdk, &["visa"], WalletVerification::Skip).await;
        let mut form = billing_form();

        assert!(s.submit_card(&mut form).await);
        assert_eq!(s.state(), CheckoutState::Succeeded);
        let calls = sdk.verify_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "tok_1");
        assert_eq!(calls[0].1.amount, s.payment_request().unwrap().options.total.amount);
        assert_eq!(calls[0].1.amount, "42.50");
        assert_eq!(calls[0].1.currency_code, "USD");
        assert_eq!(calls[0].1.billing_contact.given_name.as_deref(), Some("Ada"));
        assert_eq!(form.hidden(PAYMENT_TOKEN_FIELD), Some("tok_1"));
        assert_eq!(form.hidden(VERIFICATION_TOKEN_FIELD), Some("verf_1"));
        assert!(form.errors().is_empty());
    }

    #[tokio::test]
    async fn failed_tokenize_stops_before_verification() {
        let sdk = Arc::new(FakeSdk::new(
            json!({"status": "Some Failure",
                   "errors": [{"type": "VALIDATION_ERROR", "field": "cardNumber",
                   "message": "Card number is not valid"}]}),
            Some("verf_1"),
        ));
        let mut s = session(&sdk, &["visa"], WalletVerification::Skip).await;
        let mut form = billing_form();
        form.upsert_hidden(PAYMENT_TOKEN_FIELD, "stale");
        form.upsert_hidden(VERIFICATION_TOKEN_FIELD, "stale");

        assert!(!s.submit_card(&mut form).await);
        assert!(!form.loader_visible());
        assert_eq!(form.hidden(PAYMENT_TOKEN_FIELD), None);
        assert_eq!(form.hidden(VERIFICATION_TOKEN_FIELD), None);
        assert!(sdk.verify_calls().is_empty());
        assert_eq!(form.errors(), &["Card number is not valid".to_string()]);
        assert_eq!(s.state(), CheckoutState::Failed);
    }

    #[tokio::test]
    async fn jcb_rejected_unless_allowed() {
        let jcb = json!({"status": "OK", "token": "tok_j", "details": {"card": {"brand": "JCB"}}});

        let sdk = Arc::new(FakeSdk::new(jcb.clone(), Some("verf")));
        let mut s = session(&sdk, &["visa", "mastercard"], WalletVerification::Skip).await;
        let mut form = billing_form();
        assert!(!s.submit_card(&mut form).await);
        assert_eq!(form.errors(), &["card brand JCB is not accepted".to_string()]);
        assert!(sdk.verify_calls().is_empty());
        assert_eq!(form.hidden(PAYMENT_TOKEN_FIELD), None);

        let sdk = Arc::new(FakeSdk::new(jcb, Some("verf")));
        let mut s = session(&sdk, &["visa", "jcb"], WalletVerification::Skip).await;
        let mut form = billing_form();
        assert!(s.submit_card(&mut form).await);
    }

    #[tokio::test]
    async fn missing_verification_token_blocks_submit() {
        let sdk = Arc::new(FakeSdk::new(visa_token(), None));
        let mut s = session(&sdk, &["visa"], WalletVerification::Skip).await;
        let mut form = billing_form();
        assert!(!s.submit_card(&mut form).await);
        assert_eq!(form.errors(), &["buyer verification failed".to_string()]);
        assert_eq!(form.hidden(PAYMENT_TOKEN_FIELD), None);
    }

    #[tokio::test]
    async fn sdk_error_resets_for_retry_without_duplicate_fields() {
        let mut sdk = FakeSdk::new(visa_token(), Some("verf_1"));
        sdk.verify_error = true;
        let sdk = Arc::new(sdk);
        let mut s = session(&sdk, &["visa"], WalletVerification::Skip).await;
        let mut form = billing_form();

        assert!(!s.submit_card(&mut form).await);
        assert_eq!(form.errors(), &["3DS challenge window closed".to_string()]);
        assert_eq!(s.state(), CheckoutState::Failed);

        // A retry runs the whole sequence again.
        assert!(!s.submit_card(&mut form).await);
        assert_eq!(sdk.tokenized.load(Ordering::SeqCst), 2);
        assert_eq!(form.hidden_count(PAYMENT_TOKEN_FIELD), 0);
    }

    #[tokio::test]
    async fn abandoned_submit_can_be_retried() {
        let sdk = Arc::new(FakeSdk::new(visa_token(), Some("verf_1")));
        sdk.verify_hangs.store(true, Ordering::SeqCst);
        let mut s = session(&sdk, &["visa"], WalletVerification::Skip).await;
        let mut form = billing_form();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), s.submit_card(&mut form)).await;
        assert!(timed_out.is_err());
        assert_eq!(s.state(), CheckoutState::Failed);
        assert!(!form.loader_visible());
        assert_eq!(form.hidden(PAYMENT_TOKEN_FIELD), None);

        sdk.verify_hangs.store(false, Ordering::SeqCst);
        assert!(s.submit_card(&mut form).await);
        assert_eq!(s.state(), CheckoutState::Succeeded);
        assert_eq!(form.hidden(VERIFICATION_TOKEN_FIELD), Some("verf_1"));
    }

    #[tokio::test]
    async fn repeated_success_keeps_single_hidden_inputs() {
        let sdk = Arc::new(FakeSdk::new(visa_token(), Some("verf_1")));
        let mut s = session(&sdk, &["visa"], WalletVerification::Skip).await;
        let mut form = billing_form();
        assert!(s.submit_card(&mut form).await);
        assert!(s.submit_card(&mut form).await);
        assert_eq!(form.hidden_count(PAYMENT_TOKEN_FIELD), 1);
        assert_eq!(form.hidden_count(VERIFICATION_TOKEN_FIELD), 1);
    }

    #[tokio::test]
    async fn card_without_payment_request_is_a_validation_failure() {
        let sdk = Arc::new(FakeSdk::new(visa_token(), Some("verf")));
        let cfg = config(&["visa"], WalletVerification::Skip);
        let mut s = PaymentSession::mount(sdk.clone(), cfg, "#card")
            .await
            .unwrap();
        let mut form = billing_form();
        assert!(!s.submit_card(&mut form).await);
        assert_eq!(sdk.tokenized.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mount_requires_container_and_ids() {
        let sdk = Arc::new(FakeSdk::new(visa_token(), None));
        let err = PaymentSession::mount(sdk.clone(), config(&[], WalletVerification::Skip), " ")
            .await
            .err()
            .unwrap();
        assert_eq!(err, PaymentError::Validation("card container missing".to_string()));

        let mut cfg = config(&[], WalletVerification::Skip);
        cfg.location_id.clear();
        assert!(PaymentSession::mount(sdk, cfg, "#card").await.is_err());
    }

    #[tokio::test]
    async fn wallet_skips_verification_by_default() {
        let sdk = Arc::new(FakeSdk::new(json!({"status": "OK", "token": "wal_1"}), Some("verf")));
        let mut s = session(&sdk, &["visa"], WalletVerification::Skip).await;
        s.ensure_wallet(WalletKind::ApplePay, "#apple-pay").await.unwrap();
        let mut form = billing_form();

        assert!(s.submit_wallet(WalletKind::ApplePay, &mut form).await);
        assert_eq!(form.hidden(PAYMENT_TOKEN_FIELD), Some("wal_1"));
        assert!(sdk.verify_calls().is_empty());
    }

    #[tokio::test]
    async fn wallet_verifies_when_required() {
        let sdk = Arc::new(FakeSdk::new(json!({"status": "OK", "token": "wal_1"}), Some("verf_w")));
        let mut s = session(&sdk, &["visa"], WalletVerification::Required).await;
        s.ensure_wallet(WalletKind::GooglePay, "#google-pay").await.unwrap();
        let mut form = billing_form();

        assert!(s.submit_wallet(WalletKind::GooglePay, &mut form).await);
        assert_eq!(sdk.verify_calls()[0].1.amount, "42.50");
        assert_eq!(form.hidden(VERIFICATION_TOKEN_FIELD), Some("verf_w"));
    }

    #[tokio::test]
    async fn wallet_is_cached_until_cart_changes() {
        let sdk = Arc::new(FakeSdk::new(json!({"status": "OK", "token": "wal_1"}), None));
        let mut s = session(&sdk, &[], WalletVerification::Skip).await;
        s.ensure_wallet(WalletKind::ApplePay, "#apple-pay").await.unwrap();
        s.ensure_wallet(WalletKind::ApplePay, "#apple-pay").await.unwrap();
        assert_eq!(sdk.wallets_built.load(Ordering::SeqCst), 1);

        let first = s.payment_request().unwrap().id;
        s.refresh_payment_request(options("50.00")).await.unwrap();
        assert_ne!(s.payment_request().unwrap().id, first);
        assert_eq!(s.payment_request().unwrap().options.total.amount, "50.00");
        assert_eq!(sdk.destroyed.load(Ordering::SeqCst), 1);

        s.ensure_wallet(WalletKind::ApplePay, "#apple-pay").await.unwrap();
        assert_eq!(sdk.wallets_built.load(Ordering::SeqCst), 2);

        s.dispose().await;
        // card + the rebuilt wallet
        assert_eq!(sdk.destroyed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wallet_card_brand_is_checked_when_reported() {
        let sdk = Arc::new(FakeSdk::new(
            json!({
                "status": "OK",
                "token": "wal_g",
                "details": {"card": {"brand": "JCB"}, "method": "Google Pay"}
            }),
            None,
        ));
        let mut s = session(&sdk, &["visa"], WalletVerification::Skip).await;
        s.ensure_wallet(WalletKind::GooglePay, "#google-pay").await.unwrap();
        let mut form = billing_form();
        assert!(!s.submit_wallet(WalletKind::GooglePay, &mut form).await);
        assert_eq!(form.hidden(PAYMENT_TOKEN_FIELD), None);
    }

    #[test]
    fn config_from_settings_carries_policy() {
        let mut settings = crate::internal::settings::Settings::defaults().unwrap();
        settings.payments.available_card_types = vec!["visa".to_string(), "jcb".to_string()];
        settings.payments.wallet_verification = WalletVerification::Required;
        let cfg = PaymentConfig::from_settings(&settings.payments);
        assert_eq!(cfg.available_card_types, vec!["visa".to_string(), "jcb".to_string()]);
        assert_eq!(cfg.wallet_verification, WalletVerification::Required);
        assert!(cfg.application_id.is_empty());
    }

    #[tokio::test]
    async fn wallet_without_button_fails() {
        let sdk = Arc::new(FakeSdk::new(json!({"status": "OK", "token": "wal_1"}), None));
        let mut s = session(&sdk, &[], WalletVerification::Skip).await;
        let mut form = billing_form();
        assert!(!s.submit_wallet(WalletKind::GooglePay, &mut form).await);
        assert_eq!(form.errors(), &["GooglePay is not available".to_string()]);
    }
}
