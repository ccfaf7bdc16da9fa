use config::{Config, ConfigError, Environment, File};
use serde_derive::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::payment::WalletVerification;

pub const DOTDIR: &str = ".sws";

#[derive(Debug, Deserialize, Clone)]
pub struct Site {
    /// Root of the WordPress install, e.g. `https://shop.example.com`.
    pub url: String,
    /// Overrides `{url}/wp-json` when the REST root lives elsewhere.
    pub rest_url: Option<String>,
    pub nonce: String,
    pub ajax_nonce: String,
    pub username: String,
    pub app_password: String,
    pub timeout_seconds: u64,
}

impl Site {
    pub fn rest_root(&self) -> String {
        match &self.rest_url {
            Some(r) if !r.is_empty() => r.trim_end_matches('/').to_string(),
            _ => format!("{}/wp-json", self.url.trim_end_matches('/')),
        }
    }

    pub fn ajax_url(&self) -> String {
        format!("{}/wp-admin/admin-ajax.php", self.url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Import {
    pub batch_size: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Refresh {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl Refresh {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Payments {
    pub application_id: String,
    pub location_id: String,
    pub available_card_types: Vec<String>,
    pub wallet_verification: WalletVerification,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Logging {
    pub level: String,
    pub file: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub site: Site,
    pub import: Import,
    pub refresh: Refresh,
    pub payments: Payments,
    pub logging: Logging,
}

pub fn dotdir() -> Result<PathBuf, ConfigError> {
    let mut path = PathBuf::new();
    match home::home_dir() {
        Some(home) => path.push(home),
        None => return Err(ConfigError::Message("unknown home directory".to_owned())),
    };
    path.push(DOTDIR);
    if !path.is_dir() {
        match std::fs::create_dir(&path) {
            Ok(()) => {}
            Err(err) => return Err(ConfigError::Foreign(Box::new(err))),
        }
    }
    Ok(path)
}

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

fn builder_with_defaults() -> Result<Builder, ConfigError> {
    Config::builder()
        .set_default("site.url", "http://localhost")?
        .set_default("site.nonce", "")?
        .set_default("site.ajax_nonce", "")?
        .set_default("site.username", "")?
        .set_default("site.app_password", "")?
        .set_default("site.timeout_seconds", 30)?
        .set_default("import.batch_size", 15)?
        .set_default(
            "import.fields",
            vec!["title", "sku", "description", "price", "stock", "images", "categories"],
        )?
        .set_default("refresh.initial_interval_ms", 1000)?
        .set_default("refresh.max_interval_ms", 60_000)?
        .set_default("refresh.multiplier", 2)?
        .set_default("refresh.max_attempts", 100)?
        .set_default("payments.application_id", "")?
        .set_default("payments.location_id", "")?
        .set_default("payments.available_card_types", Vec::<String>::with_capacity(0))?
        .set_default("payments.wallet_verification", "skip")?
        .set_default("logging.level", "info")?
        .set_default("logging.file", true)
}

/// `SWS_SITE__URL` sets `site.url`.
fn environment() -> Environment {
    Environment::with_prefix("sws").prefix_separator("_").separator("__")
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let basepath = dotdir()?;
        let basepath = basepath
            .to_str()
            .ok_or_else(|| ConfigError::Message("home directory is not valid UTF-8".to_owned()))?;

        let s = builder_with_defaults()?
            .add_source(File::with_name(&format!("{}/config", basepath)).required(false))
            .add_source(environment())
            .build()?;

        s.try_deserialize()
    }

    /// Defaults only, with no file or environment layer.
    pub fn defaults() -> Result<Self, ConfigError> {
        builder_with_defaults()?.build()?.try_deserialize()
    }
}
