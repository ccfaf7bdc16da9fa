use async_trait::async_trait;
use futures::future::join_all;
use log::*;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::api::SwsApi;
use super::inventory::{find_by_id, InventoryItem, SyncStatus};
use super::logs::{LogLevel, LogWrite};

pub const MIN_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 50;

/// How long a finished run waits for its mirrored log writes.
pub const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("not found in inventory")]
    NotFound,
    #[error("Request Aborted")]
    Aborted,
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Transport(String),
    #[error("batch size {0} must be between 5 and 50")]
    BatchSize(usize),
    #[error("unknown import field: {0}")]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(usize);

impl BatchSize {
    pub fn new(size: usize) -> Result<Self, ImportError> {
        if (MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
            Ok(BatchSize(size))
        } else {
            Err(ImportError::BatchSize(size))
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

/// Splits `items` into contiguous chunks of at most `size`, in input order.
pub fn create_batches<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

/// Which product fields the plugin should write on the WooCommerce side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DataToImport {
    pub title: bool,
    pub sku: bool,
    pub description: bool,
    pub price: bool,
    pub stock: bool,
    pub images: bool,
    pub categories: bool,
}

impl DataToImport {
    pub fn all() -> Self {
        DataToImport {
            title: true,
            sku: true,
            description: true,
            price: true,
            stock: true,
            images: true,
            categories: true,
        }
    }

    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, ImportError> {
        let mut d = DataToImport::default();
        for field in fields {
            match field.as_ref().trim().to_lowercase().as_str() {
                "title" | "name" => d.title = true,
                "sku" => d.sku = true,
                "description" => d.description = true,
                "price" => d.price = true,
                "stock" => d.stock = true,
                "images" | "image" => d.images = true,
                "categories" | "category" => d.categories = true,
                "" => {}
                other => return Err(ImportError::UnknownField(other.to_string())),
            }
        }
        Ok(d)
    }
}

/// Body for `POST /square-inventory/import`.
#[derive(Debug, Serialize)]
pub struct ImportPayload<'a> {
    pub product: Vec<&'a InventoryItem>,
    pub datatoimport: &'a DataToImport,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    // PHP hands back ints, numeric strings or "N/A" depending on the path taken.
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportResponseEntry {
    pub status: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub product_id: Option<u64>,
    #[serde(default)]
    pub square_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Success,
    Failed,
}

fn na_when_none<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match id {
        Some(id) => serializer.serialize_u64(*id),
        None => serializer.serialize_str("N/A"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportProgressEntry {
    pub status: ImportStatus,
    #[serde(serialize_with = "na_when_none")]
    pub product_id: Option<u64>,
    pub square_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ImportProgressEntry {
    pub fn success(product_id: u64, square_id: &str) -> Self {
        ImportProgressEntry {
            status: ImportStatus::Success,
            product_id: Some(product_id),
            square_id: square_id.to_string(),
            message: None,
        }
    }

    pub fn failed(square_id: &str, err: &ImportError) -> Self {
        ImportProgressEntry {
            status: ImportStatus::Failed,
            product_id: None,
            square_id: square_id.to_string(),
            message: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ImportStatus::Success
    }

    fn log_write(&self) -> LogWrite {
        let (log, level) = match self.product_id {
            Some(pid) if self.is_success() => (
                format!("Product {} imported to WooCommerce as #{}", self.square_id, pid),
                LogLevel::Success,
            ),
            _ => (
                format!(
                    "Failed to import product {}: {}",
                    self.square_id,
                    self.message.as_deref().unwrap_or("unknown error")
                ),
                LogLevel::Error,
            ),
        };
        LogWrite {
            log,
            level,
            context: serde_json::to_value(self).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub product_id: u64,
    pub square_id: String,
}

/// Remote side of an import: one product per call plus the log mirror.
#[async_trait]
pub trait ImportBackend: Send + Sync {
    async fn import_item(
        &self,
        item: &InventoryItem,
        fields: &DataToImport,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, ImportError>;

    async fn mirror_log(&self, entry: LogWrite) -> anyhow::Result<()>;
}

fn normalize_response(
    entries: Vec<ImportResponseEntry>,
    square_id: &str,
) -> Result<ImportOutcome, ImportError> {
    let entry = match entries.into_iter().next() {
        Some(entry) => entry,
        None => return Err(ImportError::Rejected("empty import response".to_string())),
    };
    match (entry.status.as_str(), entry.product_id) {
        ("success", Some(product_id)) => Ok(ImportOutcome {
            product_id,
            square_id: entry.square_id.unwrap_or_else(|| square_id.to_string()),
        }),
        _ => Err(ImportError::Rejected(
            entry.message.unwrap_or_else(|| format!("import {}", entry.status)),
        )),
    }
}

#[async_trait]
impl ImportBackend for SwsApi {
    async fn import_item(
        &self,
        item: &InventoryItem,
        fields: &DataToImport,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, ImportError> {
        let payload = ImportPayload { product: vec![item], datatoimport: fields };
        let entries = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ImportError::Aborted),
            res = self.post_import(&payload) => {
                res.map_err(|e| ImportError::Transport(e.to_string()))?
            }
        };
        normalize_response(entries, &item.id)
    }

    async fn mirror_log(&self, entry: LogWrite) -> anyhow::Result<()> {
        self.write_log(&entry).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

pub struct ImportRequest {
    /// The rows picked for import.
    pub products: Vec<InventoryItem>,
    /// Full inventory snapshot the picks are resolved against.
    pub inventory: Vec<InventoryItem>,
    pub data_to_import: DataToImport,
    pub batch_size: BatchSize,
    pub cancel: CancellationToken,
}

pub struct ImportProgress<'a> {
    pub batch: usize,
    pub batches: usize,
    pub total: usize,
    pub entries: &'a [ImportProgressEntry],
}

impl ImportProgress<'_> {
    pub fn done(&self) -> usize {
        self.entries.len()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_success()).count()
    }
}

#[derive(Debug)]
pub struct ImportReport {
    pub run_id: Uuid,
    pub state: RunState,
    pub progress: Vec<ImportProgressEntry>,
    pub inventory: Vec<InventoryItem>,
}

/// Links every item that has a successful progress entry; everything else is
/// copied through untouched.
pub fn apply_progress(
    inventory: &[InventoryItem],
    progress: &[ImportProgressEntry],
) -> Vec<InventoryItem> {
    let linked: HashMap<&str, u64> = progress
        .iter()
        .filter(|e| e.is_success())
        .filter_map(|e| e.product_id.map(|pid| (e.square_id.as_str(), pid)))
        .collect();
    link_items(inventory, &linked)
}

/// Copies `inventory`, marking the items named in `links` as linked to the
/// given WooCommerce product id.
pub fn link_items(inventory: &[InventoryItem], links: &HashMap<&str, u64>) -> Vec<InventoryItem> {
    inventory
        .iter()
        .map(|item| match links.get(item.id.as_str()) {
            Some(pid) => {
                let mut updated = item.clone();
                updated.status = SyncStatus::Linked;
                updated.woocommerce_product_id = Some(*pid);
                updated
            }
            None => item.clone(),
        })
        .collect()
}

pub struct Importer {
    backend: Arc<dyn ImportBackend>,
    state: Mutex<RunState>,
    log_drain: Duration,
}

struct RunGuard<'a> {
    importer: &'a Importer,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(mut self, state: RunState) {
        self.importer.set_state(state);
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.importer.set_state(RunState::Failed);
        }
    }
}

impl Importer {
    pub fn new(backend: Arc<dyn ImportBackend>) -> Self {
        Importer { backend, state: Mutex::new(RunState::Idle), log_drain: LOG_DRAIN_TIMEOUT }
    }

    pub fn with_log_drain(mut self, log_drain: Duration) -> Self {
        self.log_drain = log_drain;
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == RunState::Running {
            return None;
        }
        *state = RunState::Running;
        Some(RunGuard { importer: self, finished: false })
    }

    async fn import_one(
        &self,
        product: &InventoryItem,
        request: &ImportRequest,
    ) -> ImportProgressEntry {
        let source = match find_by_id(&request.inventory, &product.id) {
            Some(source) => source,
            None => {
                warn!("{} not found in inventory", product.id);
                return ImportProgressEntry::failed(&product.id, &ImportError::NotFound);
            }
        };
        if request.cancel.is_cancelled() {
            return ImportProgressEntry::failed(&product.id, &ImportError::Aborted);
        }
        match self
            .backend
            .import_item(source, &request.data_to_import, &request.cancel)
            .await
        {
            Ok(outcome) => ImportProgressEntry::success(outcome.product_id, &outcome.square_id),
            Err(e) => {
                debug!("import of {} failed: {}", product.id, e);
                ImportProgressEntry::failed(&product.id, &e)
            }
        }
    }

    /// Runs one import. Returns `None` without doing anything if another run
    /// is still in flight.
    pub async fn run<F>(&self, request: ImportRequest, mut on_progress: F) -> Option<ImportReport>
    where
        F: FnMut(&ImportProgress<'_>) + Send,
    {
        let guard = match self.try_begin() {
            Some(guard) => guard,
            None => {
                debug!("import already running, ignoring request");
                return None;
            }
        };
        let run_id = Uuid::new_v4();
        let batches = create_batches(&request.products, request.batch_size.get());
        info!(
            "import {}: {} products in {} batches of {}",
            run_id,
            request.products.len(),
            batches.len(),
            request.batch_size.get()
        );

        let mut progress: Vec<ImportProgressEntry> = Vec::with_capacity(request.products.len());
        let mut logs = JoinSet::new();
        for (index, batch) in batches.iter().enumerate() {
            let results =
                join_all(batch.iter().map(|product| self.import_one(product, &request))).await;
            for entry in results {
                let backend = self.backend.clone();
                let write = entry.log_write();
                logs.spawn(async move {
                    if let Err(e) = backend.mirror_log(write).await {
                        warn!("could not write import log: {}", e);
                    }
                });
                progress.push(entry);
            }
            on_progress(&ImportProgress {
                batch: index + 1,
                batches: batches.len(),
                total: request.products.len(),
                entries: &progress,
            });
        }
        let drain = async { while logs.join_next().await.is_some() {} };
        if tokio::time::timeout(self.log_drain, drain).await.is_err() {
            warn!("import log writes still pending after {:?}, detaching them", self.log_drain);
            logs.detach_all();
        }

        let inventory = apply_progress(&request.inventory, &progress);
        let failed = progress.iter().filter(|e| !e.is_success()).count();
        let state = if failed == 0 { RunState::Succeeded } else { RunState::Failed };
        info!(
            "import {} finished: {} imported, {} failed",
            run_id,
            progress.len() - failed,
            failed
        );
        guard.finish(state);
        Some(ImportReport { run_id, state, progress, inventory })
    }
}
