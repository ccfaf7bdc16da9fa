use anyhow::Result;
use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::inventory::InventoryItem;

const CACHE_FILE: &str = "inventory.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    fetched_at: Option<DateTime<Utc>>,
    items: Vec<InventoryItem>,
}

/// Local copy of the last inventory snapshot. Always replaced wholesale.
pub struct InventoryCache {
    path: PathBuf,
    contents: CacheFile,
}

pub fn open_cache(dir: &Path) -> Result<InventoryCache> {
    let path = dir.join(CACHE_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(json) if !json.trim().is_empty() => match serde_json::from_str::<CacheFile>(&json) {
            Ok(c) => c,
            Err(err) => {
                warn!("discarding unreadable inventory cache {}: {}", path.display(), err);
                CacheFile::default()
            }
        },
        Ok(_) => CacheFile::default(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => CacheFile::default(),
        Err(err) => return Err(err.into()),
    };
    Ok(InventoryCache { path, contents })
}

impl InventoryCache {
    pub fn items(&self) -> &[InventoryItem] {
        &self.contents.items
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.contents.fetched_at
    }

    pub fn is_empty(&self) -> bool {
        self.contents.items.is_empty()
    }

    /// Swaps in a new snapshot and writes it through to disk.
    pub fn replace(&mut self, items: Vec<InventoryItem>) -> Result<()> {
        self.contents = CacheFile { fetched_at: Some(Utc::now()), items };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&self.contents)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("cached {} inventory items", self.contents.items.len());
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.contents = CacheFile::default();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::inventory::tests::item;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sws-cache-{}-{}", name, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn replace_persists_snapshot() {
        let dir = scratch_dir("persist");
        let mut cache = open_cache(&dir).unwrap();
        assert!(cache.is_empty());
        cache.replace(vec![item("a"), item("b")]).unwrap();

        let reopened = open_cache(&dir).unwrap();
        assert_eq!(reopened.items(), &[item("a"), item("b")]);
        assert!(reopened.fetched_at().is_some());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn corrupt_cache_starts_empty() {
        let dir = scratch_dir("corrupt");
        fs::write(dir.join(CACHE_FILE), "{not json").unwrap();
        let mut cache = open_cache(&dir).unwrap();
        assert!(cache.is_empty());
        cache.clear().unwrap();
        assert!(!dir.join(CACHE_FILE).exists());
        fs::remove_dir_all(dir).ok();
    }
}
