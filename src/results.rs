use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::tender::TenderRecord;

pub const RESULT_FILE: &str = "Filtered_Tenders.json";
const SET_DIR_SUFFIX: &str = " Tenders";

/// Rejects names that could escape the result directory. The HTTP boundary calls this before
/// handing a name to the store.
pub fn is_valid_set_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.starts_with('.')
}

/// Named result sets stored as `<root>/<name> Tenders/Filtered_Tenders.json`.
///
/// Writers of the same name are serialised; the last one wins.
pub struct ResultStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: Mutex::new(HashMap::new()) }
    }

    fn set_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, SET_DIR_SUFFIX))
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Drops the map entry for `name` once no other writer holds or waits on it.
    async fn release(&self, name: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let ours = locks.get(name).map_or(false, |entry| Arc::ptr_eq(entry, &lock));
        if ours && Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    /// Writes (or replaces) the result set and returns the JSON file path.
    pub async fn save(&self, name: &str, records: &[TenderRecord]) -> Result<PathBuf> {
        let lock = self.lock_for(name).await;
        let result = {
            let _guard = lock.lock().await;
            self.write_set(name, records)
        };
        self.release(name, lock).await;
        result
    }

    fn write_set(&self, name: &str, records: &[TenderRecord]) -> Result<PathBuf> {
        let dir = self.set_dir(name);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(RESULT_FILE);

        let json = serde_json::to_vec_pretty(records).context("serialising result set")?;
        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temporary file in {}", dir.display()))?;
        tmp.write_all(&json).context("writing result set")?;
        tmp.persist(&path)
            .with_context(|| format!("moving result set into {}", path.display()))?;

        info!("[RESULTS] Saved {} tenders to {}", records.len(), path.display());
        Ok(path)
    }

    pub async fn load(&self, name: &str) -> Result<Vec<TenderRecord>> {
        let path = self.set_dir(name).join(RESULT_FILE);
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    /// Result-set names, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let dir_name = entry.file_name().to_string_lossy().to_string();
                dir_name.strip_suffix(SET_DIR_SUFFIX).map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Best effort: a set that is already gone counts as deleted.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let lock = self.lock_for(name).await;
        let result = {
            let _guard = lock.lock().await;
            self.remove_set(name)
        };
        self.release(name, lock).await;
        result
    }

    fn remove_set(&self, name: &str) -> Result<()> {
        let dir = self.set_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("[RESULTS] Deleted result set '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("⚠️ [RESULTS] Result set '{}' was already gone", name);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("deleting {}", dir.display())),
        }
    }

    /// Deletes each set independently; returns the names that could not be deleted.
    pub async fn delete_many(&self, names: &[String]) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.delete(name).await {
                warn!("⚠️ [RESULTS] Could not delete '{}': {:#}", name, e);
                failures.push((name.clone(), format!("{:#}", e)));
            }
        }
        failures
    }
}
