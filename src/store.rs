// used for persistence of dataset documents
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{InsightError, Result};
use crate::record::{DatasetKind, FieldHasher, Record};

/// Datasets either live purely in memory (tests, scratch work) or are backed
/// by one JSON document per dataset under a data directory.
#[derive(Debug, Clone)]
pub enum PersistenceMode {
    InMemory,
    Directory(PathBuf),
}

// ------------- Dataset -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub kind: DatasetKind,
    #[serde(rename = "numRows")]
    pub num_rows: usize,
}

/// One stored dataset: its identity, kind and the full ordered record
/// sequence. Held behind `Arc` so queries work on an immutable snapshot.
#[derive(Debug, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub kind: DatasetKind,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            id: self.id.clone(),
            kind: self.kind,
            num_rows: self.records.len(),
        }
    }
}

// ------------- RecordStore -------------
/// Maps dataset ids to immutable record snapshots and keeps the on-disk
/// documents in sync. Writes replace the whole document atomically
/// (temp file + rename) so a concurrent reader never observes a partially
/// written dataset.
pub struct RecordStore {
    mode: PersistenceMode,
    datasets: Mutex<HashMap<String, Arc<Dataset>, FieldHasher>>,
}

impl RecordStore {
    pub fn new(mode: PersistenceMode) -> Result<Self> {
        let store = Self {
            mode,
            datasets: Mutex::new(HashMap::default()),
        };
        if let PersistenceMode::Directory(directory) = &store.mode {
            fs::create_dir_all(directory)?;
            store.restore()?;
        }
        Ok(store)
    }

    fn guard(&self) -> Result<MutexGuard<HashMap<String, Arc<Dataset>, FieldHasher>>> {
        self.datasets
            .lock()
            .map_err(|e| InsightError::Lock(e.to_string()))
    }

    // Restores every persisted dataset document found in the data directory.
    fn restore(&self) -> Result<()> {
        let PersistenceMode::Directory(directory) = &self.mode else {
            return Ok(());
        };
        let mut datasets = self.guard()?;
        for entry in fs::read_dir(directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            let dataset: Dataset = serde_json::from_str(&raw).map_err(|e| {
                InsightError::Storage(format!("corrupt dataset document {}: {}", path.display(), e))
            })?;
            info!(id = %dataset.id, kind = %dataset.kind, rows = dataset.records.len(), "restored dataset");
            datasets.insert(dataset.id.clone(), Arc::new(dataset));
        }
        Ok(())
    }

    fn document_path(&self, id: &str) -> Option<PathBuf> {
        match &self.mode {
            PersistenceMode::InMemory => None,
            PersistenceMode::Directory(directory) => Some(directory.join(format!("{}.json", id))),
        }
    }

    fn persist(&self, dataset: &Dataset) -> Result<()> {
        let Some(path) = self.document_path(&dataset.id) else {
            return Ok(());
        };
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, serde_json::to_vec(dataset)?)?;
        fs::rename(&temp, &path)?;
        debug!(id = %dataset.id, path = %path.display(), "persisted dataset");
        Ok(())
    }

    fn unlink(&self, id: &str) -> Result<()> {
        if let Some(path) = self.document_path(id) {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.guard()?.contains_key(id))
    }

    pub fn kind_of(&self, id: &str) -> Result<Option<DatasetKind>> {
        Ok(self.guard()?.get(id).map(|dataset| dataset.kind))
    }

    /// An immutable snapshot of the dataset, taken once at the start of a
    /// query and never invalidated by later mutation.
    pub fn snapshot(&self, id: &str) -> Result<Option<Arc<Dataset>>> {
        Ok(self.guard()?.get(id).map(Arc::clone))
    }

    pub fn list(&self) -> Result<Vec<DatasetInfo>> {
        let mut infos: Vec<DatasetInfo> = self.guard()?.values().map(|d| d.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }

    /// Adds a dataset from flat rows (plain field names, one JSON object per
    /// record). Rows missing vocabulary fields or carrying mistyped values
    /// are skipped; a dataset with no surviving rows is rejected. Returns the
    /// ids of all stored datasets.
    pub fn add(&self, id: &str, kind: DatasetKind, rows: &[serde_json::Value]) -> Result<Vec<String>> {
        validate_dataset_id(id)?;
        if self.exists(id)? {
            return Err(InsightError::Validation(format!(
                "dataset id '{}' already in use",
                id
            )));
        }
        let mut records = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in rows {
            match row
                .as_object()
                .and_then(|flat| Record::from_flat_row(id, kind, flat))
            {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }
        if records.is_empty() {
            return Err(InsightError::Validation(format!(
                "dataset '{}' has no valid rows",
                id
            )));
        }
        let dataset = Dataset {
            id: id.to_owned(),
            kind,
            records,
        };
        // Persist before publishing so a query never sees a dataset that
        // would vanish on restart.
        self.persist(&dataset)?;
        let mut datasets = self.guard()?;
        info!(id, kind = %kind, rows = dataset.records.len(), skipped, "added dataset");
        datasets.insert(id.to_owned(), Arc::new(dataset));
        let mut ids: Vec<String> = datasets.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Removes a dataset by id. Unknown ids are a `NotFound` error, distinct
    /// from validation so callers can map them separately.
    pub fn remove(&self, id: &str) -> Result<String> {
        validate_dataset_id(id)?;
        {
            let mut datasets = self.guard()?;
            if datasets.remove(id).is_none() {
                return Err(InsightError::NotFound(format!("no dataset with id '{}'", id)));
            }
        }
        self.unlink(id)?;
        info!(id, "removed dataset");
        Ok(id.to_owned())
    }
}

fn validate_dataset_id(id: &str) -> Result<()> {
    if id.trim().is_empty() || id.contains('_') {
        return Err(InsightError::Validation(format!(
            "'{}' is not a valid dataset id",
            id
        )));
    }
    Ok(())
}
