//! The public facade for submitting queries and managing datasets.
//!
//! This module wires a shared [`RecordStore`] to the query engine so callers
//! (the HTTP transport, tests, embedding applications) have one place to
//! submit work. Queries are synchronous pure pipelines; threading concerns
//! stay with the caller.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::engine::Engine;
use crate::error::{InsightError, Result};
use crate::record::{DatasetKind, Record};
use crate::store::{DatasetInfo, RecordStore};

pub struct QueryInterface {
    store: Arc<RecordStore>,
}

impl QueryInterface {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Runs one raw query synchronously on the current thread and returns
    /// the final rows. Each call is a pure function of the query and the
    /// dataset snapshot taken when it starts.
    pub fn run_query(&self, raw: &Json) -> Result<Vec<Record>> {
        Engine::new(&self.store).execute(raw)
    }

    /// Adds a dataset from a JSON array of flat rows.
    pub fn add_dataset(&self, id: &str, kind: &str, content: &Json) -> Result<Vec<String>> {
        let kind = DatasetKind::parse(kind)
            .ok_or_else(|| InsightError::Validation(format!("'{}' is not a dataset kind", kind)))?;
        let rows = content
            .as_array()
            .ok_or_else(|| InsightError::Validation("dataset content must be a list of rows".into()))?;
        self.store.add(id, kind, rows)
    }

    pub fn remove_dataset(&self, id: &str) -> Result<String> {
        self.store.remove(id)
    }

    pub fn list_datasets(&self) -> Result<Vec<DatasetInfo>> {
        self.store.list()
    }
}
