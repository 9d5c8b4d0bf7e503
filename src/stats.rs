//! Per-run outcome counters.

use serde::Serialize;

use crate::{error::FieldErrorKind, reconcile::Outcome};

/// Counters for one ingestion run. Every counter only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    rows_read: usize,
    columns: Vec<String>,
    source: Option<String>,
    rows_mapped: usize,
    missing_required: usize,
    type_errors: usize,
    validation_errors: usize,
    created: usize,
    updated: usize,
    duplicates: usize,
    unattached_climate: usize,
    insert_errors: usize,
}

impl RunStatistics {
    pub fn new(columns: &[String]) -> Self {
        Self {
            columns: columns.to_vec(),
            ..Self::default()
        }
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn rows_mapped(&self) -> usize {
        self.rows_mapped
    }

    pub fn missing_required(&self) -> usize {
        self.missing_required
    }

    pub fn type_errors(&self) -> usize {
        self.type_errors
    }

    pub fn validation_errors(&self) -> usize {
        self.validation_errors
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn updated(&self) -> usize {
        self.updated
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn unattached_climate(&self) -> usize {
        self.unattached_climate
    }

    pub fn insert_errors(&self) -> usize {
        self.insert_errors
    }

    pub fn total_errors(&self) -> usize {
        self.missing_required + self.type_errors + self.validation_errors + self.insert_errors
    }

    /// An empty run without errors is still a success.
    pub fn is_success(&self) -> bool {
        self.total_errors() == 0
    }

    pub(crate) fn set_source(&mut self, source: &str) {
        self.source = Some(source.to_string());
    }

    pub(crate) fn record_row_read(&mut self) {
        self.rows_read += 1;
    }

    pub(crate) fn record_row_mapped(&mut self) {
        self.rows_mapped += 1;
    }

    /// Counted once per row, however many of its fields were missing.
    pub(crate) fn record_missing_required(&mut self) {
        self.missing_required += 1;
    }

    pub(crate) fn record_field_error(&mut self, kind: &FieldErrorKind) {
        match kind {
            // Row-level; see `record_missing_required`.
            FieldErrorKind::MissingRequired => {}
            FieldErrorKind::Coercion(_) => self.type_errors += 1,
            FieldErrorKind::Validation { .. } => self.validation_errors += 1,
        }
    }

    pub(crate) fn record_outcome(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Created { .. } => self.created += 1,
            Outcome::Duplicate { .. } => self.duplicates += 1,
            Outcome::Merged { records, .. } => self.updated += records.len(),
            Outcome::Unattached { .. } => self.unattached_climate += 1,
            Outcome::Failed { merged, .. } => {
                self.updated += merged.len();
                self.insert_errors += 1;
            }
        }
    }
}
