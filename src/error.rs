//! Error taxonomy for the harmonization engine.
//!
//! Only [`HarmonizeError`] aborts a run. Everything else is scoped to a single
//! row or field and is surfaced through [`crate::stats::RunStatistics`] and the
//! diagnostic stream instead of being propagated.

use std::path::PathBuf;

use thiserror::Error;

use crate::{
    data::Value,
    schema::{DataType, RowKind},
    store::{ClinicalKey, RecordId},
};

/// Fatal conditions. No row is processed once one of these is raised.
#[derive(Debug, Error)]
pub enum HarmonizeError {
    #[error("Reading schema file {path:?}")]
    SchemaIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parsing schema YAML")]
    SchemaYaml(#[from] serde_yaml::Error),
    #[error("Invalid schema: {0}")]
    SchemaLoad(String),
    #[error(
        "Could not infer source dataset: none of the columns [{}] is mapped by the schema",
        columns.join(", ")
    )]
    SourceInference { columns: Vec<String> },
    #[error("Source '{0}' is not declared in the schema")]
    UnknownSource(String),
}

impl HarmonizeError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        HarmonizeError::SchemaLoad(message.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Failed to convert '{raw}' to {datatype}")]
pub struct CoercionError {
    pub raw: String,
    pub datatype: DataType,
}

/// Field-scoped outcome recorded by the row transformer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FieldErrorKind {
    #[error("required field has no value")]
    MissingRequired,
    #[error(transparent)]
    Coercion(#[from] CoercionError),
    #[error("value '{value}' rejected: {reason}")]
    Validation { value: Value, reason: String },
}

/// A row lacks one of the natural-key fields its kind requires. The row is
/// skipped before any store access.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind} row is missing required key field(s): {}", fields.join(", "))]
pub struct MissingKeyError {
    pub kind: RowKind,
    pub fields: Vec<&'static str>,
}

/// Persistence failures. Caught per row and counted as insertion errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Unique constraint violated: record {existing} already holds {key}")]
    UniqueViolation { key: ClinicalKey, existing: RecordId },
    #[error("Column '{0}' cannot be null")]
    NotNull(String),
    #[error("Record {0} does not exist")]
    MissingRecord(RecordId),
    #[error("Store backend failure: {0}")]
    Backend(String),
}
