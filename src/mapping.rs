//! Projection from harmonized fields to the raw columns of one source.

use log::debug;

use crate::{
    error::HarmonizeError,
    schema::{RowKind, Schema},
    store::PARTICIPANT_ID,
};

/// Climate measurements a climate source writes onto matched visits when it
/// declares no `merge_fields`.
pub const CLIMATE_FIELDS: &[&str] = &[
    "temperature",
    "precipitation",
    "humidity",
    "air_quality_index",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    source: String,
    kind: Option<RowKind>,
    entries: Vec<(String, String)>,
    unmapped: Vec<String>,
    merge_fields: Vec<String>,
}

impl FieldMapping {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Row kind declared for the source, if the schema declares one.
    pub fn declared_kind(&self) -> Option<RowKind> {
        self.kind
    }

    /// Declared kind, or for undeclared sources: clinical when the source
    /// supplies `participant_id`, climate otherwise.
    pub fn row_kind(&self) -> RowKind {
        self.kind.unwrap_or_else(|| {
            if self.column_for(PARTICIPANT_ID).is_some() {
                RowKind::Clinical
            } else {
                RowKind::Climate
            }
        })
    }

    /// `(harmonized field, source column)` pairs in schema order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(target, _)| target == field)
            .map(|(_, column)| column.as_str())
    }

    /// Schema fields this source never supplies.
    pub fn unmapped(&self) -> &[String] {
        &self.unmapped
    }

    /// Fields a climate row of this source overwrites on matched records.
    pub fn merge_fields(&self) -> &[String] {
        &self.merge_fields
    }
}

pub fn build_mapping(schema: &Schema, source: &str) -> Result<FieldMapping, HarmonizeError> {
    if !schema.known_sources().contains(&source) {
        return Err(HarmonizeError::UnknownSource(source.to_string()));
    }

    let mut entries = Vec::new();
    let mut unmapped = Vec::new();
    for field in schema.fields() {
        match field.source_column(source) {
            Some(column) => entries.push((field.name.clone(), column.to_string())),
            None => {
                debug!(
                    "No source mapping for '{}' from source '{source}', it will be null",
                    field.name
                );
                unmapped.push(field.name.clone());
            }
        }
    }

    let declared = schema.source(source);
    let merge_fields = match declared.and_then(|spec| spec.merge_fields.clone()) {
        Some(fields) => fields,
        None => entries
            .iter()
            .map(|(target, _)| target)
            .filter(|target| CLIMATE_FIELDS.contains(&target.as_str()))
            .cloned()
            .collect(),
    };

    Ok(FieldMapping {
        source: source.to_string(),
        kind: schema.row_kind(source),
        entries,
        unmapped,
        merge_fields,
    })
}
