//! Source dataset inference from CSV headers.

use log::debug;

use crate::{error::HarmonizeError, schema::Schema};

/// Returns the first source whose mapped raw column appears in `columns`.
///
/// Fields are visited in schema order and each field's mappings in document
/// order, so the answer is stable for a given schema.
pub fn infer_source<'a>(
    columns: &[String],
    schema: &'a Schema,
) -> Result<&'a str, HarmonizeError> {
    for field in schema.fields() {
        for (source, column) in &field.source_mappings {
            if columns.iter().any(|header| header == column) {
                debug!(
                    "Column '{column}' (field '{}') identifies source '{source}'",
                    field.name
                );
                return Ok(source);
            }
        }
    }
    Err(HarmonizeError::SourceInference {
        columns: columns.to_vec(),
    })
}
