//! Row transformation: raw CSV cells to harmonized typed values.
//!
//! [`transform_row`] is a pure function of its inputs. Every failure it finds
//! is field-scoped: the offending field resolves to `null`, a [`FieldError`] is
//! recorded, and the remaining fields are still processed.

use crate::{
    data::{HarmonizedValues, RawRow, coerce_value},
    error::FieldErrorKind,
    mapping::FieldMapping,
    schema::Schema,
};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub column: String,
    pub kind: FieldErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    /// Every schema field; fields the source does not map are `None`.
    pub values: HarmonizedValues,
    pub errors: Vec<FieldError>,
}

impl TransformedRow {
    pub fn has_missing_required(&self) -> bool {
        self.errors
            .iter()
            .any(|error| error.kind == FieldErrorKind::MissingRequired)
    }
}

pub fn transform_row(raw: &RawRow, mapping: &FieldMapping, schema: &Schema) -> TransformedRow {
    let mut values: HarmonizedValues = schema
        .fields()
        .iter()
        .map(|field| (field.name.clone(), None))
        .collect();
    let mut errors = Vec::new();

    for (target, column) in mapping.entries() {
        let Some(field) = schema.field(target) else {
            continue;
        };
        let mut fail = |kind: FieldErrorKind| {
            errors.push(FieldError {
                field: target.clone(),
                column: column.clone(),
                kind,
            })
        };

        let cell = raw.get(column).map(String::as_str).unwrap_or_default();
        // Substitution may also blank a value (e.g. "NA" -> "").
        let value = field.substitute(mapping.source(), cell).unwrap_or(cell);
        if cell.trim().is_empty() || value.trim().is_empty() {
            if field.required {
                fail(FieldErrorKind::MissingRequired);
            }
            continue;
        }

        let coerced = match coerce_value(value, field.datatype) {
            Ok(coerced) => coerced,
            Err(err) => {
                fail(FieldErrorKind::Coercion(err));
                continue;
            }
        };
        if let Err(reason) = field.check_constraints(&coerced) {
            fail(FieldErrorKind::Validation {
                value: coerced,
                reason,
            });
            continue;
        }
        values.insert(target.clone(), Some(coerced));
    }

    TransformedRow { values, errors }
}
