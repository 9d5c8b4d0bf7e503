//! Record reconciliation: what a transformed row does to the store.
//!
//! A row is first classified into a [`ClassifiedRow`]; each variant then has
//! its own strategy:
//!
//! - **Clinical** rows are identified by `{participant_id, visit_date,
//!   location_id}`. An existing match is a duplicate and is left untouched;
//!   otherwise a new record is created with every harmonized value.
//! - **Climate** rows are ambient context for `{location_id, visit_date}`. They
//!   overwrite the merge fields of every clinical record at that site and date
//!   and never create records of their own.
//!
//! Climate rows only attach to visits that already exist, so clinical files
//! must be ingested before the climate files covering the same sites and
//! dates. Nothing here reorders input.

use crate::{
    data::{HarmonizedValues, Value},
    error::{MissingKeyError, StoreError},
    schema::RowKind,
    store::{
        ClinicalKey, LOCATION_ID, PARTICIPANT_ID, RecordId, RecordStore, SiteDateKey, VISIT_DATE,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedRow {
    Clinical {
        key: ClinicalKey,
        values: HarmonizedValues,
    },
    Climate {
        key: SiteDateKey,
        values: HarmonizedValues,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created { id: RecordId, key: ClinicalKey },
    Duplicate { existing: RecordId, key: ClinicalKey },
    Merged { key: SiteDateKey, records: Vec<RecordId> },
    /// Climate row with no clinical visit to attach to.
    Unattached { key: SiteDateKey },
    /// The store failed; `merged` lists records already updated for the row.
    Failed { error: StoreError, merged: Vec<RecordId> },
}

fn missing_key(kind: RowKind, keys: &[(&'static str, &Option<Value>)]) -> MissingKeyError {
    MissingKeyError {
        kind,
        fields: keys
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(field, _)| *field)
            .collect(),
    }
}

/// Splits a transformed row by kind and extracts its natural key.
pub fn classify(values: HarmonizedValues, kind: RowKind) -> Result<ClassifiedRow, MissingKeyError> {
    let lookup = |field: &str| values.get(field).cloned().flatten();
    match kind {
        RowKind::Clinical => match (
            lookup(PARTICIPANT_ID),
            lookup(VISIT_DATE),
            lookup(LOCATION_ID),
        ) {
            (Some(participant_id), Some(visit_date), Some(location_id)) => {
                Ok(ClassifiedRow::Clinical {
                    key: ClinicalKey {
                        participant_id,
                        visit_date,
                        location_id,
                    },
                    values,
                })
            }
            (participant_id, visit_date, location_id) => Err(missing_key(
                kind,
                &[
                    (PARTICIPANT_ID, &participant_id),
                    (VISIT_DATE, &visit_date),
                    (LOCATION_ID, &location_id),
                ],
            )),
        },
        RowKind::Climate => match (lookup(VISIT_DATE), lookup(LOCATION_ID)) {
            (Some(visit_date), Some(location_id)) => Ok(ClassifiedRow::Climate {
                key: SiteDateKey {
                    location_id,
                    visit_date,
                },
                values,
            }),
            (visit_date, location_id) => Err(missing_key(
                kind,
                &[(VISIT_DATE, &visit_date), (LOCATION_ID, &location_id)],
            )),
        },
    }
}

/// Applies one classified row to the store.
///
/// Takes the store by exclusive borrow: the duplicate check and the create (or
/// the lookup and the updates) run without another writer in between.
pub fn reconcile<S>(store: &mut S, row: ClassifiedRow, merge_fields: &[String]) -> Outcome
where
    S: RecordStore + ?Sized,
{
    match row {
        ClassifiedRow::Clinical { key, values } => reconcile_clinical(store, key, values),
        ClassifiedRow::Climate { key, values } => {
            reconcile_climate(store, key, &values, merge_fields)
        }
    }
}

fn reconcile_clinical<S>(store: &mut S, key: ClinicalKey, values: HarmonizedValues) -> Outcome
where
    S: RecordStore + ?Sized,
{
    match store.find_one(&key) {
        Ok(Some(existing)) => Outcome::Duplicate {
            existing: existing.id,
            key,
        },
        Ok(None) => match store.create(values) {
            Ok(record) => Outcome::Created { id: record.id, key },
            Err(error) => Outcome::Failed {
                error,
                merged: Vec::new(),
            },
        },
        Err(error) => Outcome::Failed {
            error,
            merged: Vec::new(),
        },
    }
}

fn reconcile_climate<S>(
    store: &mut S,
    key: SiteDateKey,
    values: &HarmonizedValues,
    merge_fields: &[String],
) -> Outcome
where
    S: RecordStore + ?Sized,
{
    let matches = match store.find_all(&key) {
        Ok(matches) => matches,
        Err(error) => {
            return Outcome::Failed {
                error,
                merged: Vec::new(),
            };
        }
    };
    if matches.is_empty() {
        return Outcome::Unattached { key };
    }

    // Empty climate cells leave the stored value alone.
    let changes: HarmonizedValues = merge_fields
        .iter()
        .filter_map(|field| {
            let value = values.get(field).cloned().flatten()?;
            Some((field.clone(), Some(value)))
        })
        .collect();

    let mut merged = Vec::with_capacity(matches.len());
    for record in matches {
        match store.update(&record, changes.clone()) {
            Ok(updated) => merged.push(updated.id),
            Err(error) => return Outcome::Failed { error, merged },
        }
    }
    Outcome::Merged {
        key,
        records: merged,
    }
}
