//! The ingestion pipeline.
//!
//! [`ingest`] is the engine entry point: infer the source from the header,
//! build its field mapping once, then transform, classify and reconcile each
//! row in order while [`RunStatistics`] and the diagnostic stream record what
//! happened. Only schema and source inference failures abort; everything else
//! is recovered at row scope.
//!
//! [`execute`] wraps it for the `ingest` command: file loading, the persisted
//! store and the printed summary.

use std::{
    fs::File,
    io::{BufWriter, Write},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{debug, info};

use crate::{
    cli::IngestArgs,
    data::RawRow,
    diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, JsonLinesSink, LogSink},
    error::{FieldErrorKind, HarmonizeError},
    io_utils,
    mapping::build_mapping,
    reconcile::{Outcome, classify, reconcile},
    report,
    schema::Schema,
    source::infer_source,
    stats::RunStatistics,
    store::{MemoryStore, RecordStore},
    transform::{FieldError, transform_row},
};

pub fn ingest<I, S, D>(
    rows: I,
    header: &[String],
    schema: &Schema,
    store: &mut S,
    sink: &mut D,
) -> Result<RunStatistics, HarmonizeError>
where
    I: IntoIterator<Item = RawRow>,
    S: RecordStore + ?Sized,
    D: DiagnosticSink + ?Sized,
{
    let mut stats = RunStatistics::new(header);
    let source = infer_source(header, schema)?;
    let mapping = build_mapping(schema, source)?;
    stats.set_source(source);
    info!(
        "Detected source '{source}' ({} rows); mapping {} of {} field(s)",
        mapping.row_kind(),
        mapping.entries().len(),
        schema.fields().len()
    );

    for (idx, raw) in rows.into_iter().enumerate() {
        let row = idx + 1;
        stats.record_row_read();

        let transformed = transform_row(&raw, &mapping, schema);
        for error in &transformed.errors {
            stats.record_field_error(&error.kind);
            sink.emit(field_diagnostic(row, error));
        }
        let missing_counted = transformed.has_missing_required();
        if missing_counted {
            stats.record_missing_required();
        }

        let classified = match classify(transformed.values, mapping.row_kind()) {
            Ok(classified) => classified,
            Err(err) => {
                if !missing_counted {
                    stats.record_missing_required();
                }
                sink.emit(Diagnostic {
                    row,
                    kind: DiagnosticKind::MissingRequired,
                    field: None,
                    message: format!("{err}; row skipped"),
                });
                continue;
            }
        };
        stats.record_row_mapped();

        let outcome = reconcile(store, classified, mapping.merge_fields());
        stats.record_outcome(&outcome);
        if let Some(diagnostic) = outcome_diagnostic(row, &outcome) {
            sink.emit(diagnostic);
        }
    }

    Ok(stats)
}

fn field_diagnostic(row: usize, error: &FieldError) -> Diagnostic {
    let kind = match error.kind {
        FieldErrorKind::MissingRequired => DiagnosticKind::MissingRequired,
        FieldErrorKind::Coercion(_) => DiagnosticKind::TypeError,
        FieldErrorKind::Validation { .. } => DiagnosticKind::ValidationError,
    };
    Diagnostic {
        row,
        kind,
        field: Some(error.field.clone()),
        message: format!("{} (column '{}')", error.kind, error.column),
    }
}

fn outcome_diagnostic(row: usize, outcome: &Outcome) -> Option<Diagnostic> {
    let (kind, message) = match outcome {
        Outcome::Created { id, key } => {
            debug!("Row {row}: created record {id} for {key}");
            return None;
        }
        Outcome::Merged { key, records } => {
            debug!(
                "Row {row}: climate for {key} merged into record(s) {}",
                records.iter().join(", ")
            );
            return None;
        }
        Outcome::Duplicate { existing, key } => (
            DiagnosticKind::Duplicate,
            format!("Duplicate of record {existing} ({key}); skipped"),
        ),
        Outcome::Unattached { key } => (
            DiagnosticKind::UnmappedClimate,
            format!(
                "No clinical visit for {key}; ingest clinical data for this site and date first"
            ),
        ),
        Outcome::Failed { error, merged } if merged.is_empty() => {
            (DiagnosticKind::InsertError, format!("{error}"))
        }
        Outcome::Failed { error, merged } => (
            DiagnosticKind::InsertError,
            format!(
                "{error} (after updating record(s) {})",
                merged.iter().join(", ")
            ),
        ),
    };
    Some(Diagnostic {
        row,
        kind,
        field: None,
        message,
    })
}

pub fn execute(args: &IngestArgs) -> Result<()> {
    let schema = Schema::load(&args.schema)
        .with_context(|| format!("Loading schema from {:?}", args.schema))?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let table = io_utils::read_rows(&args.input, delimiter, encoding)?;
    info!(
        "Read {} row(s) with {} column(s) from {:?}: {}",
        table.rows.len(),
        table.headers.len(),
        args.input,
        table.headers.iter().join(", ")
    );

    let mut store = MemoryStore::load(&args.store)?;
    debug!("Store {:?} holds {} record(s)", args.store, store.len());

    let stats = match &args.diagnostics {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Creating diagnostics file {path:?}"))?;
            let mut sink = (LogSink, JsonLinesSink::new(BufWriter::new(file)));
            let stats = ingest(table.rows, &table.headers, &schema, &mut store, &mut sink)?;
            sink.1
                .finish()
                .with_context(|| format!("Writing diagnostics to {path:?}"))?;
            stats
        }
        None => ingest(
            table.rows,
            &table.headers,
            &schema,
            &mut store,
            &mut LogSink,
        )?,
    };

    print!("{}", report::render_summary(&stats));

    if let Some(path) = &args.summary_json {
        let file =
            File::create(path).with_context(|| format!("Creating summary file {path:?}"))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &stats)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.flush())
            .with_context(|| format!("Writing summary to {path:?}"))?;
    }

    if args.dry_run {
        info!("Dry run: store {:?} left unchanged", args.store);
    } else {
        store.save(&args.store)?;
        info!("Saved {} record(s) to {:?}", store.len(), args.store);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Value, error::StoreError, store::HarmonizedRecord};

    const SCHEMA: &str = r#"
sources:
  trial_a: { kind: clinical }
  station: { kind: climate }
fields:
  participant_id:
    datatype: string
    required: true
    source_mappings: { trial_a: patient_id }
  visit_date:
    datatype: date
    required: true
    source_mappings: { trial_a: visit_date, station: date }
  location_id:
    datatype: string
    required: true
    source_mappings: { trial_a: site, station: site_id }
  age:
    datatype: integer
    source_mappings: { trial_a: age }
  sex:
    datatype: string
    allowed_values: [Male, Female]
    source_mappings: { trial_a: sex }
    transformations:
      trial_a: { M: Male, F: Female }
  temperature:
    datatype: float
    source_mappings: { station: daily_temp_c }
"#;

    fn schema() -> Schema {
        Schema::from_yaml_str(SCHEMA).expect("schema")
    }

    fn table(header: &[&str], rows: &[&[&str]]) -> (Vec<String>, Vec<RawRow>) {
        let header = header.iter().map(|h| h.to_string()).collect::<Vec<_>>();
        let rows = rows
            .iter()
            .map(|cells| {
                header
                    .iter()
                    .cloned()
                    .zip(cells.iter().map(|c| c.to_string()))
                    .collect()
            })
            .collect();
        (header, rows)
    }

    fn clinical_table() -> (Vec<String>, Vec<RawRow>) {
        table(
            &["patient_id", "visit_date", "site", "age", "sex"],
            &[
                &["P1", "2024-01-01", "S1", "52", "F"],
                &["P2", "2024-01-01", "S1", "47.9", "M"],
                &["P3", "2024-01-02", "S2", "61", "F"],
            ],
        )
    }

    fn climate_table() -> (Vec<String>, Vec<RawRow>) {
        table(
            &["date", "site_id", "daily_temp_c"],
            &[&["2024-01-01", "S1", "21.5"], &["2024-01-05", "S9", "19.0"]],
        )
    }

    fn run(
        (header, rows): (Vec<String>, Vec<RawRow>),
        store: &mut MemoryStore,
    ) -> (RunStatistics, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let stats =
            ingest(rows, &header, &schema(), store, &mut diagnostics).expect("ingest succeeds");
        (stats, diagnostics)
    }

    #[test]
    fn clean_clinical_file_creates_every_record() {
        let mut store = MemoryStore::new();
        let (stats, diagnostics) = run(clinical_table(), &mut store);
        assert_eq!(stats.rows_read(), 3);
        assert_eq!(stats.rows_mapped(), 3);
        assert_eq!(stats.created(), 3);
        assert!(stats.is_success());
        assert!(diagnostics.is_empty());
        assert_eq!(stats.source(), Some("trial_a"));
        assert_eq!(store.records()[1].get("age"), Some(&Value::Integer(47)));
        assert_eq!(store.records()[0].get("sex"), Some(&Value::from("Female")));
    }

    #[test]
    fn second_ingestion_only_counts_duplicates() {
        let mut store = MemoryStore::new();
        run(clinical_table(), &mut store);
        let (stats, diagnostics) = run(clinical_table(), &mut store);
        assert_eq!(store.len(), 3);
        assert_eq!(stats.created(), 0);
        assert_eq!(stats.duplicates(), 3);
        assert!(stats.is_success());
        assert!(
            diagnostics
                .iter()
                .all(|d| d.kind == DiagnosticKind::Duplicate)
        );
    }

    #[test]
    fn climate_after_clinical_merges_into_matching_visits() {
        let mut store = MemoryStore::new();
        run(clinical_table(), &mut store);
        let (stats, diagnostics) = run(climate_table(), &mut store);
        assert_eq!(stats.updated(), 2);
        assert_eq!(stats.created(), 0);
        assert_eq!(stats.unattached_climate(), 1);
        assert!(stats.is_success());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnmappedClimate);
        assert_eq!(diagnostics[0].row, 2);
        assert_eq!(
            store.records()[0].get("temperature"),
            Some(&Value::Float(21.5))
        );
        assert_eq!(store.records()[2].get("temperature"), None);
    }

    #[test]
    fn climate_before_clinical_never_attaches() {
        let mut store = MemoryStore::new();
        let (stats, _) = run(climate_table(), &mut store);
        assert_eq!(stats.updated(), 0);
        assert_eq!(stats.unattached_climate(), 2);
        run(clinical_table(), &mut store);
        assert!(store.records().iter().all(|r| r.get("temperature").is_none()));
    }

    #[test]
    fn field_errors_are_counted_and_rows_still_stored() {
        let mut store = MemoryStore::new();
        let (stats, diagnostics) = run(
            table(
                &["patient_id", "visit_date", "site", "age", "sex"],
                &[&["P1", "2024-01-01", "S1", "abc", "X"]],
            ),
            &mut store,
        );
        assert_eq!(stats.type_errors(), 1);
        assert_eq!(stats.validation_errors(), 1);
        assert_eq!(stats.created(), 1);
        assert_eq!(stats.total_errors(), 2);
        let kinds = diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![DiagnosticKind::TypeError, DiagnosticKind::ValidationError]
        );
        assert_eq!(store.records()[0].get("age"), None);
    }

    #[test]
    fn clinical_row_without_participant_never_reaches_store() {
        let mut store = MemoryStore::new();
        let (stats, diagnostics) = run(
            table(
                &["patient_id", "visit_date", "site", "age", "sex"],
                &[&["", "2024-01-01", "S1", "40", "M"]],
            ),
            &mut store,
        );
        assert!(store.is_empty());
        assert_eq!(stats.missing_required(), 1);
        assert_eq!(stats.rows_mapped(), 0);
        assert_eq!(diagnostics.len(), 2);
        assert!(
            diagnostics
                .iter()
                .all(|d| d.kind == DiagnosticKind::MissingRequired)
        );
    }

    #[test]
    fn unknown_header_is_fatal() {
        let mut store = MemoryStore::new();
        let (header, rows) = table(&["foo", "bar"], &[&["1", "2"]]);
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let err = ingest(rows, &header, &schema(), &mut store, &mut diagnostics).unwrap_err();
        assert!(matches!(err, HarmonizeError::SourceInference { .. }));
    }

    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn find_one(
            &self,
            _: &crate::store::ClinicalKey,
        ) -> Result<Option<HarmonizedRecord>, StoreError> {
            Err(StoreError::Backend("database is locked".into()))
        }

        fn find_all(
            &self,
            _: &crate::store::SiteDateKey,
        ) -> Result<Vec<HarmonizedRecord>, StoreError> {
            Ok(Vec::new())
        }

        fn create(
            &mut self,
            _: crate::data::HarmonizedValues,
        ) -> Result<HarmonizedRecord, StoreError> {
            unreachable!("lookup fails first")
        }

        fn update(
            &mut self,
            _: &HarmonizedRecord,
            _: crate::data::HarmonizedValues,
        ) -> Result<HarmonizedRecord, StoreError> {
            unreachable!("nothing to update")
        }
    }

    struct FirstUpdateOnly(MemoryStore, usize);

    impl RecordStore for FirstUpdateOnly {
        fn find_one(
            &self,
            key: &crate::store::ClinicalKey,
        ) -> Result<Option<HarmonizedRecord>, StoreError> {
            self.0.find_one(key)
        }

        fn find_all(
            &self,
            key: &crate::store::SiteDateKey,
        ) -> Result<Vec<HarmonizedRecord>, StoreError> {
            self.0.find_all(key)
        }

        fn create(
            &mut self,
            values: crate::data::HarmonizedValues,
        ) -> Result<HarmonizedRecord, StoreError> {
            self.0.create(values)
        }

        fn update(
            &mut self,
            record: &HarmonizedRecord,
            changes: crate::data::HarmonizedValues,
        ) -> Result<HarmonizedRecord, StoreError> {
            self.1 += 1;
            if self.1 > 1 {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.0.update(record, changes)
        }
    }

    #[test]
    fn partial_climate_merge_counts_update_and_insert_error() {
        let mut inner = MemoryStore::new();
        run(clinical_table(), &mut inner);
        let mut store = FirstUpdateOnly(inner, 0);

        let (header, rows) = climate_table();
        let mut diagnostics = Vec::new();
        let stats = ingest(rows, &header, &schema(), &mut store, &mut diagnostics)
            .expect("run completes");
        assert_eq!(stats.updated(), 1);
        assert_eq!(stats.insert_errors(), 1);
        assert_eq!(stats.unattached_climate(), 1);
        assert!(!stats.is_success());

        let failure = diagnostics
            .iter()
            .find(|d| d.kind == DiagnosticKind::InsertError)
            .expect("insert error reported");
        assert_eq!(failure.row, 1);
        assert!(failure.message.contains("after updating record(s) 1"));
    }

    #[test]
    fn store_failures_are_insert_errors_and_run_continues() {
        let (header, rows) = clinical_table();
        let mut diagnostics = Vec::new();
        let stats = ingest(rows, &header, &schema(), &mut BrokenStore, &mut diagnostics)
            .expect("run completes");
        assert_eq!(stats.rows_read(), 3);
        assert_eq!(stats.insert_errors(), 3);
        assert_eq!(stats.total_errors(), 3);
        assert!(
            diagnostics
                .iter()
                .all(|d| d.kind == DiagnosticKind::InsertError)
        );
    }
}
