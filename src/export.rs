//! Export of stored harmonized records as CSV.

use std::{collections::BTreeSet, io::Write};

use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::ExportArgs,
    io_utils::{self, DEFAULT_CSV_DELIMITER, DEFAULT_TSV_DELIMITER},
    schema::Schema,
    store::{HarmonizedRecord, MemoryStore},
};

const ID_COLUMN: &str = "id";

pub fn execute(args: &ExportArgs) -> Result<()> {
    let store = MemoryStore::load(&args.store)?;
    let schema = match &args.schema {
        Some(path) => Some(
            Schema::load(path).with_context(|| format!("Loading schema from {path:?}"))?,
        ),
        None => None,
    };
    let columns = export_columns(store.records(), schema.as_ref());
    let delimiter = args.delimiter.unwrap_or_else(|| {
        match args
            .output
            .as_deref()
            .and_then(|path| path.extension())
            .and_then(|ext| ext.to_str())
        {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
            _ => DEFAULT_CSV_DELIMITER,
        }
    });

    let mut writer = io_utils::open_csv_writer(args.output.as_deref(), delimiter)?;
    write_records(&mut writer, store.records(), &columns)?;
    writer.flush().context("Flushing export output")?;
    info!(
        "Exported {} record(s) with {} column(s)",
        store.len(),
        columns.len()
    );
    Ok(())
}

/// Schema field order when a schema is given, otherwise the sorted union of
/// every stored field name.
fn export_columns(records: &[HarmonizedRecord], schema: Option<&Schema>) -> Vec<String> {
    match schema {
        Some(schema) => schema
            .field_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        None => records
            .iter()
            .flat_map(|record| record.values.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    }
}

fn write_records<W: Write>(
    writer: &mut csv::Writer<W>,
    records: &[HarmonizedRecord],
    columns: &[String],
) -> Result<()> {
    let mut header = vec![ID_COLUMN.to_string()];
    header.extend(columns.iter().cloned());
    writer.write_record(&header)?;
    for record in records {
        let mut row = vec![record.id.to_string()];
        row.extend(columns.iter().map(|column| {
            record
                .get(column)
                .map(|value| value.as_display())
                .unwrap_or_default()
        }));
        writer.write_record(&row)?;
    }
    Ok(())
}
