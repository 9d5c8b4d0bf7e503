//! CSV input and output plumbing.
//!
//! Input files are decoded with `encoding_rs` (UTF-8 unless told otherwise),
//! the delimiter is taken from the extension when not given (`.tsv` means
//! tab, anything else comma) and `-` stands for stdin/stdout. [`read_rows`]
//! loads a whole file into memory with the clean-up the engine expects:
//! trimmed header names with all-empty rows and all-empty columns removed.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::warn;

use crate::data::RawRow;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(path: &Path, delimiter: u8) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    };
    Ok(open_csv_reader(reader, delimiter))
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Header names, trimmed.
pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    Ok(decode_record(&headers, encoding)?
        .into_iter()
        .map(|name| name.trim().to_string())
        .collect())
}

/// A fully loaded input table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvRows {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    /// File line numbers of rows that had more cells than the header.
    pub overlong_lines: Vec<usize>,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Reads a delimited file, dropping rows whose cells are all empty and then
/// columns that are empty in every remaining row.
pub fn read_rows(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<CsvRows> {
    let mut reader = open_csv_reader_from_path(path, delimiter)?;
    let headers = reader_headers(&mut reader, encoding)
        .with_context(|| format!("Reading headers from {path:?}"))?;

    let mut records = Vec::new();
    let mut overlong_lines = Vec::new();
    let mut record = csv::ByteRecord::new();
    let mut line = 1usize;
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading row {} of {path:?}", line + 1))?
    {
        line += 1;
        let mut cells = decode_record(&record, encoding)
            .with_context(|| format!("Decoding row {line} of {path:?}"))?;
        if cells.iter().all(|cell| is_blank(cell)) {
            continue;
        }
        if cells.len() > headers.len() {
            warn!(
                "Row {line} of {path:?} has {} cells but the header has {}; extra cells ignored",
                cells.len(),
                headers.len()
            );
            overlong_lines.push(line);
        }
        cells.resize(headers.len(), String::new());
        records.push(cells);
    }

    let keep = (0..headers.len())
        .map(|idx| records.is_empty() || records.iter().any(|cells| !is_blank(&cells[idx])))
        .collect::<Vec<_>>();
    let kept_headers = headers
        .iter()
        .zip(&keep)
        .filter(|(_, keep)| **keep)
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>();

    let rows = records
        .into_iter()
        .map(|cells| {
            headers
                .iter()
                .zip(cells)
                .zip(&keep)
                .filter(|(_, keep)| **keep)
                .map(|((name, cell), _)| (name.clone(), cell))
                .collect::<RawRow>()
        })
        .collect();

    Ok(CsvRows {
        headers: kept_headers,
        rows,
        overlong_lines,
    })
}

/// Reads only the header row of a delimited file.
pub fn read_headers(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Vec<String>> {
    let mut reader = open_csv_reader_from_path(path, delimiter)?;
    reader_headers(&mut reader, encoding).with_context(|| format!("Reading headers from {path:?}"))
}
