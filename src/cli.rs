use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_STORE_PATH: &str = "harmonized.store";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Harmonize clinical and climate CSV exports into one record store",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest a CSV file into the harmonized record store
    Ingest(IngestArgs),
    /// List the harmonized fields defined by a schema
    Fields(FieldsArgs),
    /// Show which source a CSV file is detected as and how its columns map
    Detect(DetectArgs),
    /// Write the stored harmonized records as CSV
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Input CSV file (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML schema describing the harmonized fields
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
    /// Record store file, created when missing
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    pub store: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Write per-row diagnostics to this file as JSON lines
    #[arg(long)]
    pub diagnostics: Option<PathBuf>,
    /// Write the run statistics to this file as JSON
    #[arg(long = "summary-json")]
    pub summary_json: Option<PathBuf>,
    /// Process and report without saving the store
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct FieldsArgs {
    /// YAML schema describing the harmonized fields
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Input CSV file (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML schema describing the harmonized fields
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Record store file
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    pub store: PathBuf,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Schema used to order the exported columns
    #[arg(short = 's', long = "schema")]
    pub schema: Option<PathBuf>,
    /// Output delimiter (defaults to ',' or tab for .tsv outputs)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_names_and_characters_are_accepted() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("semicolon"), Ok(b';'));
        assert_eq!(parse_delimiter(":"), Ok(b':'));
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn ingest_defaults_the_store_path() {
        let cli = Cli::parse_from(["csv-harmonizer", "ingest", "-i", "a.csv", "-s", "s.yml"]);
        match cli.command {
            Commands::Ingest(args) => {
                assert_eq!(args.store, PathBuf::from(DEFAULT_STORE_PATH));
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
