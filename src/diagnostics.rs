//! Structured per-row diagnostic stream.
//!
//! The engine reports every noteworthy row outcome as a [`Diagnostic`]. Only
//! the [`DiagnosticKind`] classification is stable; messages are for humans.

use std::io::Write;

use log::{info, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    MissingRequired,
    TypeError,
    ValidationError,
    Duplicate,
    InsertError,
    UnmappedClimate,
}

impl DiagnosticKind {
    pub fn is_error(&self) -> bool {
        !matches!(self, DiagnosticKind::Duplicate | DiagnosticKind::UnmappedClimate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// 1-based data row number (the header is not counted).
    pub row: usize,
    pub kind: DiagnosticKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

impl<A: DiagnosticSink, B: DiagnosticSink> DiagnosticSink for (A, B) {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.0.emit(diagnostic.clone());
        self.1.emit(diagnostic);
    }
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&mut self, diagnostic: Diagnostic) {
        let field = diagnostic
            .field
            .as_deref()
            .map(|name| format!(" [{name}]"))
            .unwrap_or_default();
        if diagnostic.kind.is_error() {
            warn!("Row {}{field}: {}", diagnostic.row, diagnostic.message);
        } else {
            info!("Row {}{field}: {}", diagnostic.row, diagnostic.message);
        }
    }
}

/// Writes one JSON object per diagnostic. The first write failure is kept and
/// later diagnostics are dropped.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    failure: Option<std::io::Error>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            failure: None,
        }
    }

    pub fn finish(mut self) -> std::io::Result<W> {
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> DiagnosticSink for JsonLinesSink<W> {
    fn emit(&mut self, diagnostic: Diagnostic) {
        if self.failure.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.writer, &diagnostic)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(err) = result {
            self.failure = Some(err);
        }
    }
}
