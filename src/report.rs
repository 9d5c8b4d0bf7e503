//! End-of-run summary rendering.

use std::fmt::Write as _;

use itertools::Itertools;

use crate::{stats::RunStatistics, table::render_pairs};

const TITLE: &str = "=== Ingestion Summary ===";

pub fn render_summary(stats: &RunStatistics) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{TITLE}");

    section(
        &mut output,
        "Input Data",
        &[
            ("Source dataset", stats.source().unwrap_or("-").to_string()),
            ("Total rows", stats.rows_read().to_string()),
            ("Columns found", stats.columns().iter().join(", ")),
        ],
    );
    section(
        &mut output,
        "Data Transformation",
        &[
            ("Rows mapped", stats.rows_mapped().to_string()),
            (
                "Rows missing required fields",
                stats.missing_required().to_string(),
            ),
            ("Type conversion errors", stats.type_errors().to_string()),
            ("Validation errors", stats.validation_errors().to_string()),
        ],
    );
    section(
        &mut output,
        "Database Insertion",
        &[
            ("Records created", stats.created().to_string()),
            ("Records updated", stats.updated().to_string()),
            ("Duplicates skipped", stats.duplicates().to_string()),
            (
                "Unattached climate rows",
                stats.unattached_climate().to_string(),
            ),
            ("Insert errors", stats.insert_errors().to_string()),
        ],
    );

    let _ = writeln!(output, "\nFinal Status:");
    if stats.is_success() {
        let _ = writeln!(output, "  ✓ Ingestion completed successfully");
    } else {
        let _ = writeln!(
            output,
            "  ✗ Ingestion completed with {} errors",
            stats.total_errors()
        );
    }
    let _ = writeln!(output, "{}", "=".repeat(TITLE.len()));
    output
}

fn section(output: &mut String, title: &str, pairs: &[(&str, String)]) {
    let _ = writeln!(output, "\n{title}:");
    output.push_str(&render_pairs(pairs));
}
