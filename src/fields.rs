use anyhow::{Context, Result};
use itertools::Itertools;

use crate::{
    cli::FieldsArgs,
    schema::{FieldSpec, Schema},
    table,
};

pub fn execute(args: &FieldsArgs) -> Result<()> {
    let schema = Schema::load(&args.schema)
        .with_context(|| format!("Loading schema from {:?}", args.schema))?;
    let (headers, rows) = field_rows(&schema);
    table::print_table(&headers, &rows);

    if !schema.declared_sources().is_empty() {
        println!();
        let headers = vec![
            "source".to_string(),
            "kind".to_string(),
            "merge_fields".to_string(),
        ];
        let rows = schema
            .declared_sources()
            .iter()
            .map(|source| {
                vec![
                    source.name.clone(),
                    source.kind.to_string(),
                    source
                        .merge_fields
                        .as_ref()
                        .map(|fields| fields.join(", "))
                        .unwrap_or_else(|| "(all mapped)".to_string()),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
    }
    Ok(())
}

pub(crate) fn field_rows(schema: &Schema) -> (Vec<String>, Vec<Vec<String>>) {
    let headers = ["#", "field", "datatype", "required", "sources", "constraints"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            vec![
                (idx + 1).to_string(),
                field.name.clone(),
                field.datatype.to_string(),
                if field.required { "yes" } else { "no" }.to_string(),
                field
                    .source_mappings
                    .iter()
                    .map(|(source, column)| format!("{source}:{column}"))
                    .join(", "),
                describe_constraints(field),
            ]
        })
        .collect();
    (headers, rows)
}

fn describe_constraints(field: &FieldSpec) -> String {
    let mut parts = Vec::new();
    if let Some(allowed) = &field.allowed_values {
        parts.push(format!("one of [{}]", allowed.iter().join(", ")));
    }
    match (field.min, field.max) {
        (Some(min), Some(max)) => parts.push(format!("{min}..={max}")),
        (Some(min), None) => parts.push(format!(">= {min}")),
        (None, Some(max)) => parts.push(format!("<= {max}")),
        (None, None) => {}
    }
    parts.join("; ")
}
