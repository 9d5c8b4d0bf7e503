use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::DetectArgs,
    io_utils,
    mapping::{FieldMapping, build_mapping},
    schema::Schema,
    source::infer_source,
    table,
};

pub fn execute(args: &DetectArgs) -> Result<()> {
    let schema = Schema::load(&args.schema)
        .with_context(|| format!("Loading schema from {:?}", args.schema))?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let headers = io_utils::read_headers(&args.input, delimiter, encoding)?;

    let source = infer_source(&headers, &schema)?;
    let mapping = build_mapping(&schema, source)?;
    info!("{:?} detected as source '{source}'", args.input);
    print!("{}", render_detection(&mapping, &headers));
    Ok(())
}

fn render_detection(mapping: &FieldMapping, headers: &[String]) -> String {
    let kind = match mapping.declared_kind() {
        Some(kind) => kind.to_string(),
        None => format!("{} (inferred)", mapping.row_kind()),
    };
    let mut output = table::render_pairs(&[
        ("Source", mapping.source().to_string()),
        ("Row kind", kind),
    ]);
    output.push('\n');

    let table_headers = vec![
        "field".to_string(),
        "column".to_string(),
        "present".to_string(),
    ];
    let rows = mapping
        .entries()
        .iter()
        .map(|(field, column)| {
            let present = headers.iter().any(|header| header == column);
            vec![
                field.clone(),
                column.clone(),
                if present { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect::<Vec<_>>();
    output.push_str(&table::render_table(&table_headers, &rows));

    if !mapping.unmapped().is_empty() {
        output.push_str(&format!(
            "\nUnmapped (always null): {}\n",
            mapping.unmapped().join(", ")
        ));
    }
    output
}
