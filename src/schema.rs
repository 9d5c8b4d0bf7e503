//! Harmonized schema model and YAML loading.
//!
//! This module owns [`Schema`] (the ordered set of harmonized field
//! definitions), [`FieldSpec`] per-field contracts (datatype, per-source column
//! mappings, value substitution tables, allowed values, numeric bounds) and
//! [`SourceSpec`] declarations that tie each source dataset to a [`RowKind`].
//!
//! ## Document shape
//!
//! ```yaml
//! sources:                 # optional
//!   trial_a: { kind: clinical }
//!   station_x: { kind: climate, merge_fields: [temperature] }
//! fields:
//!   participant_id:
//!     datatype: string
//!     required: true
//!     source_mappings: { trial_a: patient_id }
//! ```
//!
//! A document without the `fields` wrapper is read as the field map itself.
//! Every document is validated once, here, so the rest of the engine only sees
//! well-formed definitions.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    fs,
    path::Path,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};

use crate::{
    data::{Value, coerce_value},
    error::HarmonizeError,
    store::KEY_FIELDS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    String,
    Date,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::String => "string",
            DataType::Date => "date",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["integer", "float", "string", "date"]
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(DataType::Integer),
            "float" | "double" => Ok(DataType::Float),
            "string" => Ok(DataType::String),
            "date" => Ok(DataType::Date),
            _ => Err(format!(
                "Unknown datatype '{value}'. Supported types: {}",
                DataType::variants().join(", ")
            )),
        }
    }
}

/// How rows of a source dataset are reconciled against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Clinical,
    Climate,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Clinical => "clinical",
            RowKind::Climate => "climate",
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub name: String,
    pub kind: RowKind,
    /// Fields a climate row overwrites on matched records. `None` means the
    /// climate measurements the source maps.
    pub merge_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub datatype: DataType,
    pub required: bool,
    pub description: Option<String>,
    /// `(source, raw column)` pairs in document order.
    pub source_mappings: Vec<(String, String)>,
    pub transformations: BTreeMap<String, BTreeMap<String, String>>,
    pub allowed_values: Option<Vec<Value>>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldSpec {
    pub fn source_column(&self, source: &str) -> Option<&str> {
        self.source_mappings
            .iter()
            .find(|(name, _)| name == source)
            .map(|(_, column)| column.as_str())
    }

    /// Exact-match substitution for a raw value coming from `source`.
    pub fn substitute(&self, source: &str, raw: &str) -> Option<&str> {
        self.transformations
            .get(source)
            .and_then(|table| table.get(raw))
            .map(String::as_str)
    }

    /// Checks a coerced value against `allowed_values` and numeric bounds.
    pub fn check_constraints(&self, value: &Value) -> Result<(), String> {
        if let Some(allowed) = &self.allowed_values
            && !allowed.contains(value)
        {
            let rendered = allowed.iter().map(Value::as_display).collect::<Vec<_>>();
            return Err(format!("not one of [{}]", rendered.join(", ")));
        }
        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min
                && number < min
            {
                return Err(format!("below minimum {min}"));
            }
            if let Some(max) = self.max
                && number > max
            {
                return Err(format!("above maximum {max}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    sources: Vec<SourceSpec>,
}

#[derive(Debug, Deserialize)]
struct RawFieldSpec {
    datatype: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source_mappings: Mapping,
    #[serde(default)]
    transformations: Mapping,
    #[serde(default)]
    allowed_values: Option<Vec<YamlValue>>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSourceSpec {
    kind: RowKind,
    #[serde(default)]
    merge_fields: Option<Vec<String>>,
}

impl Schema {
    pub fn load(path: &Path) -> Result<Self, HarmonizeError> {
        let raw = fs::read_to_string(path).map_err(|source| HarmonizeError::SchemaIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, HarmonizeError> {
        let document: YamlValue = serde_yaml::from_str(input)?;
        Self::from_yaml_value(document)
    }

    pub fn from_yaml_value(document: YamlValue) -> Result<Self, HarmonizeError> {
        let root = match document {
            YamlValue::Mapping(map) => map,
            YamlValue::Null => return Err(HarmonizeError::schema("Schema document is empty")),
            _ => {
                return Err(HarmonizeError::schema(
                    "Schema document must be a mapping of fields",
                ));
            }
        };

        let (field_map, source_map) = match root.get("fields") {
            Some(YamlValue::Mapping(fields)) => {
                let sources = match root.get("sources") {
                    None | Some(YamlValue::Null) => None,
                    Some(YamlValue::Mapping(sources)) => Some(sources.clone()),
                    Some(_) => {
                        return Err(HarmonizeError::schema("'sources' must be a mapping"));
                    }
                };
                (fields.clone(), sources)
            }
            Some(_) => return Err(HarmonizeError::schema("'fields' must be a mapping")),
            None => (root, None),
        };

        let sources = match source_map {
            Some(map) => parse_sources(map)?,
            None => Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(field_map.len());
        for (key, value) in field_map {
            let name = key
                .as_str()
                .ok_or_else(|| HarmonizeError::schema("Field names must be strings"))?
                .to_string();
            if !seen.insert(name.clone()) {
                return Err(HarmonizeError::schema(format!(
                    "Field '{name}' is defined more than once"
                )));
            }
            fields.push(parse_field(name, value)?);
        }
        if fields.is_empty() {
            return Err(HarmonizeError::schema("Schema defines no fields"));
        }

        let schema = Schema { fields, sources };
        schema.validate_sources()?;
        Ok(schema)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    pub fn declared_sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|source| source.name == name)
    }

    /// The closed set of source names: the `sources` block when present,
    /// otherwise every name used by a field mapping, in first-seen order.
    pub fn known_sources(&self) -> Vec<&str> {
        if !self.sources.is_empty() {
            return self.sources.iter().map(|s| s.name.as_str()).collect();
        }
        let mut names: Vec<&str> = Vec::new();
        for field in &self.fields {
            for (source, _) in &field.source_mappings {
                if !names.contains(&source.as_str()) {
                    names.push(source);
                }
            }
        }
        names
    }

    pub fn row_kind(&self, source: &str) -> Option<RowKind> {
        self.source(source).map(|spec| spec.kind)
    }

    fn validate_sources(&self) -> Result<(), HarmonizeError> {
        let known = self.known_sources();
        for field in &self.fields {
            let referenced = field
                .source_mappings
                .iter()
                .map(|(source, _)| source)
                .chain(field.transformations.keys());
            for source in referenced {
                if known.contains(&source.as_str()) {
                    continue;
                }
                let reason = if self.sources.is_empty() {
                    "a source no field maps"
                } else {
                    "undeclared source"
                };
                return Err(HarmonizeError::schema(format!(
                    "Field '{}' references {reason} '{source}'",
                    field.name
                )));
            }
        }
        for source in &self.sources {
            let Some(merge_fields) = &source.merge_fields else {
                continue;
            };
            if source.kind == RowKind::Clinical {
                return Err(HarmonizeError::schema(format!(
                    "Source '{}' is clinical and cannot declare merge_fields",
                    source.name
                )));
            }
            for name in merge_fields {
                if self.field(name).is_none() {
                    return Err(HarmonizeError::schema(format!(
                        "Source '{}' merges unknown field '{name}'",
                        source.name
                    )));
                }
                if KEY_FIELDS.contains(&name.as_str()) {
                    return Err(HarmonizeError::schema(format!(
                        "Source '{}' cannot merge key field '{name}'",
                        source.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_sources(map: Mapping) -> Result<Vec<SourceSpec>, HarmonizeError> {
    map.into_iter()
        .map(|(key, value)| {
            let name = key
                .as_str()
                .ok_or_else(|| HarmonizeError::schema("Source names must be strings"))?
                .to_string();
            let raw: RawSourceSpec = serde_yaml::from_value(value).map_err(|err| {
                HarmonizeError::schema(format!("Source '{name}': {err}"))
            })?;
            Ok(SourceSpec {
                name,
                kind: raw.kind,
                merge_fields: raw.merge_fields,
            })
        })
        .collect()
}

fn parse_field(name: String, value: YamlValue) -> Result<FieldSpec, HarmonizeError> {
    let raw: RawFieldSpec = serde_yaml::from_value(value)
        .map_err(|err| HarmonizeError::schema(format!("Field '{name}': {err}")))?;
    let datatype = DataType::from_str(&raw.datatype)
        .map_err(|err| HarmonizeError::schema(format!("Field '{name}': {err}")))?;

    let mut source_mappings = Vec::with_capacity(raw.source_mappings.len());
    for (source, column) in &raw.source_mappings {
        let source = scalar_to_string(source).ok_or_else(|| {
            HarmonizeError::schema(format!("Field '{name}': source names must be scalars"))
        })?;
        // A null column means "not present in this source".
        if column.is_null() {
            continue;
        }
        let column = scalar_to_string(column).ok_or_else(|| {
            HarmonizeError::schema(format!(
                "Field '{name}': column for source '{source}' must be a scalar"
            ))
        })?;
        source_mappings.push((source, column));
    }

    let mut transformations = BTreeMap::new();
    for (source, table) in &raw.transformations {
        let source = scalar_to_string(source).ok_or_else(|| {
            HarmonizeError::schema(format!("Field '{name}': source names must be scalars"))
        })?;
        let table = table.as_mapping().ok_or_else(|| {
            HarmonizeError::schema(format!(
                "Field '{name}': transformations for '{source}' must be a mapping"
            ))
        })?;
        let mut substitutions = BTreeMap::new();
        for (from, to) in table {
            let (Some(from), Some(to)) = (scalar_to_string(from), scalar_to_string(to)) else {
                return Err(HarmonizeError::schema(format!(
                    "Field '{name}': transformation entries for '{source}' must be scalars"
                )));
            };
            substitutions.insert(from, to);
        }
        transformations.insert(source, substitutions);
    }

    let allowed_values = raw
        .allowed_values
        .map(|values| {
            values
                .iter()
                .map(|value| {
                    let token = scalar_to_string(value).ok_or_else(|| {
                        HarmonizeError::schema(format!(
                            "Field '{name}': allowed values must be scalars"
                        ))
                    })?;
                    coerce_value(&token, datatype).map_err(|err| {
                        HarmonizeError::schema(format!("Field '{name}' allowed value: {err}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    if (raw.min.is_some() || raw.max.is_some()) && !datatype.is_numeric() {
        return Err(HarmonizeError::schema(format!(
            "Field '{name}': min/max require a numeric datatype, found {datatype}"
        )));
    }
    if let (Some(min), Some(max)) = (raw.min, raw.max)
        && min > max
    {
        return Err(HarmonizeError::schema(format!(
            "Field '{name}': min ({min}) exceeds max ({max})"
        )));
    }

    Ok(FieldSpec {
        name,
        datatype,
        required: raw.required,
        description: raw.description,
        source_mappings,
        transformations,
        allowed_values,
        min: raw.min,
        max: raw.max,
    })
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
