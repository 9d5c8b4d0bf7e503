use std::{collections::BTreeMap, fmt};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{error::CoercionError, schema::DataType};

/// One raw CSV row keyed by (trimmed) header name.
pub type RawRow = BTreeMap<String, String>;

/// Harmonized field name to nullable typed value.
pub type HarmonizedValues = BTreeMap<String, Option<Value>>;

const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Date(d) => d.format(ISO_DATE_FORMAT).to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

/// Strict ISO calendar date: exactly `YYYY-MM-DD`.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(idx, b)| idx == 4 || idx == 7 || b.is_ascii_digit());
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(value, ISO_DATE_FORMAT).ok()
}

/// Parses a real number and truncates it toward zero.
fn parse_truncated_integer(value: &str) -> Option<i64> {
    let parsed: f64 = value.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    let truncated = parsed.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return None;
    }
    Some(truncated as i64)
}

/// Coerces a non-empty raw string into the requested datatype.
pub fn coerce_value(raw: &str, datatype: DataType) -> Result<Value, CoercionError> {
    let failure = || CoercionError {
        raw: raw.to_string(),
        datatype,
    };
    match datatype {
        DataType::String => Ok(Value::String(raw.to_string())),
        DataType::Integer => parse_truncated_integer(raw.trim())
            .map(Value::Integer)
            .ok_or_else(failure),
        DataType::Float => {
            let parsed: f64 = raw.trim().parse().map_err(|_| failure())?;
            if parsed.is_finite() {
                Ok(Value::Float(parsed))
            } else {
                Err(failure())
            }
        }
        DataType::Date => parse_iso_date(raw.trim())
            .map(Value::Date)
            .ok_or_else(failure),
    }
}
