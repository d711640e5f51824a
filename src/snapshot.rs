//! Normalisation of the payloads delivered by both transports.
//!
//! Full snapshots carry one array per metric (`<metric>_data`), either inline
//! or as a JSON-encoded string, plus chart labels, the latest table rows and
//! optional server averages (`avg_<metric>`). Incremental snapshots carry a
//! single row: `{ "type": "new_data", "data": { ... } }`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::ParseError;

pub type RowRecord = Map<String, Value>;

const LATEST_FIELD: &str = "latest_data";
const LABELS_FIELD: &str = "chart_labels";
const SERIES_SUFFIX: &str = "_data";
const AVERAGE_PREFIX: &str = "avg_";

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Full(FullSnapshot),
    Row(RowRecord),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullSnapshot {
    pub labels: Vec<String>,
    /// Keyed by the payload field name, e.g. `cpu_data`. `None` marks a null
    /// entry that must not reach a window.
    pub series: HashMap<String, Vec<Option<f64>>>,
    pub latest: Vec<RowRecord>,
    pub averages: HashMap<String, f64>,
}

impl Snapshot {
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        let Value::Object(mut object) = value else {
            return Err(ParseError::NotAnObject);
        };

        match object.get("type").and_then(Value::as_str) {
            None | Some("initial_data") => parse_full(object).map(Snapshot::Full),
            Some("new_data") => match object.remove("data") {
                Some(Value::Object(row)) => Ok(Snapshot::Row(row)),
                _ => Err(ParseError::field("data", "expected an object")),
            },
            Some(other) => Err(ParseError::UnknownType(other.to_string())),
        }
    }
}

fn parse_full(object: Map<String, Value>) -> Result<FullSnapshot, ParseError> {
    let mut snapshot = FullSnapshot::default();

    for (field, value) in object {
        if field == "type" {
            continue;
        }
        if field == LABELS_FIELD {
            snapshot.labels = parse_labels(&field, decode_embedded(&field, value)?)?;
        } else if field == LATEST_FIELD {
            snapshot.latest = parse_rows(&field, decode_embedded(&field, value)?)?;
        } else if field.ends_with(SERIES_SUFFIX) {
            let values = parse_series(&field, decode_embedded(&field, value)?)?;
            snapshot.series.insert(field, values);
        } else if field.starts_with(AVERAGE_PREFIX) {
            if let Some(avg) = number_of(&field, &value)? {
                snapshot.averages.insert(field, avg);
            }
        }
    }

    Ok(snapshot)
}

/// Templated and HTTP payloads encode arrays as JSON strings.
fn decode_embedded(field: &str, value: Value) -> Result<Value, ParseError> {
    match value {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|err| ParseError::field(field, format!("embedded JSON: {err}"))),
        other => Ok(other),
    }
}

fn parse_labels(field: &str, value: Value) -> Result<Vec<String>, ParseError> {
    let Value::Array(items) = value else {
        return Err(ParseError::field(field, "expected an array"));
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}

fn parse_series(field: &str, value: Value) -> Result<Vec<Option<f64>>, ParseError> {
    let Value::Array(items) = value else {
        return Err(ParseError::field(field, "expected an array"));
    };
    items.iter().map(|item| number_of(field, item)).collect()
}

fn parse_rows(field: &str, value: Value) -> Result<Vec<RowRecord>, ParseError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                _ => Err(ParseError::field(field, "rows must be objects")),
            })
            .collect(),
        _ => Err(ParseError::field(field, "expected an array")),
    }
}

/// Numeric coercion: numbers and numeric strings are accepted, null is absent,
/// anything else rejects the snapshot.
pub(crate) fn number_of(field: &str, value: &Value) -> Result<Option<f64>, ParseError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64().filter(|v| v.is_finite())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|v| Some(v).filter(|v| v.is_finite()))
            .map_err(|_| ParseError::field(field, format!("`{s}` is not a number"))),
        other => Err(ParseError::field(field, format!("`{other}` is not a number"))),
    }
}

/// Timestamp of a row, from its `created_at` field when parseable.
pub fn row_timestamp(row: &RowRecord) -> Option<DateTime<Utc>> {
    row.get("created_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}
