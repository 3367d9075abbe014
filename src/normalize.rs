//! Record normalization: one raw row in, one typed record out.
//!
//! Cells are matched to the file's resolved columns by position. Short rows
//! are padded with nulls, long rows spill their surplus cells into
//! `_email_extra`, and each cell is converted according to its column's
//! conversion directive. A value that cannot be converted becomes null when
//! the column allows it (with a warning) and fails the row otherwise.

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::{
    data::{format_timestamp, parse_integer_token, parse_number_token, parse_timestamp},
    error::CoercionError,
    mailbox::FileHandle,
    schema::{
        ConversionType, EXTRA_FIELD, PropertySchema, SOURCE_ADDRESS_FIELD, SOURCE_FILE_FIELD,
        SOURCE_LINENO_FIELD, TableSchema,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedRecord(Map<String, Value>);

impl NormalizedRecord {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    pub record: NormalizedRecord,
    /// Non-fatal conversion problems, already turned into nulls.
    pub warnings: Vec<String>,
}

/// Normalizes one data row.
///
/// `columns` are the names resolved for the file the row came from. Schema
/// columns the file lacks are treated as empty cells, so they come out as
/// null or fail the row when the column does not allow null. File columns
/// the schema does not know are passed through as text. `line_number` is
/// 1-based and counts data rows only.
pub fn normalize(
    schema: &TableSchema,
    columns: &[String],
    raw_row: &[String],
    file: &FileHandle,
    line_number: usize,
) -> Result<RowOutcome, CoercionError> {
    let mut record = Map::new();
    let mut warnings = Vec::new();

    for (idx, column) in columns.iter().enumerate() {
        let cell = raw_row.get(idx).map(String::as_str);
        let value = match schema.property(column) {
            Some(property) => convert(property, column, cell, line_number, &mut warnings)?,
            None => text_value(cell),
        };
        record.insert(column.clone(), value);
    }

    for column in &schema.columns {
        if record.contains_key(column) {
            continue;
        }
        let value = match schema.property(column) {
            Some(property) => convert(property, column, None, line_number, &mut warnings)?,
            None => Value::Null,
        };
        record.insert(column.clone(), value);
    }

    let extra = if raw_row.len() > columns.len() {
        Value::Array(
            raw_row[columns.len()..]
                .iter()
                .map(|cell| Value::String(cell.clone()))
                .collect(),
        )
    } else {
        Value::Null
    };

    record.insert(
        SOURCE_ADDRESS_FIELD.to_string(),
        Value::String(file.source_address.clone()),
    );
    record.insert(SOURCE_FILE_FIELD.to_string(), Value::String(file.name.clone()));
    record.insert(SOURCE_LINENO_FIELD.to_string(), Value::from(line_number));
    record.insert(EXTRA_FIELD.to_string(), extra);

    Ok(RowOutcome {
        record: NormalizedRecord(record),
        warnings,
    })
}

/// Coerces one cell, downgrading failures to null where the column allows it.
fn convert(
    property: &PropertySchema,
    column: &str,
    cell: Option<&str>,
    line_number: usize,
    warnings: &mut Vec<String>,
) -> Result<Value, CoercionError> {
    match coerce(property, cell) {
        Ok(value) => Ok(value),
        Err(message) if property.allows_null() => {
            warnings.push(format!(
                "line {line_number}, column '{column}': {message}; emitting null"
            ));
            Ok(Value::Null)
        }
        Err(message) => Err(CoercionError {
            column: column.to_string(),
            value: cell.map(str::to_string),
            line: line_number,
            message,
        }),
    }
}

fn text_value(cell: Option<&str>) -> Value {
    match cell {
        Some(text) if !text.trim().is_empty() => Value::String(text.to_string()),
        _ => Value::Null,
    }
}

/// Converts one cell. `Err` carries a description of why it was rejected.
fn coerce(property: &PropertySchema, cell: Option<&str>) -> Result<Value, String> {
    let Some(raw) = cell.filter(|text| !text.trim().is_empty()) else {
        return if property.allows_null() {
            Ok(Value::Null)
        } else {
            Err("empty value in a column that does not allow null".to_string())
        };
    };
    let trimmed = raw.trim();
    match property.conversion {
        ConversionType::String => Ok(Value::String(raw.to_string())),
        ConversionType::Integer => parse_integer_token(trimmed)
            .map(Value::from)
            .ok_or_else(|| "not an integer".to_string()),
        ConversionType::Number => parse_number_token(trimmed)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| "not a number".to_string()),
        ConversionType::DateTime => parse_timestamp(trimmed, property.date_format.as_deref())
            .map(|parsed| Value::String(format_timestamp(&parsed)))
            .map_err(|err| format!("not a date-time ({err})")),
    }
}
