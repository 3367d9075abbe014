//! Table schema model, the schema merger, and catalog persistence.
//!
//! This module owns [`TableSchema`] (the frozen per-run description of a
//! table), [`PropertySchema`] (one column's JSON types plus the conversion
//! directive applied to raw cells), and [`finalize`], which turns the
//! guesses gathered by [`crate::inference`] into a schema.
//!
//! ## Responsibilities
//!
//! - JSON type and conversion vocabularies with strict parsing
//! - Widest-guess to JSON-schema mapping, with nullability policy
//! - Override precedence (overrides always replace inferred types)
//! - Rendering schema announcements, including provenance properties
//! - Loading and saving catalogs of fixed schemas

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{BufReader, Write},
    path::Path,
    str::FromStr,
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    config::TableSpec,
    error::TapError,
    inference::{ColumnTypeGuess, Inference},
};

pub const SOURCE_ADDRESS_FIELD: &str = "_email_source_address";
pub const SOURCE_FILE_FIELD: &str = "_email_source_file";
pub const SOURCE_LINENO_FIELD: &str = "_email_source_lineno";
pub const EXTRA_FIELD: &str = "_email_extra";

pub const PROVENANCE_FIELDS: [&str; 4] = [
    SOURCE_ADDRESS_FIELD,
    SOURCE_FILE_FIELD,
    SOURCE_LINENO_FIELD,
    EXTRA_FIELD,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "null", "boolean", "integer", "number", "string", "array", "object",
        ]
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JsonType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "null" => Ok(JsonType::Null),
            "boolean" => Ok(JsonType::Boolean),
            "integer" => Ok(JsonType::Integer),
            "number" => Ok(JsonType::Number),
            "string" => Ok(JsonType::String),
            "array" => Ok(JsonType::Array),
            "object" => Ok(JsonType::Object),
            other => Err(format!(
                "unknown JSON type '{other}'. Supported types: {}",
                JsonType::variants().join(", ")
            )),
        }
    }
}

/// How a raw cell is converted before it is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionType {
    String,
    Integer,
    Number,
    DateTime,
}

impl ConversionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionType::String => "string",
            ConversionType::Integer => "integer",
            ConversionType::Number => "number",
            ConversionType::DateTime => "date-time",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["string", "integer", "number", "date-time"]
    }

    pub fn json_type(&self) -> JsonType {
        match self {
            ConversionType::Integer => JsonType::Integer,
            ConversionType::Number => JsonType::Number,
            ConversionType::String | ConversionType::DateTime => JsonType::String,
        }
    }
}

impl fmt::Display for ConversionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "string" => Ok(ConversionType::String),
            "integer" => Ok(ConversionType::Integer),
            "number" => Ok(ConversionType::Number),
            "date-time" => Ok(ConversionType::DateTime),
            other => Err(format!(
                "unknown conversion directive '{other}'. Supported directives: {}",
                ConversionType::variants().join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySchema {
    pub types: Vec<JsonType>,
    pub conversion: ConversionType,
    /// strftime layout used by `date-time` conversion.
    pub date_format: Option<String>,
}

impl PropertySchema {
    pub fn new(types: Vec<JsonType>, conversion: ConversionType) -> Self {
        Self {
            types,
            conversion,
            date_format: None,
        }
    }

    pub fn from_guess(guess: &ColumnTypeGuess, nullable: bool) -> Self {
        let inferred = guess.inferred_type();
        let mut types = Vec::with_capacity(2);
        if nullable {
            types.push(JsonType::Null);
        }
        types.push(inferred.json_type());
        Self::new(types, inferred.conversion())
    }

    pub fn allows_null(&self) -> bool {
        self.types.contains(&JsonType::Null)
    }

    pub fn to_json(&self) -> Value {
        let mut property = Map::new();
        property.insert(
            "type".to_string(),
            Value::Array(
                self.types
                    .iter()
                    .map(|ty| Value::String(ty.as_str().to_string()))
                    .collect(),
            ),
        );
        property.insert(
            "_conversion_type".to_string(),
            Value::String(self.conversion.as_str().to_string()),
        );
        if self.conversion == ConversionType::DateTime {
            property.insert("format".to_string(), Value::String("date-time".to_string()));
            if let Some(fmt) = &self.date_format {
                property.insert("_date_format".to_string(), Value::String(fmt.clone()));
            }
        }
        Value::Object(property)
    }

    /// Reads a property from a JSON-schema fragment as written by [`PropertySchema::to_json`]
    /// or by hand in a catalog.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "property schema must be an object".to_string())?;
        let types = match object.get("type") {
            Some(Value::String(single)) => vec![single.parse::<JsonType>()?],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| "'type' entries must be strings".to_string())
                        .and_then(|text| text.parse::<JsonType>())
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err("'type' must be a string or a list of strings".to_string()),
            None => return Err("property schema is missing 'type'".to_string()),
        };
        if types.is_empty() {
            return Err("'type' must name at least one JSON type".to_string());
        }
        let conversion = match object.get("_conversion_type") {
            Some(Value::String(directive)) => directive.parse::<ConversionType>()?,
            Some(_) => return Err("'_conversion_type' must be a string".to_string()),
            None => conversion_for_types(
                &types,
                object.get("format").and_then(Value::as_str) == Some("date-time"),
            ),
        };
        let date_format = object
            .get("_date_format")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            types,
            conversion,
            date_format,
        })
    }
}

fn conversion_for_types(types: &[JsonType], date_time: bool) -> ConversionType {
    if date_time {
        ConversionType::DateTime
    } else if types.contains(&JsonType::String) {
        ConversionType::String
    } else if types.contains(&JsonType::Number) {
        ConversionType::Number
    } else if types.contains(&JsonType::Integer) {
        ConversionType::Integer
    } else {
        ConversionType::String
    }
}

/// The frozen description of one table for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub stream: String,
    /// Data columns in resolved order.
    pub columns: Vec<String>,
    pub properties: BTreeMap<String, PropertySchema>,
    pub key_properties: Vec<String>,
    /// Catalog-supplied schemas are announced exactly as they were read.
    announcement: Option<Value>,
}

impl TableSchema {
    pub fn property(&self, column: &str) -> Option<&PropertySchema> {
        self.properties.get(column)
    }

    pub fn is_fixed(&self) -> bool {
        self.announcement.is_some()
    }

    pub fn to_json_schema(&self) -> Value {
        if let Some(raw) = &self.announcement {
            return raw.clone();
        }
        let mut properties = Map::new();
        for (name, property) in &self.properties {
            properties.insert(name.clone(), property.to_json());
        }
        for (name, property) in provenance_properties() {
            properties.insert(name.to_string(), property);
        }
        json!({
            "type": "object",
            "properties": properties,
        })
    }

    /// Builds a schema from a catalog stream. Key properties are trusted as given.
    pub fn from_catalog(entry: &CatalogEntry, spec: &TableSpec) -> Result<Self, TapError> {
        let properties_json = entry
            .schema
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                TapError::schema(&spec.name, "catalog schema has no 'properties' object")
            })?;
        let mut columns = Vec::with_capacity(properties_json.len());
        let mut properties = BTreeMap::new();
        for (name, value) in properties_json {
            if PROVENANCE_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let property = PropertySchema::from_json(value).map_err(|message| {
                TapError::schema(&spec.name, format!("catalog property '{name}': {message}"))
            })?;
            columns.push(name.clone());
            properties.insert(name.clone(), property);
        }
        Ok(Self {
            stream: spec.name.clone(),
            columns,
            properties,
            key_properties: entry
                .key_properties
                .clone()
                .unwrap_or_else(|| spec.key_properties.clone()),
            announcement: Some(entry.schema.clone()),
        })
    }
}

fn provenance_properties() -> [(&'static str, Value); 4] {
    [
        (SOURCE_ADDRESS_FIELD, json!({ "type": "string" })),
        (SOURCE_FILE_FIELD, json!({ "type": "string" })),
        (SOURCE_LINENO_FIELD, json!({ "type": "integer" })),
        (
            EXTRA_FIELD,
            json!({ "type": ["null", "array"], "items": { "type": "string" } }),
        ),
    ]
}

/// Turns sampled guesses into the table's schema.
///
/// Overrides replace the inferred type of their column outright. Inferred
/// columns are nullable unless they are key properties that held a value in
/// every sampled row.
pub fn finalize(spec: &TableSpec, inference: &Inference) -> Result<TableSchema, TapError> {
    let resolved = inference.columns();
    for key in &spec.key_properties {
        if !resolved.iter().any(|column| column == key) {
            return Err(TapError::schema(
                &spec.name,
                format!(
                    "key property '{key}' was not found among the resolved columns [{}]",
                    resolved.join(", ")
                ),
            ));
        }
    }

    let mut columns = resolved.to_vec();
    let mut properties = BTreeMap::new();
    for column in resolved {
        let property = match spec.schema_overrides.get(column) {
            Some(declared) => declared.clone(),
            None => {
                let guess = inference.guess(column).cloned().unwrap_or_default();
                let is_key = spec.key_properties.iter().any(|key| key == column);
                PropertySchema::from_guess(&guess, !is_key || guess.is_nullable())
            }
        };
        properties.insert(column.clone(), property);
    }
    for (column, declared) in &spec.schema_overrides {
        if !properties.contains_key(column) {
            columns.push(column.clone());
            properties.insert(column.clone(), declared.clone());
        }
    }

    Ok(TableSchema {
        stream: spec.name.clone(),
        columns,
        properties,
        key_properties: spec.key_properties.clone(),
        announcement: None,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub stream: String,
    #[serde(default)]
    pub tap_stream_id: Option<String>,
    #[serde(default)]
    pub key_properties: Option<Vec<String>>,
    pub schema: Value,
}

impl CatalogEntry {
    pub fn from_schema(schema: &TableSchema) -> Self {
        Self {
            stream: schema.stream.clone(),
            tap_stream_id: Some(schema.stream.clone()),
            key_properties: Some(schema.key_properties.clone()),
            schema: schema.to_json_schema(),
        }
    }
}

impl Catalog {
    pub fn find(&self, stream: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|entry| entry.stream == stream)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening catalog file {path:?}"))?;
        let reader = BufReader::new(file);
        let catalog: Catalog = serde_json::from_reader(reader)
            .with_context(|| format!("Parsing catalog JSON from {path:?}"))?;
        if let Some(duplicate) = duplicate_stream(&catalog) {
            return Err(anyhow!("Catalog lists stream '{duplicate}' more than once"));
        }
        Ok(catalog)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut writer, self).context("Writing catalog JSON")?;
        writeln!(writer).context("Writing catalog JSON")?;
        writer.flush().context("Flushing catalog JSON")
    }
}

fn duplicate_stream(catalog: &Catalog) -> Option<&str> {
    catalog
        .streams
        .iter()
        .enumerate()
        .find(|(idx, entry)| {
            catalog.streams[..*idx]
                .iter()
                .any(|earlier| earlier.stream == entry.stream)
        })
        .map(|(_, entry)| entry.stream.as_str())
}
