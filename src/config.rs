//! Run configuration: account details, sampling caps and table definitions.
//!
//! The file is read into loosely-typed [`TableConfig`] values first and each
//! one is then validated into an immutable [`TableSpec`]. A malformed table
//! therefore only fails itself; the remaining tables still run.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, ensure};
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use regex::Regex;
use serde::Deserialize;

use crate::{
    data::parse_timestamp,
    error::TapError,
    io_utils,
    schema::{ConversionType, JsonType, PROVENANCE_FIELDS, PropertySchema},
};

pub const DEFAULT_SAMPLE_MAX_FILES: usize = 5;
pub const DEFAULT_SAMPLE_MAX_ROWS: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub email_address: String,
    pub start_date: String,
    pub mailbox: PathBuf,
    #[serde(default)]
    pub sampling: SamplingPolicy,
    pub tables: Vec<TableConfig>,
}

/// Caps on how much data schema inference may read per table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SamplingPolicy {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: usize,
}

fn default_max_files() -> usize {
    DEFAULT_SAMPLE_MAX_FILES
}

fn default_max_rows() -> usize {
    DEFAULT_SAMPLE_MAX_ROWS
}

fn default_sample_rate() -> usize {
    1
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_SAMPLE_MAX_FILES,
            max_rows: DEFAULT_SAMPLE_MAX_ROWS,
            sample_rate: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub pattern: Option<String>,
    #[serde(default)]
    pub key_properties: Vec<String>,
    pub format: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub unzip: bool,
    pub delimiter: Option<String>,
    pub quoting: Option<String>,
    pub field_names: Option<Vec<String>>,
    pub worksheet_name: Option<String>,
    pub encoding: Option<String>,
    #[serde(default)]
    pub schema_overrides: BTreeMap<String, OverrideConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideConfig {
    #[serde(rename = "type")]
    pub types: Option<TypeList>,
    #[serde(rename = "_conversion_type")]
    pub conversion: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TypeList {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Excel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Attachment,
    Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quoting {
    #[default]
    Minimal,
    All,
    NonNumeric,
    None,
}

impl Quoting {
    /// Only `QUOTE_NONE` turns quote handling off when reading.
    pub fn honours_quotes(&self) -> bool {
        !matches!(self, Quoting::None)
    }
}

/// A validated, read-only table definition.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub pattern: Regex,
    pub key_properties: Vec<String>,
    pub format: FileFormat,
    pub source: SourceKind,
    pub unzip: bool,
    pub delimiter: u8,
    pub quoting: Quoting,
    pub field_names: Option<Vec<String>>,
    pub worksheet_name: Option<String>,
    pub encoding: &'static Encoding,
    pub schema_overrides: BTreeMap<String, PropertySchema>,
}

impl TryFrom<TableConfig> for TableSpec {
    type Error = TapError;

    fn try_from(config: TableConfig) -> Result<Self, Self::Error> {
        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(TapError::config("<unnamed>", "table name must not be empty"));
        }
        let fail = |message: String| TapError::config(&name, message);

        let pattern_text = config
            .pattern
            .ok_or_else(|| fail("missing 'pattern'".to_string()))?;
        let pattern = Regex::new(&pattern_text)
            .map_err(|err| fail(format!("invalid pattern '{pattern_text}': {err}")))?;

        if config.key_properties.is_empty() {
            return Err(fail("'key_properties' must name at least one column".to_string()));
        }
        if let Some(duplicate) = first_duplicate(&config.key_properties) {
            return Err(fail(format!("key property '{duplicate}' is listed twice")));
        }

        let format = match config.format.as_deref().map(str::trim) {
            Some("csv") => FileFormat::Csv,
            Some("excel") => FileFormat::Excel,
            Some(other) => {
                return Err(fail(format!(
                    "unknown format '{other}'. Supported formats: csv, excel"
                )));
            }
            None => return Err(fail("missing 'format'".to_string())),
        };

        let source = match config.source.as_deref().map(str::trim) {
            None | Some("attachment") => SourceKind::Attachment,
            Some("url") => SourceKind::Url,
            Some(other) => {
                return Err(fail(format!(
                    "unknown source '{other}'. Supported sources: attachment, url"
                )));
            }
        };

        let delimiter = match config.delimiter.as_deref() {
            Some(value) => parse_delimiter(value).map_err(fail)?,
            None => io_utils::DEFAULT_CSV_DELIMITER,
        };

        let quoting = match config.quoting.as_deref().map(str::trim) {
            None | Some("QUOTE_MINIMAL") => Quoting::Minimal,
            Some("QUOTE_ALL") => Quoting::All,
            Some("QUOTE_NONNUMERIC") => Quoting::NonNumeric,
            Some("QUOTE_NONE") => Quoting::None,
            Some(other) => {
                return Err(fail(format!(
                    "unknown quoting '{other}'. Supported modes: QUOTE_MINIMAL, QUOTE_ALL, QUOTE_NONNUMERIC, QUOTE_NONE"
                )));
            }
        };

        if let Some(field_names) = &config.field_names {
            if field_names.is_empty() {
                return Err(fail("'field_names' must not be empty".to_string()));
            }
            if let Some(duplicate) = first_duplicate(field_names) {
                return Err(fail(format!("field name '{duplicate}' is listed twice")));
            }
            if let Some(reserved) = field_names
                .iter()
                .find(|name| PROVENANCE_FIELDS.contains(&name.as_str()))
            {
                return Err(fail(format!(
                    "field name '{reserved}' is reserved for provenance"
                )));
            }
            if let Some(missing) = config
                .key_properties
                .iter()
                .find(|key| !field_names.contains(key))
            {
                return Err(fail(format!(
                    "key property '{missing}' is not one of the configured field names"
                )));
            }
        }

        let encoding = io_utils::resolve_encoding(config.encoding.as_deref())
            .map_err(|err| fail(err.to_string()))?;

        let mut schema_overrides = BTreeMap::new();
        for (column, raw) in config.schema_overrides {
            if PROVENANCE_FIELDS.contains(&column.as_str()) {
                return Err(fail(format!(
                    "override for '{column}': the column is reserved for provenance"
                )));
            }
            let property = parse_override(&raw)
                .map_err(|message| fail(format!("override for '{column}': {message}")))?;
            schema_overrides.insert(column, property);
        }

        Ok(TableSpec {
            name,
            pattern,
            key_properties: config.key_properties,
            format,
            source,
            unzip: config.unzip,
            delimiter,
            quoting,
            field_names: config.field_names,
            worksheet_name: config.worksheet_name,
            encoding,
            schema_overrides,
        })
    }
}

fn parse_override(raw: &OverrideConfig) -> Result<PropertySchema, String> {
    let type_names = match &raw.types {
        Some(TypeList::One(single)) => vec![single.clone()],
        Some(TypeList::Many(many)) => many.clone(),
        None => return Err("missing 'type'".to_string()),
    };
    if type_names.is_empty() {
        return Err("'type' must name at least one JSON type".to_string());
    }
    let types = type_names
        .iter()
        .map(|name| name.parse::<JsonType>())
        .collect::<Result<Vec<_>, _>>()?;
    let conversion = raw
        .conversion
        .as_deref()
        .ok_or_else(|| "missing '_conversion_type'".to_string())?
        .parse::<ConversionType>()?;
    if raw.format.is_some() && conversion != ConversionType::DateTime {
        return Err(format!(
            "'format' only applies to date-time conversion, not '{conversion}'"
        ));
    }
    Ok(PropertySchema {
        types,
        conversion,
        date_format: raw.format.clone(),
    })
}

fn first_duplicate(values: &[String]) -> Option<&String> {
    let mut seen = HashSet::new();
    values.iter().find(|value| !seen.insert(value.as_str()))
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

impl Config {
    /// Reads JSON, or YAML when the file extension says so.
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("Opening config file {path:?}"))?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        let mut config: Config = if is_yaml {
            serde_yaml::from_str(&text).with_context(|| format!("Parsing config YAML {path:?}"))?
        } else {
            serde_json::from_str(&text).with_context(|| format!("Parsing config JSON {path:?}"))?
        };
        config.validate()?;
        if config.mailbox.is_relative()
            && let Some(parent) = path.parent()
        {
            config.mailbox = parent.join(&config.mailbox);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.email_address.trim().is_empty(),
            "'email_address' must not be empty"
        );
        self.start_date()?;
        ensure!(
            self.sampling.sample_rate > 0,
            "'sampling.sample_rate' must be at least 1"
        );
        let names: Vec<String> = self.tables.iter().map(|t| t.name.trim().to_string()).collect();
        if let Some(duplicate) = first_duplicate(&names) {
            return Err(anyhow!("Table '{duplicate}' is configured more than once"));
        }
        Ok(())
    }

    pub fn start_date(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.start_date, None)
            .with_context(|| format!("Parsing start_date '{}'", self.start_date))
    }

    /// Validates every table independently.
    pub fn table_specs(&self) -> Vec<Result<TableSpec, TapError>> {
        self.tables
            .iter()
            .cloned()
            .map(TableSpec::try_from)
            .collect()
    }
}
