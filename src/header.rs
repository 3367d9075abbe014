//! Column name resolution for a single source file.

use itertools::Itertools;

use crate::{config::TableSpec, error::TapError, schema::PROVENANCE_FIELDS};

/// Normalizes a header cell: surrounding whitespace is stripped, internal
/// whitespace runs become a single underscore, and the result is lower-cased.
pub fn normalize_column_name(name: &str) -> String {
    name.split_whitespace().join("_").to_lowercase()
}

/// Blank header cells get a positional name so rows still line up.
fn placeholder_name(position: usize) -> String {
    format!("field_{}", position + 1)
}

pub struct HeaderResolver<'a> {
    table: &'a str,
    field_names: Option<&'a [String]>,
}

impl<'a> HeaderResolver<'a> {
    pub fn new(spec: &'a TableSpec) -> Self {
        Self {
            table: &spec.name,
            field_names: spec.field_names.as_deref(),
        }
    }

    /// Resolves the columns of a file from its first raw row.
    ///
    /// Returns the column names and whether the first row was consumed as a
    /// header. Configured field names are used verbatim and leave the first
    /// row to be read as data.
    pub fn resolve(&self, first_row: Option<&[String]>) -> Result<(Vec<String>, bool), TapError> {
        if let Some(names) = self.field_names {
            return Ok((names.to_vec(), false));
        }
        let Some(row) = first_row else {
            return Ok((Vec::new(), false));
        };
        let columns: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(idx, cell)| {
                let normalized = normalize_column_name(cell);
                if normalized.is_empty() {
                    placeholder_name(idx)
                } else {
                    normalized
                }
            })
            .collect();
        let duplicates: Vec<&String> = columns.iter().duplicates().collect();
        if !duplicates.is_empty() {
            return Err(TapError::schema(
                self.table,
                format!(
                    "header normalizes to duplicate column name(s): {}",
                    duplicates.iter().join(", ")
                ),
            ));
        }
        if let Some(reserved) = columns
            .iter()
            .find(|name| PROVENANCE_FIELDS.contains(&name.as_str()))
        {
            return Err(TapError::schema(
                self.table,
                format!("header column '{reserved}' clashes with a provenance field"),
            ));
        }
        Ok((columns, true))
    }
}
