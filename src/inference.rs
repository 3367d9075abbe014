//! Column type inference over a bounded sample of source rows.
//!
//! Every non-empty cell is classified as `integer`, `number` or `string`;
//! a column's guess is the widest class any sampled cell required. Dates
//! are never inferred here: they are only reachable through an explicit
//! `date-time` override.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::{
    config::{SamplingPolicy, TableSpec},
    data::{parse_integer_token, parse_number_token},
    error::TapError,
    header::HeaderResolver,
    mailbox::{FileHandle, MailSource},
    rows,
    schema::{ConversionType, JsonType},
};

/// Inferred cell classes, ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InferredType {
    Integer,
    Number,
    String,
}

impl InferredType {
    pub fn classify(value: &str) -> Self {
        if parse_integer_token(value).is_some() {
            InferredType::Integer
        } else if parse_number_token(value).is_some() {
            InferredType::Number
        } else {
            InferredType::String
        }
    }

    pub fn json_type(&self) -> JsonType {
        match self {
            InferredType::Integer => JsonType::Integer,
            InferredType::Number => JsonType::Number,
            InferredType::String => JsonType::String,
        }
    }

    pub fn conversion(&self) -> ConversionType {
        match self {
            InferredType::Integer => ConversionType::Integer,
            InferredType::Number => ConversionType::Number,
            InferredType::String => ConversionType::String,
        }
    }
}

/// Accumulated evidence for one column. The type only ever widens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnTypeGuess {
    widest: Option<InferredType>,
    saw_null: bool,
    non_null: usize,
}

impl ColumnTypeGuess {
    pub fn observe(&mut self, value: Option<&str>) {
        let trimmed = value.map(str::trim).unwrap_or("");
        if trimmed.is_empty() {
            self.saw_null = true;
            return;
        }
        self.non_null += 1;
        let class = InferredType::classify(trimmed);
        self.widest = Some(self.widest.map_or(class, |current| current.max(class)));
    }

    pub fn widen(&mut self, other: &ColumnTypeGuess) {
        self.widest = match (self.widest, other.widest) {
            (Some(left), Some(right)) => Some(left.max(right)),
            (left, right) => left.or(right),
        };
        self.saw_null |= other.saw_null;
        self.non_null += other.non_null;
    }

    /// Columns without a single non-null sample default to `string`.
    pub fn inferred_type(&self) -> InferredType {
        self.widest.unwrap_or(InferredType::String)
    }

    pub fn saw_null(&self) -> bool {
        self.saw_null
    }

    pub fn non_null_count(&self) -> usize {
        self.non_null
    }

    pub fn is_nullable(&self) -> bool {
        self.saw_null || self.non_null == 0
    }
}

/// Per-table inference state: resolved columns in first-seen order plus one
/// guess per column.
#[derive(Debug, Clone, Default)]
pub struct Inference {
    columns: Vec<String>,
    guesses: BTreeMap<String, ColumnTypeGuess>,
    rows_sampled: usize,
    files_sampled: usize,
}

impl Inference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_columns(&mut self, columns: &[String]) {
        for column in columns {
            if !self.guesses.contains_key(column) {
                self.columns.push(column.clone());
                self.guesses
                    .insert(column.clone(), ColumnTypeGuess::default());
            }
        }
    }

    /// Cells missing from a short row count as nulls; cells past the last
    /// column are ignored.
    pub fn observe_row(&mut self, columns: &[String], row: &[String]) {
        self.register_columns(columns);
        for (idx, column) in columns.iter().enumerate() {
            if let Some(guess) = self.guesses.get_mut(column) {
                guess.observe(row.get(idx).map(String::as_str));
            }
        }
        self.rows_sampled += 1;
    }

    pub fn merge(&mut self, other: &Inference) {
        self.register_columns(&other.columns);
        for (column, guess) in &other.guesses {
            if let Some(existing) = self.guesses.get_mut(column) {
                existing.widen(guess);
            }
        }
        self.rows_sampled += other.rows_sampled;
        self.files_sampled += other.files_sampled;
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn guess(&self, column: &str) -> Option<&ColumnTypeGuess> {
        self.guesses.get(column)
    }

    pub fn rows_sampled(&self) -> usize {
        self.rows_sampled
    }

    pub fn files_sampled(&self) -> usize {
        self.files_sampled
    }
}

/// Infers guesses for one batch of rows that share a header.
pub fn infer(columns: &[String], rows: &[Vec<String>]) -> Inference {
    let mut inference = Inference::new();
    inference.register_columns(columns);
    for row in rows {
        inference.observe_row(columns, row);
    }
    inference
}

/// Samples a table's files in discovery order, within the policy's caps.
///
/// At most `max_files` files are opened and at most `max_rows` rows are
/// observed in total; with a `sample_rate` of `n` only every n-th data row of
/// a file is observed.
pub fn sample_table<S>(
    source: &S,
    spec: &TableSpec,
    files: &[FileHandle],
    policy: &SamplingPolicy,
) -> Result<Inference, TapError>
where
    S: MailSource + ?Sized,
{
    info!("Sampling records to determine the schema of table '{}'", spec.name);
    let resolver = HeaderResolver::new(spec);
    let mut inference = Inference::new();
    if let Some(field_names) = &spec.field_names {
        inference.register_columns(field_names);
    }

    for file in files.iter().take(policy.max_files) {
        if inference.rows_sampled() >= policy.max_rows {
            break;
        }
        let mut row_source = rows::open_rows(source, file, spec)?;
        let mut columns: Option<Vec<String>> = None;
        let mut data_index = 0usize;
        let mut file_inference = Inference::new();
        while inference.rows_sampled() + file_inference.rows_sampled() < policy.max_rows {
            let Some(row) = row_source.next_row()? else {
                break;
            };
            if columns.is_none() {
                let (resolved, consumed) = resolver.resolve(Some(row.as_slice()))?;
                file_inference.register_columns(&resolved);
                columns = Some(resolved);
                if consumed {
                    continue;
                }
            }
            let header = columns.as_deref().unwrap_or_default();
            if data_index % policy.sample_rate == 0 {
                file_inference.observe_row(header, &row);
            }
            data_index += 1;
        }
        file_inference.files_sampled = 1;
        debug!(
            "Sampled {} row(s) from '{}'",
            file_inference.rows_sampled(),
            file.name
        );
        inference.merge(&file_inference);
    }

    info!(
        "Sampled {} row(s) across {} file(s) for table '{}'",
        inference.rows_sampled(),
        inference.files_sampled(),
        spec.name
    );
    Ok(inference)
}
