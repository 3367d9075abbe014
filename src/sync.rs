//! The pipeline driver.
//!
//! Tables run one after another and files within a table run oldest first.
//! For each table: discover files past the bookmark, settle the schema
//! (catalog or inference), announce it, stream every file through the
//! normalizer, and advance the bookmark once a file is fully written.

use std::{
    io::{self, Write},
    path::Path,
};

use log::{error, info, warn};

use crate::{
    checkpoint::CheckpointTracker,
    config::{SamplingPolicy, TableSpec},
    error::TapError,
    header::HeaderResolver,
    inference::sample_table,
    mailbox::{FileHandle, MailSource},
    normalize::normalize,
    output::{Message, MessageWriter},
    rows::open_rows,
    schema::{Catalog, CatalogEntry, TableSchema, finalize},
};

pub struct SyncOptions<'a> {
    pub sampling: &'a SamplingPolicy,
    pub catalog: Option<&'a Catalog>,
    /// Rewritten after every completed file when set.
    pub state_output: Option<&'a Path>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileReport {
    pub records: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub files: usize,
    pub records: usize,
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub tables: Vec<TableReport>,
    pub failed: Vec<String>,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs every table. Only output failures end the run early; any other
/// table failure is logged and recorded in the summary.
pub fn sync_all<S, W>(
    source: &S,
    specs: Vec<Result<TableSpec, TapError>>,
    tracker: &mut CheckpointTracker,
    writer: &mut MessageWriter<W>,
    options: &SyncOptions<'_>,
) -> Result<SyncSummary, TapError>
where
    S: MailSource + ?Sized,
    W: Write,
{
    let mut summary = SyncSummary::default();
    for spec in specs {
        let spec = match spec {
            Ok(spec) => spec,
            Err(err) => {
                error!("{err}");
                summary.failed.push(failed_table_name(&err));
                continue;
            }
        };
        match sync_table(source, &spec, tracker, writer, options) {
            Ok(report) => summary.tables.push(report),
            Err(err) if err.aborts_run() => return Err(err),
            Err(err) => {
                error!("Table '{}' failed: {err}", spec.name);
                summary.failed.push(spec.name.clone());
            }
        }
    }
    Ok(summary)
}

fn failed_table_name(err: &TapError) -> String {
    match err {
        TapError::Config { table, .. } | TapError::Schema { table, .. } => table.clone(),
        other => other.to_string(),
    }
}

pub fn sync_table<S, W>(
    source: &S,
    spec: &TableSpec,
    tracker: &mut CheckpointTracker,
    writer: &mut MessageWriter<W>,
    options: &SyncOptions<'_>,
) -> Result<TableReport, TapError>
where
    S: MailSource + ?Sized,
    W: Write,
{
    let since = tracker.current(&spec.name);
    info!("Syncing table '{}' with files since {since}", spec.name);
    let files = source.list_candidate_files(spec, since)?;
    info!("Found {} file(s) to sync for table '{}'", files.len(), spec.name);

    let mut report = TableReport {
        table: spec.name.clone(),
        ..TableReport::default()
    };
    if files.is_empty() {
        return Ok(report);
    }

    let schema = match options.catalog.and_then(|catalog| catalog.find(&spec.name)) {
        Some(entry) => TableSchema::from_catalog(entry, spec)?,
        None => finalize(spec, &sample_table(source, spec, &files, options.sampling)?)?,
    };
    info!(
        "Table '{}' uses {} schema with {} column(s)",
        spec.name,
        if schema.is_fixed() { "the catalog" } else { "an inferred" },
        schema.columns.len()
    );
    writer.write(&Message::Schema {
        stream: &spec.name,
        schema: schema.to_json_schema(),
        key_properties: &schema.key_properties,
    })?;

    for file in &files {
        let file_report = sync_file(source, spec, &schema, file, writer)?;
        report.files += 1;
        report.records += file_report.records;
        report.dropped += file_report.dropped;

        tracker.advance(&spec.name, file.timestamp);
        writer.write(&Message::State {
            value: tracker.state(),
        })?;
        if let Some(path) = options.state_output {
            tracker
                .state()
                .save(path)
                .map_err(|err| TapError::Output(io::Error::other(format!("{err:#}"))))?;
        }
    }

    info!(
        "Wrote {} record(s) for table '{}' ({} dropped)",
        report.records, report.table, report.dropped
    );
    Ok(report)
}

/// Streams one file. Rows that fail coercion are dropped and counted.
pub fn sync_file<S, W>(
    source: &S,
    spec: &TableSpec,
    schema: &TableSchema,
    file: &FileHandle,
    writer: &mut MessageWriter<W>,
) -> Result<FileReport, TapError>
where
    S: MailSource + ?Sized,
    W: Write,
{
    info!("Syncing file '{}'", file.name);
    let resolver = HeaderResolver::new(spec);
    let mut rows = open_rows(source, file, spec)?;
    let mut columns: Option<Vec<String>> = None;
    let mut line_number = 0usize;
    let mut report = FileReport::default();

    while let Some(row) = rows.next_row()? {
        if columns.is_none() {
            let (resolved, consumed) = resolver.resolve(Some(row.as_slice()))?;
            let unannounced: Vec<&str> = resolved
                .iter()
                .filter(|column| schema.property(column).is_none())
                .map(String::as_str)
                .collect();
            if !unannounced.is_empty() {
                warn!(
                    "'{}' has column(s) missing from the announced schema, passed through as text: {}",
                    file.name,
                    unannounced.join(", ")
                );
            }
            columns = Some(resolved);
            if consumed {
                continue;
            }
        }
        line_number += 1;
        let header = columns.as_deref().unwrap_or_default();
        match normalize(schema, header, &row, file, line_number) {
            Ok(outcome) => {
                for warning in &outcome.warnings {
                    warn!("'{}' {warning}", file.name);
                }
                writer.write(&Message::Record {
                    stream: &spec.name,
                    record: &outcome.record,
                })?;
                report.records += 1;
            }
            Err(err) => {
                warn!("Dropping row from '{}': {err}", file.name);
                report.dropped += 1;
            }
        }
    }
    Ok(report)
}

/// Infers the schema of every table from the files available since
/// `start_date`. Tables that fail are logged and left out of the catalog.
pub fn discover<S>(
    source: &S,
    specs: Vec<Result<TableSpec, TapError>>,
    tracker: &CheckpointTracker,
    sampling: &SamplingPolicy,
) -> (Catalog, Vec<String>)
where
    S: MailSource + ?Sized,
{
    let mut catalog = Catalog::default();
    let mut failed = Vec::new();
    for spec in specs {
        let spec = match spec {
            Ok(spec) => spec,
            Err(err) => {
                error!("{err}");
                failed.push(failed_table_name(&err));
                continue;
            }
        };
        match discover_table(source, &spec, tracker, sampling) {
            Ok(entry) => catalog.streams.push(entry),
            Err(err) => {
                error!("Table '{}' failed: {err}", spec.name);
                failed.push(spec.name.clone());
            }
        }
    }
    (catalog, failed)
}

fn discover_table<S>(
    source: &S,
    spec: &TableSpec,
    tracker: &CheckpointTracker,
    sampling: &SamplingPolicy,
) -> Result<CatalogEntry, TapError>
where
    S: MailSource + ?Sized,
{
    let files = source.list_candidate_files(spec, tracker.current(&spec.name))?;
    if files.is_empty() {
        warn!("No files found for table '{}'", spec.name);
    }
    let schema = finalize(spec, &sample_table(source, spec, &files, sampling)?)?;
    Ok(CatalogEntry::from_schema(&schema))
}
