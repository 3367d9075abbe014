//! Raw row sources: CSV and Excel files turned into rows of cell text.
//!
//! Neither reader knows about headers; the first row comes back like any
//! other and [`crate::header`] decides what it is.

use std::io::{self, Cursor, Read};

use calamine::{Data, DataType, Reader, open_workbook_auto_from_rs};
use encoding_rs::Encoding;
use log::debug;

use crate::{
    config::{FileFormat, TableSpec},
    error::TapError,
    io_utils,
    mailbox::{FileHandle, MailSource},
};

pub trait RowSource {
    fn next_row(&mut self) -> Result<Option<Vec<String>>, TapError>;
}

pub struct CsvRowSource {
    file: String,
    reader: csv::Reader<Box<dyn Read>>,
    record: csv::ByteRecord,
    encoding: &'static Encoding,
}

impl CsvRowSource {
    pub fn new(file: &str, input: Box<dyn Read>, spec: &TableSpec) -> Self {
        Self {
            file: file.to_string(),
            reader: io_utils::open_csv_reader(input, spec.delimiter, spec.quoting),
            record: csv::ByteRecord::new(),
            encoding: spec.encoding,
        }
    }
}

impl RowSource for CsvRowSource {
    fn next_row(&mut self) -> Result<Option<Vec<String>>, TapError> {
        let more = self
            .reader
            .read_byte_record(&mut self.record)
            .map_err(|err| TapError::invalid_source(&self.file, err))?;
        if !more {
            return Ok(None);
        }
        io_utils::decode_record(&self.record, self.encoding)
            .map(Some)
            .map_err(|err| invalid_data(&self.file, err))
    }
}

/// Workbooks are loaded whole; rows are handed out from the chosen sheet.
pub struct ExcelRowSource {
    rows: std::vec::IntoIter<Vec<String>>,
}

impl ExcelRowSource {
    pub fn new(file: &str, bytes: Vec<u8>, worksheet: Option<&str>) -> Result<Self, TapError> {
        let mut workbook =
            open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|err| invalid_data(file, err))?;
        let sheet = match worksheet {
            Some(name) => name.to_string(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| invalid_data(file, "workbook has no worksheets"))?,
        };
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|err| invalid_data(file, format!("worksheet '{sheet}': {err}")))?;
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|cells| {
                let used = cells
                    .iter()
                    .rposition(|cell| !matches!(cell, Data::Empty))
                    .map_or(0, |last| last + 1);
                cells[..used].iter().map(cell_text).collect()
            })
            .collect();
        Ok(Self {
            rows: rows.into_iter(),
        })
    }
}

impl RowSource for ExcelRowSource {
    fn next_row(&mut self) -> Result<Option<Vec<String>>, TapError> {
        Ok(self.rows.next())
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => text.clone(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) => {
            if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
                (*value as i64).to_string()
            } else {
                value.to_string()
            }
        }
        Data::Bool(value) => value.to_string(),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|value| value.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default(),
        Data::Error(err) => err.to_string(),
    }
}

fn invalid_data(file: &str, err: impl std::fmt::Display) -> TapError {
    TapError::source_io(
        file,
        io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
    )
}

/// Opens the raw rows of a discovered file according to its table's format.
pub fn open_rows<S>(
    source: &S,
    file: &FileHandle,
    spec: &TableSpec,
) -> Result<Box<dyn RowSource>, TapError>
where
    S: MailSource + ?Sized,
{
    let mut input = source.open(file)?;
    if spec.unzip {
        let mut archive = Vec::new();
        input
            .read_to_end(&mut archive)
            .map_err(|err| TapError::source_io(&file.name, err))?;
        let (entry, contents) = io_utils::unzip_first_entry(archive)
            .map_err(|err| invalid_data(&file.name, format!("{err:#}")))?;
        debug!("Using archive entry '{entry}' of '{}'", file.name);
        input = Box::new(Cursor::new(contents));
    }
    match spec.format {
        FileFormat::Csv => Ok(Box::new(CsvRowSource::new(&file.name, input, spec))),
        FileFormat::Excel => {
            let mut bytes = Vec::new();
            input
                .read_to_end(&mut bytes)
                .map_err(|err| TapError::source_io(&file.name, err))?;
            Ok(Box::new(ExcelRowSource::new(
                &file.name,
                bytes,
                spec.worksheet_name.as_deref(),
            )?))
        }
    }
}
