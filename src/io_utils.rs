//! Byte-level helpers shared by the row readers.
//!
//! - **Encoding**: labels resolve through `encoding_rs`, defaulting to UTF-8.
//!   Fields are decoded one at a time so the reader itself stays byte-based.
//! - **Reader construction**: CSV readers are always header-less and
//!   flexible; header handling happens in [`crate::header`].
//! - **Archives**: compressed files are unpacked in memory, first entry only.

use std::io::{Cursor, Read};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

use crate::config::Quoting;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Rows may have any width; short and long rows are reconciled later.
pub fn open_csv_reader<R>(reader: R, delimiter: u8, quoting: Quoting) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .quoting(quoting.honours_quotes())
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Returns the name and contents of the first regular file in a zip archive.
pub fn unzip_first_entry(bytes: Vec<u8>) -> Result<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("Opening zip archive")?;
    for idx in 0..archive.len() {
        let mut entry = archive
            .by_index(idx)
            .with_context(|| format!("Reading zip entry #{idx}"))?;
        if !entry.is_file() {
            continue;
        }
        let name = entry.name().to_string();
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .with_context(|| format!("Extracting zip entry '{name}'"))?;
        return Ok((name, contents));
    }
    Err(anyhow!("Zip archive contains no files"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default();
        writer.add_directory("nested/", options).unwrap();
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn resolve_encoding_defaults_to_utf8() {
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
        assert_eq!(resolve_encoding(Some(" latin1 ")).unwrap().name(), "windows-1252");
        assert!(resolve_encoding(Some("nope")).is_err());
    }

    #[test]
    fn csv_reader_is_flexible_and_headerless() {
        let data = "a,b\n1,2,3\n4\n";
        let mut reader = open_csv_reader(data.as_bytes(), b',', Quoting::Minimal);
        let widths: Vec<usize> = reader
            .byte_records()
            .map(|record| record.unwrap().len())
            .collect();
        assert_eq!(widths, vec![2, 3, 1]);
    }

    #[test]
    fn quote_none_keeps_quote_characters() {
        let data = "\"a\",b\n";
        let mut reader = open_csv_reader(data.as_bytes(), b',', Quoting::None);
        let record = reader.byte_records().next().unwrap().unwrap();
        let decoded = decode_record(&record, UTF_8).unwrap();
        assert_eq!(decoded, vec!["\"a\"", "b"]);
    }

    #[test]
    fn decode_bytes_uses_the_configured_encoding() {
        let bytes = [0x63, 0x61, 0x66, 0xE9];
        assert_eq!(
            decode_bytes(&bytes, encoding_rs::WINDOWS_1252).unwrap(),
            "café"
        );
        assert!(decode_bytes(&bytes, UTF_8).is_err());
    }

    #[test]
    fn unzip_skips_directories() {
        let archive = zip_with(&[("nested/report.csv", b"id\n1\n"), ("other.csv", b"x\n")]);
        let (name, contents) = unzip_first_entry(archive).unwrap();
        assert_eq!(name, "nested/report.csv");
        assert_eq!(contents, b"id\n1\n");
    }

    #[test]
    fn unzip_rejects_garbage() {
        assert!(unzip_first_entry(b"not a zip".to_vec()).is_err());
    }
}
