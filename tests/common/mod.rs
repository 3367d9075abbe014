#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use mail_csv_tap::{
    config::{TableConfig, TableSpec},
    error::TapError,
    mailbox::{FileHandle, MailSource},
};
use serde_json::Value;
use tempfile::{TempDir, tempdir};

pub const ACCOUNT: &str = "reports@example.com";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn fixture_bytes(name: &str) -> Vec<u8> {
    fs::read(fixture_path(name)).expect("read fixture")
}

/// Packs `contents` as the only file of a zip archive.
pub fn zipped(entry: &str, contents: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(entry, zip::write::FileOptions::default())
        .expect("start zip entry");
    writer.write_all(contents).expect("write zip entry");
    writer.finish().expect("finish zip").into_inner()
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Writes a tap config pointing at `mailbox.json` in the workspace.
    pub fn write_config(&self, tables: Value) -> PathBuf {
        let config = serde_json::json!({
            "email_address": ACCOUNT,
            "start_date": "2020-01-01T00:00:00Z",
            "mailbox": "mailbox.json",
            "tables": tables,
        });
        self.write("tap.json", &config.to_string())
    }
}

pub fn table_spec(value: Value) -> TableSpec {
    let config: TableConfig = serde_json::from_value(value).expect("table config");
    TableSpec::try_from(config).expect("table spec")
}

pub fn day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, day, 12, 0, 0).unwrap()
}

pub fn rows(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect()
}

/// Parses captured message output, one JSON value per line.
pub fn messages(output: &[u8]) -> Vec<Value> {
    String::from_utf8(output.to_vec())
        .expect("utf-8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json message"))
        .collect()
}

pub fn of_type<'a>(messages: &'a [Value], kind: &str) -> Vec<&'a Value> {
    messages
        .iter()
        .filter(|message| message["type"] == kind)
        .collect()
}

struct MemoryFile {
    handle: FileHandle,
    contents: Vec<u8>,
    broken: bool,
}

/// An in-memory mailbox. Files match a table by its pattern on their name.
#[derive(Default)]
pub struct MemoryMailbox {
    files: Vec<MemoryFile>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, timestamp: DateTime<Utc>, contents: &str) -> Self {
        self.push(name, timestamp, contents.as_bytes().to_vec(), false);
        self
    }

    pub fn with_bytes(mut self, name: &str, timestamp: DateTime<Utc>, contents: Vec<u8>) -> Self {
        self.push(name, timestamp, contents, false);
        self
    }

    /// A file whose reader fails once `contents` have been read.
    pub fn with_broken_file(
        mut self,
        name: &str,
        timestamp: DateTime<Utc>,
        contents: &str,
    ) -> Self {
        self.push(name, timestamp, contents.as_bytes().to_vec(), true);
        self
    }

    fn push(&mut self, name: &str, timestamp: DateTime<Utc>, contents: Vec<u8>, broken: bool) {
        self.files.push(MemoryFile {
            handle: FileHandle {
                name: name.to_string(),
                timestamp,
                source_address: ACCOUNT.to_string(),
                location: PathBuf::from(name),
                message_id: format!("msg-{}", self.files.len()),
            },
            contents,
            broken,
        });
    }
}

impl MailSource for MemoryMailbox {
    fn list_candidate_files(
        &self,
        spec: &TableSpec,
        since: DateTime<Utc>,
    ) -> Result<Vec<FileHandle>, TapError> {
        let mut handles: Vec<FileHandle> = self
            .files
            .iter()
            .map(|file| &file.handle)
            .filter(|handle| handle.timestamp > since && spec.pattern.is_match(&handle.name))
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
        Ok(handles)
    }

    fn open(&self, file: &FileHandle) -> Result<Box<dyn Read>, TapError> {
        let stored = self
            .files
            .iter()
            .find(|candidate| candidate.handle == *file)
            .ok_or_else(|| {
                TapError::source_io(
                    &file.name,
                    io::Error::new(io::ErrorKind::NotFound, "no such file"),
                )
            })?;
        let cursor = Cursor::new(stored.contents.clone());
        if stored.broken {
            Ok(Box::new(FailingReader { inner: cursor }))
        } else {
            Ok(Box::new(cursor))
        }
    }
}

struct FailingReader {
    inner: Cursor<Vec<u8>>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "download interrupted"))
        } else {
            Ok(read)
        }
    }
}

/// A writer whose every write fails, standing in for a closed stdout.
pub struct ClosedPipe;

impl Write for ClosedPipe {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
