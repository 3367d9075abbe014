//! Per-table replication bookmarks.
//!
//! A bookmark is the timestamp of the newest file whose records were all
//! handed to the output. It only moves forward, and it is only moved after a
//! file completes.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_since: Option<DateTime<Utc>>,
}

/// Persisted state: table name to bookmark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(BTreeMap<String, TableState>);

impl State {
    pub fn bookmark(&self, table: &str) -> Option<DateTime<Utc>> {
        self.0.get(table).and_then(|entry| entry.modified_since)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening state file {path:?}"))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing state JSON from {path:?}"))
    }

    /// Writes to a sibling temp file first so readers never see a torn file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp = Path::new(&temp);
        {
            let file =
                File::create(temp).with_context(|| format!("Creating state file {temp:?}"))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self).context("Serializing state")?;
            writer
                .flush()
                .with_context(|| format!("Writing state file {temp:?}"))?;
        }
        fs::rename(temp, path).with_context(|| format!("Replacing state file {path:?}"))
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointTracker {
    start_date: DateTime<Utc>,
    state: State,
}

impl CheckpointTracker {
    pub fn new(start_date: DateTime<Utc>, state: State) -> Self {
        Self { start_date, state }
    }

    /// The table's bookmark, or the configured start date when it has none.
    pub fn current(&self, table: &str) -> DateTime<Utc> {
        self.state.bookmark(table).unwrap_or(self.start_date)
    }

    /// Moves the bookmark forward to `timestamp`. Older timestamps are ignored.
    pub fn advance(&mut self, table: &str, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let entry = self.state.0.entry(table.to_string()).or_default();
        match entry.modified_since {
            Some(existing) if existing >= timestamp => {
                debug!("Bookmark for '{table}' stays at {existing}; ignoring {timestamp}");
                existing
            }
            _ => {
                entry.modified_since = Some(timestamp);
                timestamp
            }
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }
}
