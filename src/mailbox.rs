//! File discovery: the mailbox boundary.
//!
//! [`MailSource`] is what the driver talks to. [`ManifestMailbox`] implements
//! it over a mailbox export, a JSON manifest listing messages with their
//! attachments and body links saved next to it on disk.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Deserialize;

use crate::{
    config::{SourceKind, TableSpec},
    error::TapError,
};

/// One discovered source artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub source_address: String,
    pub location: PathBuf,
    pub message_id: String,
}

pub trait MailSource {
    /// Files for `spec` newer than `since`, oldest first. Files stamped exactly
    /// `since` count as already processed.
    fn list_candidate_files(
        &self,
        spec: &TableSpec,
        since: DateTime<Utc>,
    ) -> Result<Vec<FileHandle>, TapError>;

    fn open(&self, file: &FileHandle) -> Result<Box<dyn Read>, TapError>;
}

#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    #[serde(default)]
    messages: Vec<MessageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageEntry {
    id: String,
    /// Milliseconds since the epoch.
    internal_date: i64,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    attachments: Vec<AttachmentEntry>,
    #[serde(default)]
    links: Vec<LinkEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct AttachmentEntry {
    name: String,
    path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct LinkEntry {
    url: String,
    path: PathBuf,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone)]
struct Message {
    id: String,
    timestamp: DateTime<Utc>,
    from: Option<String>,
    subject: Option<String>,
    attachments: Vec<AttachmentEntry>,
    links: Vec<LinkEntry>,
}

#[derive(Debug, Clone)]
pub struct ManifestMailbox {
    email_address: String,
    root: PathBuf,
    messages: Vec<Message>,
}

impl ManifestMailbox {
    pub fn load(path: &Path, email_address: &str) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening mailbox manifest {path:?}"))?;
        let manifest: Manifest = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing mailbox manifest {path:?}"))?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut messages = manifest
            .messages
            .into_iter()
            .map(|entry| -> Result<Message> {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(entry.internal_date)
                    .with_context(|| {
                        format!(
                            "Message '{}' has out-of-range internal_date {}",
                            entry.id, entry.internal_date
                        )
                    })?;
                Ok(Message {
                    id: entry.id,
                    timestamp,
                    from: entry.from,
                    subject: entry.subject,
                    attachments: entry.attachments,
                    links: entry.links,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(Self {
            email_address: email_address.to_string(),
            root,
            messages,
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn handle(&self, message: &Message, name: String, path: &Path) -> FileHandle {
        FileHandle {
            name,
            timestamp: message.timestamp,
            source_address: self.email_address.clone(),
            location: self.resolve(path),
            message_id: message.id.clone(),
        }
    }
}

/// The last path segment of a link, without its query string or fragment.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let without_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let (_, path) = without_scheme.split_once('/')?;
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

impl MailSource for ManifestMailbox {
    fn list_candidate_files(
        &self,
        spec: &TableSpec,
        since: DateTime<Utc>,
    ) -> Result<Vec<FileHandle>, TapError> {
        let mut files = Vec::new();
        for message in self.messages.iter().filter(|m| m.timestamp > since) {
            debug!(
                "Message {} from {} ({})",
                message.id,
                message.from.as_deref().unwrap_or("unknown sender"),
                message.subject.as_deref().unwrap_or("no subject")
            );
            match spec.source {
                SourceKind::Attachment => {
                    for attachment in &message.attachments {
                        if spec.pattern.is_match(&attachment.name) {
                            files.push(self.handle(message, attachment.name.clone(), &attachment.path));
                        }
                    }
                }
                SourceKind::Url => {
                    for link in &message.links {
                        if !spec.pattern.is_match(&link.url) {
                            continue;
                        }
                        let name = link
                            .name
                            .clone()
                            .or_else(|| file_name_from_url(&link.url));
                        match name {
                            Some(name) => files.push(self.handle(message, name, &link.path)),
                            None => warn!(
                                "Skipping link {} in message {}: no file name could be derived",
                                link.url, message.id
                            ),
                        }
                    }
                }
            }
        }
        Ok(files)
    }

    fn open(&self, file: &FileHandle) -> Result<Box<dyn Read>, TapError> {
        let handle = File::open(&file.location)
            .map_err(|err| TapError::source_io(&file.name, err))?;
        Ok(Box::new(BufReader::new(handle)))
    }
}
