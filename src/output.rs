//! Line-oriented message output.
//!
//! One JSON object per line: `SCHEMA` before a table's records, `RECORD` per
//! row and `STATE` after each completed file. Every message is flushed as it
//! is written so a consumer never acts on a bookmark whose records are still
//! buffered.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::{checkpoint::State, error::TapError, normalize::NormalizedRecord};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message<'a> {
    Schema {
        stream: &'a str,
        schema: Value,
        key_properties: &'a [String],
    },
    Record {
        stream: &'a str,
        record: &'a NormalizedRecord,
    },
    State {
        value: &'a State,
    },
}

pub struct MessageWriter<W: Write> {
    writer: W,
    records_written: usize,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            records_written: 0,
        }
    }

    pub fn write(&mut self, message: &Message<'_>) -> Result<(), TapError> {
        self.write_line(message).map_err(TapError::Output)?;
        if matches!(message, Message::Record { .. }) {
            self.records_written += 1;
        }
        Ok(())
    }

    fn write_line(&mut self, message: &Message<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_are_tagged_json_lines() {
        let mut writer = MessageWriter::new(Vec::new());
        let keys = vec!["id".to_string()];
        writer
            .write(&Message::Schema {
                stream: "orders",
                schema: json!({ "type": "object", "properties": {} }),
                key_properties: &keys,
            })
            .unwrap();
        writer
            .write(&Message::State {
                value: &State::default(),
            })
            .unwrap();
        assert_eq!(writer.records_written(), 0);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines[0],
            json!({
                "type": "SCHEMA",
                "stream": "orders",
                "schema": { "type": "object", "properties": {} },
                "key_properties": ["id"]
            })
        );
        assert_eq!(lines[1], json!({ "type": "STATE", "value": {} }));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_are_output_errors() {
        let mut writer = MessageWriter::new(BrokenPipe);
        let err = writer
            .write(&Message::State {
                value: &State::default(),
            })
            .expect_err("broken pipe");
        assert!(err.aborts_run());
    }
}
