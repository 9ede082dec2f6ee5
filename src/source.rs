use crate::models::Message;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

#[derive(Deserialize)]
struct RawMessage {
    body: String,
    message_id: String,
    #[serde(default)]
    timestamp: Option<f64>,
}

/// Messages stored one JSON object per line: `{"body", "message_id", "timestamp"}`.
///
/// Iterating yields every line that parses; unreadable lines are logged and skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    line_number: usize,
    skipped: usize,
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .with_context(|| format!("Failed to open message source: {}", path.as_ref().display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
            skipped: 0,
        }
    }

    /// Lines skipped so far because they could not be read or parsed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        let mut line = String::new();
        loop {
            line.clear();
            self.line_number += 1;
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                // Invalid UTF-8 is consumed by read_line, so the next call moves on
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    log::warn!("[source] line {}: not valid UTF-8, skipping", self.line_number);
                    self.skipped += 1;
                    continue;
                }
                Err(e) => {
                    log::error!("[source] line {}: read failed, stopping: {e}", self.line_number);
                    return None;
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<RawMessage>(trimmed) {
                Ok(raw) => return Some(Message::new(raw.body, raw.message_id, raw.timestamp)),
                Err(e) => {
                    log::warn!("[source] line {}: skipping unparsable message: {e}", self.line_number);
                    self.skipped += 1;
                }
            }
        }
    }
}
