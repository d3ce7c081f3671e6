//! Append-structured persistence.
//!
//! Every component owns one journal per record type: an append-only file of
//! JSON lines. Startup replays the whole file to rebuild in-memory state;
//! nothing is ever rewritten in place. Records that fail to decode are
//! skipped on load so one bad line cannot take the store down.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One append-only record log backed by a JSON-lines file.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Open a journal at `path`, creating parent directories as needed.
    /// The file itself is created lazily on first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a JSON line.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Replay every record in append order.
    ///
    /// A missing file is an empty journal. Undecodable lines are skipped
    /// with a warning rather than aborting the replay.
    pub fn load_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, JournalError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping undecodable journal record"
                    );
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: u32,
        label: String,
    }

    #[test]
    fn test_append_then_load_all() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("entries.jsonl")).unwrap();

        journal
            .append(&Entry {
                id: 1,
                label: "first".into(),
            })
            .unwrap();
        journal
            .append(&Entry {
                id: 2,
                label: "second".into(),
            })
            .unwrap();

        let entries: Vec<Entry> = journal.load_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 1);
        assert_eq!(entries[1].label, "second");
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("nothing.jsonl")).unwrap();
        let entries: Vec<Entry> = journal.load_all().unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.jsonl");
        let journal = Journal::open(&path).unwrap();

        journal
            .append(&Entry {
                id: 1,
                label: "kept".into(),
            })
            .unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{ this is not json\n")
            .unwrap();
        journal
            .append(&Entry {
                id: 2,
                label: "also kept".into(),
            })
            .unwrap();

        let entries: Vec<Entry> = journal.load_all().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("log.jsonl");
        let journal = Journal::open(&nested).unwrap();
        journal
            .append(&Entry {
                id: 9,
                label: "deep".into(),
            })
            .unwrap();
        assert!(nested.exists());
    }
}
