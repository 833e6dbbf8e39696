use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{Sink, SinkError};
use crate::record::Record;

/// Appends one JSON line per record to a single file.
///
/// The file (and its parent directory) is created on first publish.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    fn open(&self) -> Result<File, SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(OpenOptions::new().create(true).append(true).open(&self.path)?)
    }
}

impl Sink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn publish(&self, record: &Record) -> Result<(), SinkError> {
        let mut line = record.to_json()?;
        line.push('\n');

        let mut guard = self
            .file
            .lock()
            .map_err(|_| SinkError::Io(std::io::Error::other("file sink lock poisoned")))?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(line.as_bytes()) {
                *guard = None;
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_lines_and_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/audit.log");
        let sink = FileSink::new(path.clone());

        let mut record = Record::default();
        record.method.push_str("GET");
        sink.publish(&record).unwrap();
        record.method.clear();
        record.method.push_str("POST");
        sink.publish(&record).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["method"], "POST");
    }
}
