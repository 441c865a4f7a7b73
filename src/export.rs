//! # Export Module
//!
//! The sink boundary for saving finished text blobs (the rendered activity
//! log). The core derives a timestamped filename and supplies content; how
//! the blob is delivered belongs to the sink.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Local;
use log::info;

use crate::error::Result;

/// Receives a finished blob under a suggested filename.
#[cfg_attr(test, mockall::automock)]
pub trait ExportSink {
    /// Delivers `content` under `filename`.
    ///
    /// # Errors
    ///
    /// Delivery failures, reported back to the session for logging.
    fn export_blob(&self, filename: &str, content: &str) -> Result<()>;
}

/// Timestamp-derived export filename, e.g. `serial_data_2026-08-07T14-03-59.txt`.
#[must_use]
pub fn export_filename() -> String {
    format!(
        "serial_data_{}.txt",
        Local::now().format("%Y-%m-%dT%H-%M-%S")
    )
}

/// Sink that writes blobs into a directory on the local filesystem.
pub struct FileExportSink {
    directory: PathBuf,
}

impl FileExportSink {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileExportSink {
            directory: directory.into(),
        }
    }
}

impl ExportSink for FileExportSink {
    fn export_blob(&self, filename: &str, content: &str) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(filename);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        info!("exported {} bytes to {}", content.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_filename_shape() {
        let name = export_filename();
        assert!(name.starts_with("serial_data_"));
        assert!(name.ends_with(".txt"));
        assert!(!name.contains(':'));
    }

    #[test]
    fn test_file_sink_writes_blob() {
        let dir = std::env::temp_dir().join("serial_probe_export_test");
        let sink = FileExportSink::new(&dir);
        sink.export_blob("blob.txt", "one\ntwo").unwrap();
        let written = std::fs::read_to_string(dir.join("blob.txt")).unwrap();
        assert_eq!(written, "one\ntwo");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_mock_sink_receives_content() {
        let mut sink = MockExportSink::new();
        sink.expect_export_blob()
            .withf(|name, content| name.ends_with(".txt") && content == "payload")
            .times(1)
            .returning(|_, _| Ok(()));
        sink.export_blob(&export_filename(), "payload").unwrap();
    }
}
