//! Run log persistence
//!
//! Writes the full output of a program run to a log file for post-mortem
//! analysis. The RunResponse only carries a short tail of stderr; the log
//! keeps everything.
//!
//! Location: `{log_dir}/{label}-{timestamp}.log`

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::Result;

/// Which stream a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

/// Get the log file path for a run
pub fn log_path_for_run(log_dir: &Path, label: &str) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    log_dir.join(format!("{}-{}.log", label, stamp))
}

/// Logger for a single program run
///
/// Lines are prefixed with the stream they came from so interleaved
/// stdout/stderr can be told apart when reading the file back.
pub struct RunLogger {
    file: File,
    path: PathBuf,
    bytes_written: usize,
}

impl RunLogger {
    /// Create the log directory if needed and open a fresh log file
    pub fn create(log_dir: &Path, label: &str) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_path_for_run(log_dir, label);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::debug!("Run logger created at {:?}", path);

        Ok(Self {
            file,
            path,
            bytes_written: 0,
        })
    }

    /// Append a chunk of program output
    pub fn write(&mut self, source: OutputSource, data: &[u8]) -> Result<()> {
        let tag: &[u8] = match source {
            OutputSource::Stdout => b"[stdout] ",
            OutputSource::Stderr => b"[stderr] ",
        };
        self.file.write_all(tag)?;
        self.file.write_all(data)?;
        if !data.ends_with(b"\n") {
            self.file.write_all(b"\n")?;
        }
        self.bytes_written += data.len();
        Ok(())
    }

    /// Flush buffered writes to disk
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Program output bytes written, excluding tags
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        // Best-effort flush on drop
        let _ = self.file.flush();
        tracing::debug!(
            "Run log {:?} closed ({} bytes written)",
            self.path,
            self.bytes_written
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_logger_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::create(&dir.path().join("logs"), "dev/stack").unwrap();
        logger.write(OutputSource::Stdout, b"hello\n").unwrap();
        logger.write(OutputSource::Stderr, b"oops").unwrap();
        logger.flush().unwrap();
        assert_eq!(logger.bytes_written(), 10);

        let name = logger.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("dev_stack-"));

        let contents = fs::read_to_string(logger.path()).unwrap();
        assert_eq!(contents, "[stdout] hello\n[stderr] oops\n");
    }
}
