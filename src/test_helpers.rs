//! Test utilities for creating temporary log files and collecting feed output.

use crate::sink::FeedEvent;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};

pub struct TempLogFile {
    pub path: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TempLogFile {
    /// Create a new, empty temporary log file
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("test.log");

        File::create(&path)?;

        Ok(Self {
            path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a temporary log file holding the given lines
    pub fn with_lines<S: AsRef<str>>(lines: &[S]) -> std::io::Result<Self> {
        let temp_file = Self::new()?;
        temp_file.append_lines(lines)?;
        Ok(temp_file)
    }

    /// Append newline-terminated lines
    pub fn append_lines<S: AsRef<str>>(&self, lines: &[S]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        for line in lines {
            writeln!(file, "{}", line.as_ref())?;
        }
        file.flush()?;
        Ok(())
    }

    /// Append raw text with no trailing newline
    pub fn append_raw(&self, content: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Truncate the file (simulate log rotation)
    pub fn truncate(&self) -> std::io::Result<()> {
        File::create(&self.path)?;
        Ok(())
    }

    /// Delete the file (simulate the source going away)
    pub fn remove(&self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }

    /// Current size in bytes
    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pull events from a feed until `count` arrived, the feed ended, or `timeout` passed.
pub async fn collect_events<S>(stream: &mut S, count: usize, timeout: Duration) -> Vec<FeedEvent>
where
    S: Stream<Item = FeedEvent> + Unpin,
{
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    while events.len() < count {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) | Err(_) => break,
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_log_file_creation() {
        let temp_file = TempLogFile::new().unwrap();
        assert!(temp_file.path().exists());
        assert_eq!(temp_file.len(), 0);
    }

    #[test]
    fn test_with_lines_and_append() {
        let temp_file = TempLogFile::with_lines(&["line 1"]).unwrap();
        temp_file.append_lines(&["line 2"]).unwrap();
        temp_file.append_raw("tail").unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(content, "line 1\nline 2\ntail");
        assert_eq!(temp_file.len(), 18);
    }

    #[test]
    fn test_truncate_and_remove() {
        let temp_file = TempLogFile::with_lines(&["initial content"]).unwrap();
        temp_file.truncate().unwrap();
        assert_eq!(std::fs::read_to_string(temp_file.path()).unwrap(), "");

        temp_file.remove().unwrap();
        assert!(!temp_file.path().exists());
    }
}
