//! File reading utilities: incremental deltas and last-N-line snapshots.

use crate::error::{Error, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// The last complete lines of the file as of some offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub lines: Vec<String>,
    /// Position right after the last complete line; incremental reads resume here.
    pub offset: u64,
}

/// Complete lines appended between two offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub lines: Vec<String>,
    pub offset: u64,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Outcome of an incremental read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaRead {
    Lines(Delta),
    /// The file is now shorter than the offset it was read from.
    Truncated { size: u64 },
}

/// Stateless reader over one log file.
///
/// The reader keeps no offset of its own; callers pass the position they want
/// to resume from and store the one that comes back.
#[derive(Debug, Clone)]
pub struct TailReader {
    path: PathBuf,
    separator: String,
    block_size: usize,
}

impl TailReader {
    pub fn new<P: AsRef<Path>>(path: P, separator: &str, block_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            separator: separator.to_string(),
            block_size: block_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last `n` complete lines at the current end of the file.
    pub async fn snapshot(&self, n: usize) -> Result<Snapshot> {
        let (mut file, size) = self.open().await?;
        self.scan_back(&mut file, size, n).await
    }

    /// Last `n` complete lines ending at or before `end`.
    ///
    /// If the file has shrunk below `end` it was truncated after that offset was
    /// recorded; the snapshot is empty and the reset that follows carries the
    /// new lines.
    pub async fn snapshot_at(&self, end: u64, n: usize) -> Result<Snapshot> {
        let (mut file, size) = self.open().await?;
        if detect_file_truncation(size, end) {
            return Ok(Snapshot {
                lines: Vec::new(),
                offset: size,
            });
        }
        self.scan_back(&mut file, end, n).await
    }

    /// Reads backward from `end` in `block_size` steps and stops as soon as
    /// enough line boundaries are buffered, so large files are never loaded
    /// whole. Each block is scanned once.
    async fn scan_back(&self, file: &mut File, end: u64, n: usize) -> Result<Snapshot> {
        let sep = self.separator.as_bytes();
        let mut pos = end;
        // Later blocks first.
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let mut found = 0;

        loop {
            // One boundary more than `n` pins the start of the first wanted line.
            while pos > 0 && found <= n {
                let step = (self.block_size as u64).min(pos);
                pos -= step;
                let block = self.read_range(file, pos, step).await?;
                found += count_separators_starting_in(&block, &blocks, sep);
                blocks.push(block);
            }

            let total = blocks.iter().map(Vec::len).sum();
            let mut data = Vec::with_capacity(total);
            for block in blocks.iter().rev() {
                data.extend_from_slice(block);
            }

            let (mut lines, consumed) = split_complete_lines(&data, &self.separator);
            // Self-overlapping separators can be over-counted per block; keep
            // reading until the full parse agrees.
            if pos == 0 || lines.len() > n {
                let skip = lines.len().saturating_sub(n);
                lines.drain(..skip);
                return Ok(Snapshot {
                    lines,
                    offset: pos + consumed as u64,
                });
            }
            found = lines.len();
        }
    }

    /// Complete lines appended since `from`.
    ///
    /// A trailing fragment without a separator is left in the file and the
    /// returned offset stops in front of it, so it is read again once finished.
    pub async fn delta(&self, from: u64) -> Result<DeltaRead> {
        let (mut file, size) = self.open().await?;

        if detect_file_truncation(size, from) {
            return Ok(DeltaRead::Truncated { size });
        }

        let bytes_to_read = match calculate_bytes_to_read(size, from) {
            Some(bytes) => bytes,
            None => {
                return Ok(DeltaRead::Lines(Delta {
                    lines: Vec::new(),
                    offset: from,
                }));
            }
        };

        let buf = self.read_range(&mut file, from, bytes_to_read).await?;
        let (lines, consumed) = split_complete_lines(&buf, &self.separator);

        Ok(DeltaRead::Lines(Delta {
            lines,
            offset: from + consumed as u64,
        }))
    }

    /// Unterminated text after the last complete line following `from`, as a
    /// one-line delta whose offset is the end of the fragment's bytes.
    pub async fn remainder(&self, from: u64) -> Result<Option<Delta>> {
        let (mut file, size) = self.open().await?;
        let Some(bytes_to_read) = calculate_bytes_to_read(size, from) else {
            return Ok(None);
        };

        let buf = self.read_range(&mut file, from, bytes_to_read).await?;
        let (_, consumed) = split_complete_lines(&buf, &self.separator);
        let tail = &buf[consumed..];
        if tail.is_empty() {
            return Ok(None);
        }

        Ok(Some(Delta {
            lines: vec![decode_line(tail, &self.separator)],
            offset: from + buf.len() as u64,
        }))
    }

    async fn open(&self) -> Result<(File, u64)> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| Error::source_unavailable(&self.path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| Error::source_unavailable(&self.path, e))?;
        Ok((file, metadata.len()))
    }

    async fn read_range(&self, file: &mut File, from: u64, len: u64) -> Result<Vec<u8>> {
        file.seek(SeekFrom::Start(from))
            .await
            .map_err(|e| Error::source_unavailable(&self.path, e))?;

        let mut buf = Vec::with_capacity(len as usize);
        file.take(len)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::source_unavailable(&self.path, e))?;
        Ok(buf)
    }
}

/// Split on `separator`, returning the complete lines and the number of bytes
/// they span (separators included). Bytes after the last separator are ignored.
fn split_complete_lines(data: &[u8], separator: &str) -> (Vec<String>, usize) {
    let sep = separator.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;

    while let Some(found) = find_separator(&data[start..], sep) {
        let end = start + found;
        lines.push(decode_line(&data[start..end], separator));
        start = end + sep.len();
    }

    (lines, start)
}

fn find_separator(haystack: &[u8], sep: &[u8]) -> Option<usize> {
    match sep {
        [byte] => haystack.iter().position(|b| b == byte),
        _ => haystack.windows(sep.len()).position(|window| window == sep),
    }
}

/// Separators that start inside `block`, including ones that run on into the
/// blocks after it. `later` holds those blocks, nearest last.
fn count_separators_starting_in(block: &[u8], later: &[Vec<u8>], sep: &[u8]) -> usize {
    let wanted = block.len() + sep.len() - 1;
    let mut window = block.to_vec();
    for next in later.iter().rev() {
        if window.len() >= wanted {
            break;
        }
        let take = (wanted - window.len()).min(next.len());
        window.extend_from_slice(&next[..take]);
    }

    let mut count = 0;
    let mut start = 0;
    while let Some(found) = find_separator(&window[start..], sep) {
        if start + found >= block.len() {
            break;
        }
        count += 1;
        start += found + sep.len();
    }
    count
}

/// Lossy UTF-8 so one bad byte cannot stall the tail. CRLF endings are
/// normalised when splitting on a bare newline.
fn decode_line(bytes: &[u8], separator: &str) -> String {
    let bytes = match (separator, bytes.last()) {
        ("\n", Some(b'\r')) => &bytes[..bytes.len() - 1],
        _ => bytes,
    };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Detect if the file was truncated by comparing current size with last position
fn detect_file_truncation(current_size: u64, last_position: u64) -> bool {
    current_size < last_position
}

/// Calculate bytes to read based on current size and last position
fn calculate_bytes_to_read(current_size: u64, last_position: u64) -> Option<u64> {
    if current_size <= last_position {
        None
    } else {
        Some(current_size - last_position)
    }
}
