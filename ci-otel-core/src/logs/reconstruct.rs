//! Log line reconstruction
//!
//! Step logs are a stream of `<RFC3339[.fraction]Z> <message>` lines. Output
//! that spans several physical lines (stack traces, JSON dumps) continues on
//! lines without a timestamp; those fold into the open entry, newline-joined.
//!
//! ```text
//! 2023-01-01T12:00:00Z Step 1 started      -> open entry @12:00:00
//! extra context                            -> append
//! 2023-01-01T12:00:05Z Step 1 completed    -> flush, open entry @12:00:05
//! <eof>                                    -> flush
//! ```
//!
//! Reads are bounded: a physical line longer than the entry cap is skipped
//! without ever being held in memory whole.

use chrono::{DateTime, Utc};
use std::io::{self, BufRead};
use tracing::{error, warn};

use crate::config::DEFAULT_MAX_LOG_ENTRY_BYTES;

const BOM: &str = "\u{feff}";

/// Longest prefix of an orphaned line quoted in the warning
const ORPHAN_PREVIEW_CHARS: usize = 200;

/// One reconstructed log unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub step_number: i64,
}

/// Counters describing one reconstruction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconstructStats {
    pub entries: usize,
    pub orphaned_lines: usize,
    pub oversized_lines: usize,
    pub read_failed: bool,
}

/// Accumulator for the entry currently being built.
///
/// One builder may be reused across all files of a job; [`reconstruct`]
/// resets it at the start and end of every file.
#[derive(Debug)]
pub struct LogEntryBuilder {
    body: String,
    timestamp: Option<DateTime<Utc>>,
    step_number: i64,
    max_body_bytes: usize,
}

impl Default for LogEntryBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_ENTRY_BYTES)
    }
}

impl LogEntryBuilder {
    pub fn new(max_body_bytes: usize) -> Self {
        Self {
            body: String::new(),
            timestamp: None,
            step_number: 0,
            max_body_bytes,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Whether an entry is open
    pub fn is_open(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Drop any open entry, keeping the body allocation
    pub fn reset(&mut self) {
        self.body.clear();
        self.timestamp = None;
        self.step_number = 0;
    }

    fn open(&mut self, timestamp: DateTime<Utc>, step_number: i64, message: &str) {
        self.body.clear();
        self.body.push_str(message);
        self.timestamp = Some(timestamp);
        self.step_number = step_number;
    }

    /// Append a continuation line; `false` if it would exceed the cap
    fn append(&mut self, line: &str) -> bool {
        if self.body.len() + 1 + line.len() > self.max_body_bytes {
            return false;
        }
        self.body.push('\n');
        self.body.push_str(line);
        true
    }

    /// Flush the open entry, if any, and reset
    fn take(&mut self) -> Option<LogEntry> {
        let timestamp = self.timestamp.take()?;
        let entry = LogEntry {
            timestamp,
            body: std::mem::take(&mut self.body),
            step_number: self.step_number,
        };
        self.reset();
        Some(entry)
    }
}

/// Split a line into its leading timestamp and the message after it
pub fn parse_timestamp(line: &str) -> Option<(DateTime<Utc>, &str)> {
    let (token, rest) = line.split_once(' ')?;
    let parsed = DateTime::parse_from_rfc3339(token.trim()).ok()?;
    Some((parsed.with_timezone(&Utc), rest))
}

/// Fold one step log into entries, calling `emit` for each in order.
///
/// Never fails: an I/O error mid-stream flushes what was built so far, is
/// logged, and ends this file only.
pub fn reconstruct<R, F>(
    reader: R,
    step_number: i64,
    builder: &mut LogEntryBuilder,
    mut emit: F,
) -> ReconstructStats
where
    R: BufRead,
    F: FnMut(LogEntry),
{
    builder.reset();
    let mut stats = ReconstructStats::default();
    let mut lines = BoundedLines::new(reader, builder.max_body_bytes());
    let mut first_line = true;

    loop {
        let raw = match lines.next_line() {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(err) => {
                error!(step_number, "Error reading log file: {}", err);
                stats.read_failed = true;
                break;
            }
        };

        let bytes = match raw {
            RawLine::Text(bytes) => bytes,
            RawLine::Oversized(len) => {
                warn!(step_number, line_size = len, "Skipping line due to size limit");
                stats.oversized_lines += 1;
                first_line = false;
                continue;
            }
        };

        let decoded = String::from_utf8_lossy(bytes);
        let mut line: &str = &decoded;
        if first_line {
            line = line.strip_prefix(BOM).unwrap_or(line);
            first_line = false;
        }
        if line.is_empty() {
            continue;
        }

        match parse_timestamp(line) {
            Some((timestamp, message)) => {
                if let Some(entry) = builder.take() {
                    stats.entries += 1;
                    emit(entry);
                }
                builder.open(timestamp, step_number, message);
            }
            None if !builder.is_open() => {
                warn!(
                    step_number,
                    line = %preview(line),
                    "Orphaned log line without preceding timestamp"
                );
                stats.orphaned_lines += 1;
            }
            None => {
                if !builder.append(line) {
                    warn!(step_number, line_size = line.len(), "Skipping line due to size limit");
                    stats.oversized_lines += 1;
                }
            }
        }
    }

    if let Some(entry) = builder.take() {
        stats.entries += 1;
        emit(entry);
    }
    builder.reset();
    stats
}

/// Collect every entry of one step log
pub fn reconstruct_all<R: BufRead>(
    reader: R,
    step_number: i64,
    builder: &mut LogEntryBuilder,
) -> (Vec<LogEntry>, ReconstructStats) {
    let mut entries = Vec::new();
    let stats = reconstruct(reader, step_number, builder, |entry| entries.push(entry));
    (entries, stats)
}

fn preview(line: &str) -> String {
    match line.char_indices().nth(ORPHAN_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

enum RawLine<'a> {
    Text(&'a [u8]),
    /// Line dropped for exceeding the cap; carries its full length
    Oversized(usize),
}

/// Line reader that never buffers more than `max` bytes of one line
struct BoundedLines<R> {
    reader: R,
    max: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> BoundedLines<R> {
    fn new(reader: R, max: usize) -> Self {
        Self {
            reader,
            max,
            buf: Vec::with_capacity(max.min(64 * 1024)),
        }
    }

    fn next_line(&mut self) -> io::Result<Option<RawLine<'_>>> {
        self.buf.clear();
        let mut total = 0usize;
        let mut overflowed = false;
        let mut saw_bytes = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                break;
            }
            saw_bytes = true;

            let (chunk, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (&available[..pos], pos + 1, true),
                None => (available, available.len(), false),
            };

            total += chunk.len();
            if !overflowed {
                if self.buf.len() + chunk.len() > self.max {
                    overflowed = true;
                    self.buf.clear();
                } else {
                    self.buf.extend_from_slice(chunk);
                }
            }

            self.reader.consume(consumed);
            if complete {
                break;
            }
        }

        if !saw_bytes {
            return Ok(None);
        }
        if overflowed {
            return Ok(Some(RawLine::Oversized(total)));
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        Ok(Some(RawLine::Text(&self.buf)))
    }
}
