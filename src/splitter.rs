//! Incremental line splitter for growing log files.
//!
//! The tailer feeds whatever bytes a read returned and pulls complete records
//! back out. Lines end at `\n`, `\r` or `\r\n`; a `\r` that is the last byte
//! seen so far stays buffered until the next byte tells us whether a `\n`
//! belongs to the same terminator. Chunk sizes never change the output.

const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// A complete, terminator-stripped line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: Vec<u8>,
    /// Input bytes this record accounts for: the line, its terminator and the
    /// terminators of any blank lines directly before it.
    pub consumed: u64,
}

/// Longest line kept by default. rtl_433 records are a few hundred bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Restartable byte-stream to line decoder.
///
/// Lines longer than the configured maximum are never emitted. Their bytes
/// are reported through [`RecordSplitter::take_skipped`] like blank lines, so
/// the offset still moves past them, and [`RecordSplitter::take_oversized`]
/// counts them.
///
/// ```
/// use rtl433_slurp::splitter::RecordSplitter;
///
/// let mut splitter = RecordSplitter::new();
/// splitter.feed(b"first\r");
/// assert!(splitter.next_record().is_none());
///
/// splitter.feed(b"\nsecond\n");
/// let lines: Vec<_> = splitter.records().map(|r| (r.line, r.consumed)).collect();
/// assert_eq!(lines, vec![(b"first".to_vec(), 7), (b"second".to_vec(), 7)]);
/// ```
#[derive(Debug)]
pub struct RecordSplitter {
    buffer: Vec<u8>,
    start: usize,
    skipped: u64,
    max_line_bytes: usize,
    /// Inside an oversized line; everything up to the next terminator goes.
    discarding: bool,
    oversized: usize,
}

impl Default for RecordSplitter {
    fn default() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }
}

impl RecordSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            skipped: 0,
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
            oversized: 0,
        }
    }

    /// Append a chunk read from the file.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Drop buffered input so reading can resume from the last committed
    /// offset. An oversized line that is being skipped stays skipped, since
    /// its bytes were already reported.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.start = 0;
    }

    /// Pull the next complete record, or `None` until more input is fed.
    pub fn next_record(&mut self) -> Option<Record> {
        loop {
            let rest = &self.buffer[self.start..];
            let Some(term_at) = rest.iter().position(|b| *b == LF || *b == CR) else {
                if self.discarding || rest.len() > self.max_line_bytes {
                    let len = rest.len();
                    self.discard(len);
                }
                return None;
            };

            if self.discarding || term_at > self.max_line_bytes {
                // A `\n` right after a `\r` shows up next as a blank line.
                self.discard(term_at + 1);
                self.discarding = false;
                continue;
            }

            let term_len = if rest[term_at] == CR {
                match rest.get(term_at + 1) {
                    Some(&LF) => 2,
                    Some(_) => 1,
                    // Hold the `\r` until we know what follows it.
                    None => return None,
                }
            } else {
                1
            };

            let line = rest[..term_at].to_vec();
            self.start += term_at + term_len;

            if line.is_empty() {
                self.skipped += term_len as u64;
                continue;
            }

            let consumed = line.len() as u64 + term_len as u64 + std::mem::take(&mut self.skipped);
            return Some(Record { line, consumed });
        }
    }

    fn discard(&mut self, len: usize) {
        if !self.discarding {
            self.discarding = true;
            self.oversized += 1;
        }
        self.start += len;
        self.skipped += len as u64;
    }

    /// Lazily drain every record that is complete with the input fed so far.
    pub fn records(&mut self) -> impl Iterator<Item = Record> + '_ {
        std::iter::from_fn(move || self.next_record())
    }

    /// Bytes of blank and oversized lines that no emitted record has claimed
    /// yet.
    pub fn take_skipped(&mut self) -> u64 {
        std::mem::take(&mut self.skipped)
    }

    /// Oversized lines dropped since the last call.
    pub fn take_oversized(&mut self) -> usize {
        std::mem::take(&mut self.oversized)
    }

    /// Bytes fed but not yet part of a complete record.
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.start
    }
}
