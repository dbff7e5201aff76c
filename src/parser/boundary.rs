//! Streaming multipart boundary reader.
//!
//! Splits a multipart body into parts without buffering the message. Each
//! part is exposed through `std::io::Read`; [`BoundaryReader::next`] moves
//! to the following part. Tolerant of:
//!
//! - Mixed `\n` and `\r\n` line endings
//! - Preamble text before the first delimiter
//! - Parts with no headers and no body
//! - Near-miss lines such as `--BOUNDARYX`
//! - Bodies truncated before the terminator line

use std::io::{self, Read};

use tracing::{debug, trace, warn};

use crate::error::{MimeError, Result};
use crate::parser::source::{ByteSource, PeekReader, DEFAULT_PEEK_CAPACITY};

/// Bytes of lookahead needed beyond the boundary itself:
/// `\r\n` + `--` before it and two bytes after it.
const PEEK_OVERHEAD: usize = 6;

/// Part-by-part reader over a multipart body.
///
/// Reading before the first call to [`next`](Self::next) yields the
/// preamble. After `next` returns `false`, the epilogue (if any) is still in
/// the source and can be reached through [`into_inner`](Self::into_inner).
pub struct BoundaryReader<S> {
    source: S,
    boundary: String,
    /// `\n--BOUNDARY--`; the delimiter and terminator patterns are slices of it.
    pattern: Vec<u8>,
    buffer: Vec<u8>,
    cursor: usize,
    streaming: bool,
    at_part_start: bool,
    parts_read: usize,
    finished: bool,
    unbounded: bool,
}

/// The first bytes of a line, enough to classify it.
struct LineHead {
    head: Vec<u8>,
    len: usize,
    complete: bool,
}

impl<S: ByteSource> BoundaryReader<S> {
    /// Create a reader for `boundary` over `source`.
    ///
    /// Fails if the source cannot peek `boundary.len() + 6` bytes.
    pub fn new(source: S, boundary: &str) -> Result<Self> {
        let needed = peek_depth(boundary);
        let capacity = source.peek_capacity();
        if capacity < needed {
            return Err(MimeError::PeekTooShallow { needed, capacity });
        }

        let mut pattern = Vec::with_capacity(boundary.len() + 5);
        pattern.extend_from_slice(b"\n--");
        pattern.extend_from_slice(boundary.as_bytes());
        pattern.extend_from_slice(b"--");

        Ok(Self {
            source,
            boundary: boundary.to_string(),
            pattern,
            buffer: Vec::new(),
            cursor: 0,
            streaming: true,
            at_part_start: false,
            parts_read: 0,
            finished: false,
            unbounded: false,
        })
    }

    /// The boundary string this reader splits on.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Number of parts opened so far.
    pub fn parts_read(&self) -> usize {
        self.parts_read
    }

    /// `true` once the terminator line was seen or the source ran out.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `true` if the source ended before the terminator line.
    pub fn is_unbounded(&self) -> bool {
        self.unbounded
    }

    /// Mutable access to the underlying source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Unwrap the underlying source, positioned after the last line consumed.
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Advance to the next part.
    ///
    /// Returns `Ok(true)` when a new part is open for reading and
    /// `Ok(false)` once the body is finished. Unread content of the current
    /// part is discarded.
    pub fn next(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        if self.parts_read > 0 {
            io::copy(self, &mut io::sink())?;
        }
        self.streaming = false;
        self.buffer.clear();
        self.cursor = 0;

        loop {
            let line = self.read_line_head()?;
            if line.len == 0 {
                self.mark_unbounded();
                self.finished = true;
                return Ok(false);
            }
            if matches!(line.head.first(), Some(b'\r' | b'\n')) {
                continue;
            }
            if line.head.starts_with(self.terminator()) {
                debug!(boundary = %self.boundary, parts = self.parts_read, "Multipart terminator found");
                self.finished = true;
                return Ok(false);
            }
            if line.complete && self.is_delimiter(&line.head) {
                self.parts_read += 1;
                self.streaming = true;
                self.at_part_start = true;
                trace!(boundary = %self.boundary, part = self.parts_read, "Opened multipart part");
                return Ok(true);
            }
            if !line.complete {
                self.mark_unbounded();
                self.finished = true;
                return Ok(false);
            }
            if self.parts_read == 0 {
                // Preamble
                continue;
            }
            self.finished = true;
            return Err(MimeError::NoTerminator {
                boundary: String::from_utf8_lossy(self.delimiter()).into_owned(),
                line: String::from_utf8_lossy(&line.head).into_owned(),
            });
        }
    }

    /// `--BOUNDARY`
    fn delimiter(&self) -> &[u8] {
        &self.pattern[1..self.pattern.len() - 2]
    }

    /// `--BOUNDARY--`
    fn terminator(&self) -> &[u8] {
        &self.pattern[1..]
    }

    fn is_delimiter(&self, line: &[u8]) -> bool {
        line.strip_prefix(self.delimiter())
            .and_then(|rest| rest.first())
            .is_some_and(|&b| is_padding(b))
    }

    fn mark_unbounded(&mut self) {
        if !self.unbounded {
            warn!(
                boundary = %self.boundary,
                parts = self.parts_read,
                "Multipart body ended without a terminator"
            );
        }
        self.unbounded = true;
    }

    /// Consume one line, keeping only as many leading bytes as
    /// classification needs.
    fn read_line_head(&mut self) -> io::Result<LineHead> {
        let keep = self.pattern.len();
        let mut head = Vec::with_capacity(keep);
        let mut len = 0;
        while let Some(b) = self.source.read_byte()? {
            len += 1;
            if head.len() < keep {
                head.push(b);
            }
            if b == b'\n' {
                return Ok(LineHead {
                    head,
                    len,
                    complete: true,
                });
            }
        }
        Ok(LineHead {
            head,
            len,
            complete: false,
        })
    }

    /// Whether a delimiter or terminator starts at the next unread byte.
    fn boundary_ahead(&mut self) -> io::Result<bool> {
        let lead: &[u8] = match self.source.peek(1)?.first() {
            Some(b'\r') => b"\r\n",
            Some(b'\n') => b"\n",
            Some(_) if self.at_part_start => b"",
            _ => return Ok(false),
        };
        let delimiter = &self.pattern[1..self.pattern.len() - 2];
        let window = lead.len() + delimiter.len() + 2;
        let peeked = self.source.peek(window)?;
        Ok(boundary_matches(peeked, lead, delimiter))
    }

    /// Move up to `want` more content bytes into the buffer, stopping early
    /// at a boundary or at end of source.
    fn scan(&mut self, want: usize) -> io::Result<()> {
        let target = self.buffer.len() + want;
        while self.buffer.len() < target {
            if self.boundary_ahead()? {
                self.streaming = false;
                self.at_part_start = false;
                return Ok(());
            }
            match self.source.read_byte()? {
                Some(b) => {
                    self.buffer.push(b);
                    self.at_part_start = false;
                }
                None => {
                    self.streaming = false;
                    self.mark_unbounded();
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn drain(&mut self, dest: &mut [u8]) -> usize {
        let available = &self.buffer[self.cursor..];
        let n = available.len().min(dest.len());
        dest[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        if self.cursor == self.buffer.len() {
            self.buffer.clear();
            self.cursor = 0;
        }
        n
    }
}

impl<R: io::Read> BoundaryReader<PeekReader<R>> {
    /// Wrap a plain reader in a [`PeekReader`] deep enough for `boundary`.
    pub fn from_reader(reader: R, boundary: &str) -> Result<Self> {
        let capacity = DEFAULT_PEEK_CAPACITY.max(peek_depth(boundary));
        Self::new(PeekReader::with_capacity(capacity, reader), boundary)
    }
}

impl<S: ByteSource> Read for BoundaryReader<S> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        let pending = self.buffer.len() - self.cursor;
        if pending < dest.len() && self.streaming {
            self.scan(dest.len() - pending)?;
        }
        Ok(self.drain(dest))
    }
}

/// Lookahead a source must support to recognize `boundary`.
pub fn peek_depth(boundary: &str) -> usize {
    boundary.len() + PEEK_OVERHEAD
}

/// Transport padding or end of line after a boundary.
fn is_padding(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Match `lead` + `--BOUNDARY` followed by padding, `--`, or end of source.
///
/// A window starting with a blank line never matches: the lead is followed
/// by another line break instead of `--`.
fn boundary_matches(peeked: &[u8], lead: &[u8], delimiter: &[u8]) -> bool {
    let Some(rest) = peeked.strip_prefix(lead) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix(delimiter) else {
        return false;
    };
    match rest {
        [] | [b'-', b'-', ..] => true,
        [b, ..] => is_padding(*b),
    }
}
