//! Peekable byte sources for the multipart boundary scanner.
//!
//! The scanner needs bounded, non-consuming lookahead at every line break.
//! [`ByteSource`] captures exactly that, so the scanning logic runs the same
//! over an in-memory slice or a [`PeekReader`] wrapping any `Read`.

use std::io::{self, Read};

/// Default lookahead capacity of a [`PeekReader`] (matches a typical
/// buffered reader).
pub const DEFAULT_PEEK_CAPACITY: usize = 4096;

/// A byte stream with non-consuming lookahead.
pub trait ByteSource {
    /// Return up to `n` upcoming bytes without consuming them.
    ///
    /// A result shorter than `n` means the source ends within the window.
    fn peek(&mut self, n: usize) -> io::Result<&[u8]>;

    /// Consume and return the next byte, or `None` at end of source.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Largest `n` that [`peek`](ByteSource::peek) supports.
    fn peek_capacity(&self) -> usize {
        usize::MAX
    }
}

impl<'a> ByteSource for &'a [u8] {
    fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        Ok(&self[..n.min(self.len())])
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let slice: &'a [u8] = *self;
        match slice.split_first() {
            Some((&b, rest)) => {
                *self = rest;
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        (**self).peek(n)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        (**self).read_byte()
    }

    fn peek_capacity(&self) -> usize {
        (**self).peek_capacity()
    }
}

/// Buffered reader with bounded lookahead.
///
/// Keeps a single linear buffer; consumed bytes are compacted away only
/// when more room is needed for a refill.
pub struct PeekReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    capacity: usize,
    eof: bool,
}

impl<R: Read> PeekReader<R> {
    /// Wrap `inner` with the default lookahead capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_PEEK_CAPACITY, inner)
    }

    /// Wrap `inner` with room for `capacity` bytes of lookahead.
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            buf: Vec::with_capacity(capacity),
            pos: 0,
            capacity,
            eof: false,
        }
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Unwrap the underlying reader. Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Make at least `n` bytes available unless the source ends first.
    fn fill(&mut self, n: usize) -> io::Result<()> {
        while self.buffered() < n && !self.eof {
            if self.pos > 0 {
                self.buf.drain(..self.pos);
                self.pos = 0;
            }
            let start = self.buf.len();
            self.buf.resize(self.capacity.max(n), 0);
            match self.inner.read(&mut self.buf[start..]) {
                Ok(0) => {
                    self.buf.truncate(start);
                    self.eof = true;
                }
                Ok(read) => self.buf.truncate(start + read),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.buf.truncate(start),
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl<R: Read> ByteSource for PeekReader<R> {
    fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        if n > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("peek of {n} bytes exceeds capacity {}", self.capacity),
            ));
        }
        self.fill(n)?;
        let end = self.buf.len().min(self.pos + n);
        Ok(&self.buf[self.pos..end])
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        self.fill(1)?;
        match self.buf.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    fn peek_capacity(&self) -> usize {
        self.capacity
    }
}

impl<R: Read> Read for PeekReader<R> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        if self.buffered() == 0 {
            if dest.len() >= self.capacity {
                return self.inner.read(dest);
            }
            self.fill(1)?;
        }
        let available = &self.buf[self.pos..];
        let n = available.len().min(dest.len());
        dest[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}
