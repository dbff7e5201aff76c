//! Base64 stream cleaner.
//!
//! Broken senders sprinkle base64 bodies with stray punctuation, trailing
//! garbage and mid-stream padding. [`Base64Cleaner`] strips everything that
//! is not in the standard alphabet so a no-padding decoder can consume the
//! result without aborting.

use std::io::{self, Read};

use tracing::debug;

/// Size of the scratch buffer used for each underlying read.
const CHUNK_SIZE: usize = 1024;

/// Invalid bytes kept in the report; later ones are only counted.
pub const MAX_RECORDED_INVALID: usize = 64;

/// A byte removed from the stream because it is not valid base64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidByte {
    /// The offending byte.
    pub byte: u8,
    /// Offset of the byte in the uncleaned input stream.
    pub offset: u64,
}

/// `Read` adapter that removes non-alphabet bytes from a base64 stream.
///
/// Whitespace and `=` are dropped silently. Any other byte outside
/// `A-Z a-z 0-9 + /` is dropped and recorded in [`invalid_bytes`], up to
/// [`MAX_RECORDED_INVALID`] entries. The output is unpadded.
///
/// [`invalid_bytes`]: Base64Cleaner::invalid_bytes
pub struct Base64Cleaner<R> {
    inner: R,
    scratch: [u8; CHUNK_SIZE],
    offset: u64,
    invalid: Vec<InvalidByte>,
    invalid_count: u64,
}

impl<R: Read> Base64Cleaner<R> {
    /// Wrap a raw base64 stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: [0; CHUNK_SIZE],
            offset: 0,
            invalid: Vec::new(),
            invalid_count: 0,
        }
    }

    /// The first invalid bytes removed so far (whitespace and padding
    /// are not invalid).
    pub fn invalid_bytes(&self) -> &[InvalidByte] {
        &self.invalid
    }

    /// Total number of invalid bytes removed, recorded or not.
    pub fn invalid_count(&self) -> u64 {
        self.invalid_count
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> Base64Cleaner<R> {
    fn record_invalid(&mut self, byte: u8) {
        self.invalid_count += 1;
        if self.invalid.len() < MAX_RECORDED_INVALID {
            debug!(byte, offset = self.offset, "Unexpected byte in base64 stream");
            self.invalid.push(InvalidByte {
                byte,
                offset: self.offset,
            });
        } else if self.invalid_count == MAX_RECORDED_INVALID as u64 + 1 {
            debug!(offset = self.offset, "Too many invalid base64 bytes; counting only");
        }
    }
}

impl<R: Read> Read for Base64Cleaner<R> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        loop {
            let size = dest.len().min(CHUNK_SIZE);
            let read = self.inner.read(&mut self.scratch[..size])?;
            if read == 0 {
                return Ok(0);
            }

            let mut written = 0;
            for i in 0..read {
                let b = self.scratch[i];
                match classify(b) {
                    Class::Alphabet => {
                        dest[written] = b;
                        written += 1;
                    }
                    Class::Ignored => {}
                    Class::Invalid => self.record_invalid(b),
                }
                self.offset += 1;
            }

            // A chunk made only of stripped bytes must not look like EOF.
            if written > 0 {
                return Ok(written);
            }
        }
    }
}

enum Class {
    Alphabet,
    Ignored,
    Invalid,
}

fn classify(b: u8) -> Class {
    match b {
        b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' => Class::Alphabet,
        b' ' | b'\t' | b'\r' | b'\n' | b'=' => Class::Ignored,
        _ => Class::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(input: &[u8]) -> (String, Vec<InvalidByte>) {
        let mut cleaner = Base64Cleaner::new(input);
        let mut out = String::new();
        cleaner.read_to_string(&mut out).unwrap();
        (out, cleaner.invalid_bytes().to_vec())
    }

    #[test]
    fn test_strips_whitespace_and_padding() {
        let (out, invalid) = clean(b"SGVs\r\nbG8g\nd29y bGQ=\r\n");
        assert_eq!(out, "SGVsbG8gd29ybGQ");
        assert!(invalid.is_empty());
    }

    #[test]
    fn test_records_invalid_bytes() {
        let (out, invalid) = clean(b"SGV*sbG8!");
        assert_eq!(out, "SGVsbG8");
        assert_eq!(
            invalid,
            vec![
                InvalidByte { byte: b'*', offset: 3 },
                InvalidByte { byte: b'!', offset: 8 },
            ]
        );
    }

    #[test]
    fn test_invalid_report_is_capped() {
        let mut input = b"QUJD".to_vec();
        input.extend(std::iter::repeat(b'!').take(10_000));
        input.extend_from_slice(b"RA");

        let mut cleaner = Base64Cleaner::new(&input[..]);
        let mut out = String::new();
        cleaner.read_to_string(&mut out).unwrap();
        assert_eq!(out, "QUJDRA");
        assert_eq!(cleaner.invalid_bytes().len(), MAX_RECORDED_INVALID);
        assert_eq!(cleaner.invalid_count(), 10_000);
        assert_eq!(cleaner.invalid_bytes()[0], InvalidByte { byte: b'!', offset: 4 });
    }

    #[test]
    fn test_high_bit_bytes_are_invalid() {
        let (out, invalid) = clean(b"QUJD\xc3\xa9");
        assert_eq!(out, "QUJD");
        assert_eq!(invalid.len(), 2);
    }

    #[test]
    fn test_small_destination_buffer() {
        let mut cleaner = Base64Cleaner::new(&b"Q U J D R A=="[..]);
        let mut buf = [0u8; 2];
        let mut out = Vec::new();
        loop {
            let n = cleaner.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"QUJDRA");
    }

    #[test]
    fn test_cleaned_output_decodes() {
        use ::base64::Engine as _;
        let (out, _) = clean(b"SGVsbG8g\r\nd29ybGQ=\r\n--junk\r\n");
        // "junk" is alphabet text, so only the dashes go away.
        assert_eq!(out, "SGVsbG8gd29ybGQjunk");
        let decoded = ::base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(&out[..out.len() - 4])
            .unwrap();
        assert_eq!(decoded, b"Hello world");
    }
}
