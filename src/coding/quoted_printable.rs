//! Quoted-printable stream cleaner.
//!
//! Strict quoted-printable decoders abort on a stray `=` or on raw 8-bit
//! bytes, both of which are common in real mail. [`QpCleaner`] rewrites
//! such input into valid quoted-printable without changing what a tolerant
//! reader would have decoded.

use std::collections::VecDeque;
use std::io::{self, Read};

use crate::parser::source::{ByteSource, PeekReader};

/// Longest line content emitted before a soft line break is inserted.
/// Content plus `=\r\n` stays within the 998-byte RFC 5322 line limit.
const MAX_LINE_CONTENT: usize = 995;

const SOFT_BREAK: &[u8] = b"=\r\n";
const ESCAPED_EQUALS: &[u8] = b"=3D";

/// `Read` adapter producing valid quoted-printable from sloppy input.
///
/// - `=XX` hex escapes and `=` soft line breaks pass through.
/// - Any other `=` becomes `=3D`.
/// - Bytes outside printable ASCII (except TAB, CR and LF) become `=XX`.
/// - Lines approaching 1000 bytes are split with a soft line break.
pub struct QpCleaner<R> {
    inner: PeekReader<R>,
    overflow: VecDeque<u8>,
    line_len: usize,
}

impl<R: Read> QpCleaner<R> {
    /// Wrap a raw quoted-printable stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner: PeekReader::new(inner),
            overflow: VecDeque::new(),
            line_len: 0,
        }
    }

    fn emit(&mut self, chunk: &[u8], dest: &mut [u8], n: &mut usize) {
        let ends_line = matches!(chunk, [b'\r'] | [b'\n']);
        if !ends_line && self.line_len + chunk.len() > MAX_LINE_CONTENT {
            self.push(SOFT_BREAK, dest, n);
            self.line_len = 0;
        }
        self.push(chunk, dest, n);
        if chunk == b"\n" {
            self.line_len = 0;
        } else if !ends_line {
            self.line_len += chunk.len();
        }
    }

    fn push(&mut self, bytes: &[u8], dest: &mut [u8], n: &mut usize) {
        for &b in bytes {
            if *n < dest.len() {
                dest[*n] = b;
                *n += 1;
            } else {
                self.overflow.push_back(b);
            }
        }
    }
}

impl<R: Read> Read for QpCleaner<R> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < dest.len() {
            match self.overflow.pop_front() {
                Some(b) => {
                    dest[n] = b;
                    n += 1;
                }
                None => break,
            }
        }

        while n < dest.len() {
            let Some(b) = self.inner.read_byte()? else {
                break;
            };
            match b {
                b'=' => {
                    let (first, second) = {
                        let ahead = self.inner.peek(2)?;
                        (ahead.first().copied(), ahead.get(1).copied())
                    };
                    match (first, second) {
                        (Some(h), Some(l)) if h.is_ascii_hexdigit() && l.is_ascii_hexdigit() => {
                            self.inner.read_byte()?;
                            self.inner.read_byte()?;
                            self.emit(&[b'=', h, l], dest, &mut n);
                        }
                        (Some(b'\r'), Some(b'\n')) | (Some(b'\n'), _) => {
                            // Soft line break; the line ending follows as-is.
                            self.push(b"=", dest, &mut n);
                        }
                        _ => self.emit(ESCAPED_EQUALS, dest, &mut n),
                    }
                }
                b'\t' | b'\r' | b'\n' | b' '..=b'~' => self.emit(&[b], dest, &mut n),
                _ => {
                    let escaped = format!("={b:02X}");
                    self.emit(escaped.as_bytes(), dest, &mut n);
                }
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(input: &[u8]) -> String {
        let mut out = String::new();
        QpCleaner::new(input).read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_valid_input_unchanged() {
        let input = "caf=C3=A9 au lait=\r\nsecond line\r\n";
        assert_eq!(clean(input.as_bytes()), input);
    }

    #[test]
    fn test_stray_equals_escaped() {
        assert_eq!(clean(b"a=b x==y"), "a=3Db x=3D=3Dy");
        assert_eq!(clean(b"trailing="), "trailing=3D");
    }

    #[test]
    fn test_bare_lf_soft_break() {
        assert_eq!(clean(b"soft=\nbreak"), "soft=\nbreak");
    }

    #[test]
    fn test_eight_bit_bytes_escaped() {
        assert_eq!(clean(b"caf\xe9\x01"), "caf=E9=01");
    }

    #[test]
    fn test_long_line_gets_soft_break() {
        let input = vec![b'a'; 2000];
        let out = clean(&input);
        let lines: Vec<&str> = out.split("\r\n").collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.len() <= MAX_LINE_CONTENT + 1));
        assert_eq!(out.replace("=\r\n", ""), "a".repeat(2000));
    }

    #[test]
    fn test_escape_not_split_across_soft_break() {
        let mut input = vec![b'a'; MAX_LINE_CONTENT - 1];
        input.push(0xff);
        let out = clean(&input);
        assert!(out.ends_with("=\r\n=FF"));
    }

    #[test]
    fn test_overflow_carried_between_reads() {
        let mut cleaner = QpCleaner::new(&b"\xe9\xe9"[..]);
        let mut buf = [0u8; 2];
        let mut out = Vec::new();
        loop {
            let n = cleaner.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"=E9=E9");
    }
}
