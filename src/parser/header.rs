//! RFC 5322 header handling: raw bytes, folding, and RFC 2047 encoded-words.
//!
//! The encoded-word decoder is total. Anything that does not scan as a
//! complete, decodable `=?charset?enc?text?=` token is copied to the output
//! unchanged, one word at a time.

use std::ops::Range;

use ::base64::alphabet;
use ::base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use ::base64::engine::DecodePaddingMode;
use ::base64::Engine as _;
use tracing::debug;

use crate::coding::charset;
use crate::parser::rfc2045::is_token_char;

/// Base64 engine for `B` words: padding optional, sloppy trailing bits accepted.
const B_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_raw_header(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Split a message into its header block and the offset where the body starts.
///
/// The header block ends at the first empty line (`\n` or `\r\n`). Without
/// one, the whole input is headers and the body offset is its length.
pub fn split_header_block(bytes: &[u8]) -> (&[u8], usize) {
    let mut line_start = 0;
    while line_start < bytes.len() {
        let rest = &bytes[line_start..];
        let blank = if rest.starts_with(b"\r\n") {
            2
        } else if rest.starts_with(b"\n") {
            1
        } else {
            0
        };
        if blank > 0 {
            return (&bytes[..line_start], line_start + blank);
        }
        match rest.iter().position(|&b| b == b'\n') {
            Some(i) => line_start += i + 1,
            None => break,
        }
    }
    (bytes, bytes.len())
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// Returns a list of `(lowercase_name, raw_value)` pairs.
pub fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            result.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
        // Lines without a colon that are not continuations are skipped
    }

    result
}

/// First value for a header name (case-insensitive).
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Whitespace between two decoded words is dropped. An encoded-word that
/// cannot be decoded is kept exactly as written.
pub fn decode_encoded_words(input: &str) -> String {
    Scanner::new(input, Output::Decoded).run()
}

/// Rewrite every decodable encoded-word as `=?UTF-8?B?...?=`.
///
/// Everything else, including whitespace between words, is left untouched.
pub fn decode_to_canonical_b64(input: &str) -> String {
    Scanner::new(input, Output::CanonicalB64).run()
}

/// Encode `text` as a single UTF-8 `B` encoded-word.
pub fn encode_b(text: &str) -> String {
    format!("=?UTF-8?B?{}?=", STANDARD.encode(text))
}

/// Encode `text` as a single UTF-8 `Q` encoded-word.
pub fn encode_q(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 12);
    out.push_str("=?UTF-8?Q?");
    for &b in text.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'!' | b'*' | b'+' | b'-' | b'/' => {
                out.push(b as char)
            }
            b' ' => out.push('_'),
            _ => out.push_str(&format!("={b:02X}")),
        }
    }
    out.push_str("?=");
    out
}

// ── Encoded-word scanner ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Decoded,
    CanonicalB64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Whitespace or start of input; an encoded-word may begin here.
    PlainSpace,
    /// Inside a run of ordinary text.
    PlainText,
    Charset,
    Encoding,
    EncodedText,
    /// Whitespace following a decoded word.
    PostWordSpace,
    /// The current candidate word is invalid.
    Recover,
}

/// Scan state shared by the state handlers.
///
/// Input before `flushed` has been written to `out`. A candidate word is
/// only written once it decodes; until then its bytes stay pending, so a
/// failed word costs nothing to undo.
struct Scanner<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    flushed: usize,
    word_start: usize,
    after_word: bool,
    charset: Range<usize>,
    encoding: u8,
    text_start: usize,
    output: Output,
    out: String,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str, output: Output) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            flushed: 0,
            word_start: 0,
            after_word: false,
            charset: 0..0,
            encoding: b'Q',
            text_start: 0,
            output,
            out: String::with_capacity(input.len()),
        }
    }

    fn run(mut self) -> String {
        let mut state = State::PlainSpace;
        while self.pos < self.bytes.len() {
            state = match state {
                State::PlainSpace => self.plain_space(),
                State::PlainText => self.plain_text(),
                State::Charset => self.charset(),
                State::Encoding => self.encoding(),
                State::EncodedText => self.encoded_text(),
                State::PostWordSpace => self.post_word_space(),
                State::Recover => self.recover(),
            };
        }
        self.out.push_str(&self.input[self.flushed..]);
        self.out
    }

    fn current(&self) -> u8 {
        self.bytes[self.pos]
    }

    fn at_word_start(&self) -> bool {
        self.bytes[self.pos..].starts_with(b"=?")
    }

    fn begin_word(&mut self, after_word: bool) -> State {
        self.word_start = self.pos;
        self.after_word = after_word;
        self.pos += 2;
        self.charset = self.pos..self.pos;
        State::Charset
    }

    fn plain_space(&mut self) -> State {
        if is_space(self.current()) {
            self.pos += 1;
            State::PlainSpace
        } else if self.at_word_start() {
            self.begin_word(false)
        } else {
            self.pos += 1;
            State::PlainText
        }
    }

    fn plain_text(&mut self) -> State {
        let b = self.current();
        self.pos += 1;
        if is_space(b) {
            State::PlainSpace
        } else {
            State::PlainText
        }
    }

    fn charset(&mut self) -> State {
        match self.current() {
            b'?' if self.pos > self.charset.start => {
                self.charset.end = self.pos;
                self.pos += 1;
                State::Encoding
            }
            b if is_token_char(b as char) => {
                self.pos += 1;
                State::Charset
            }
            _ => State::Recover,
        }
    }

    fn encoding(&mut self) -> State {
        let b = self.current();
        if matches!(b, b'B' | b'b' | b'Q' | b'q') && self.bytes.get(self.pos + 1) == Some(&b'?') {
            self.encoding = b.to_ascii_uppercase();
            self.pos += 2;
            self.text_start = self.pos;
            State::EncodedText
        } else {
            State::Recover
        }
    }

    fn encoded_text(&mut self) -> State {
        match self.current() {
            b'?' if self.bytes.get(self.pos + 1) == Some(&b'=') => self.finish_word(),
            b' '..=b'>' | b'@'..=b'~' => {
                self.pos += 1;
                State::EncodedText
            }
            _ => State::Recover,
        }
    }

    fn finish_word(&mut self) -> State {
        let label = &self.input[self.charset.clone()];
        let text = &self.input[self.text_start..self.pos];
        let Some(decoded) = decode_word(label, self.encoding, text) else {
            return State::Recover;
        };

        // The gap since the previous word is pure whitespace when `after_word` is set.
        let elide_gap = self.after_word && self.output == Output::Decoded;
        if !elide_gap {
            self.out.push_str(&self.input[self.flushed..self.word_start]);
        }
        match self.output {
            Output::Decoded => self.out.push_str(&decoded),
            Output::CanonicalB64 => self.out.push_str(&encode_b(&decoded)),
        }

        self.pos += 2;
        self.flushed = self.pos;
        State::PostWordSpace
    }

    fn post_word_space(&mut self) -> State {
        if is_space(self.current()) {
            self.pos += 1;
            State::PostWordSpace
        } else if self.at_word_start() {
            self.begin_word(true)
        } else {
            self.pos += 1;
            State::PlainText
        }
    }

    /// Resume as plain text just past the failed word's `=?`.
    fn recover(&mut self) -> State {
        self.pos = self.word_start + 2;
        self.after_word = false;
        State::PlainText
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// Decode the payload of one encoded-word into UTF-8.
fn decode_word(label: &str, encoding: u8, text: &str) -> Option<String> {
    // RFC 2231 language suffix: charset*lang
    let label = label.split_once('*').map_or(label, |(charset, _)| charset);

    let bytes = if encoding == b'B' {
        match B_ENGINE.decode(text) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(charset = label, error = %e, "Invalid base64 in encoded-word");
                return None;
            }
        }
    } else {
        decode_q_encoding(text)
    };

    match charset::to_utf8(label, &bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!(charset = label, error = %e, "Leaving encoded-word undecoded");
            None
        }
    }
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
///
/// A `=` not followed by two hex digits is kept literally.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                result.push((hex_value(bytes[i + 1]) << 4) | hex_value(bytes[i + 2]));
                i += 3;
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b.to_ascii_uppercase() - b'A' + 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        let input = "=?UTF-8?B?SG9sYSBtdW5kbw==?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_base64_without_padding() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYQ?="), "Hola");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        let input = "=?ISO-8859-1?Q?caf=E9?=";
        assert_eq!(decode_encoded_words(input), "café");
    }

    #[test]
    fn test_decode_keith_moore() {
        assert_eq!(decode_encoded_words("=?US-ASCII?Q?Keith_Moore?="), "Keith Moore");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_adjacent_words() {
        assert_eq!(decode_encoded_words("=?utf-8?q?a?==?utf-8?q?b?="), "ab");
        assert_eq!(decode_encoded_words("=?utf-8?q?a?=\r\n\t=?utf-8?q?b?="), "ab");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola there");
        assert_eq!(
            decode_encoded_words("=?utf-8?q?a?= plain =?utf-8?q?b?="),
            "a plain b"
        );
    }

    #[test]
    fn test_space_kept_next_to_invalid_word() {
        assert_eq!(
            decode_encoded_words("=?utf-8?q?ok?= =?bogus-charset?q?x?="),
            "ok =?bogus-charset?q?x?="
        );
    }

    #[test]
    fn test_newline_in_charset_left_unchanged() {
        let input = "=?US\nASCII?Q?Keith_Moore?=";
        assert_eq!(decode_encoded_words(input), input);
    }

    #[test]
    fn test_word_glued_to_text_left_unchanged() {
        let input = "abc=?utf-8?q?x?=";
        assert_eq!(decode_encoded_words(input), input);
    }

    #[test]
    fn test_invalid_words_left_unchanged() {
        for input in [
            "=?utf-8?x?abc?=",
            "=??q?abc?=",
            "=?utf-8?q?a?b?=",
            "=?utf-8?b?!!!!?=",
            "=?utf-8?q?unterminated",
            "=?utf-8?q?tab\there?=",
            "=?",
        ] {
            assert_eq!(decode_encoded_words(input), input, "{input:?}");
        }
    }

    #[test]
    fn test_recovery_finds_following_word() {
        assert_eq!(
            decode_encoded_words("=?bad charset =?utf-8?q?ok?="),
            "=?bad charset ok"
        );
    }

    #[test]
    fn test_invalid_q_escape_kept() {
        assert_eq!(decode_encoded_words("=?utf-8?q?a=zz=4?="), "a=zz=4");
    }

    #[test]
    fn test_space_in_encoded_text() {
        assert_eq!(decode_encoded_words("=?utf-8?q?a b?="), "a b");
    }

    #[test]
    fn test_language_suffix_ignored() {
        assert_eq!(decode_encoded_words("=?US-ASCII*EN?Q?Keith?="), "Keith");
    }

    #[test]
    fn test_decode_iso8859_encoded_word() {
        let input = "=?ISO-8859-1?Q?R=E9sum=E9_du_projet?=";
        assert_eq!(decode_encoded_words(input), "Résumé du projet");
    }

    #[test]
    fn test_decode_utf8_base64_japanese() {
        // 山田太郎
        let input = "=?UTF-8?B?5bGx55Sw5aSq6YOO?=";
        assert_eq!(decode_encoded_words(input), "山田太郎");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        // Müller
        let input = "=?Windows-1252?Q?M=FCller?=";
        assert_eq!(decode_encoded_words(input), "Müller");
    }

    #[test]
    fn test_non_ascii_plain_text_preserved() {
        let input = "Grüße =?utf-8?q?aus?= Köln";
        assert_eq!(decode_encoded_words(input), "Grüße aus Köln");
    }

    #[test]
    fn test_canonical_b64() {
        assert_eq!(
            decode_to_canonical_b64("Re: =?ISO-8859-1?Q?caf=E9?=  =?utf-8?q?x?= end"),
            "Re: =?UTF-8?B?Y2Fmw6k=?=  =?UTF-8?B?eA==?= end"
        );
        assert_eq!(decode_to_canonical_b64("=?x?q?broken"), "=?x?q?broken");
    }

    #[test]
    fn test_encode_q() {
        assert_eq!(encode_q("a b?"), "=?UTF-8?Q?a_b=3F?=");
        assert_eq!(encode_q("é"), "=?UTF-8?Q?=C3=A9?=");
    }

    #[test]
    fn test_encode_round_trips() {
        for text in ["", "plain", "with spaces and ?= marks", "naïve café", "tab\tnl\n"] {
            assert_eq!(decode_encoded_words(&encode_b(text)), text);
            assert_eq!(decode_encoded_words(&encode_q(text)), text);
        }
    }

    #[test]
    fn test_decode_raw_header() {
        assert_eq!(decode_raw_header(b"\xEF\xBB\xBFSubject: hi"), "Subject: hi");
        assert_eq!(decode_raw_header(b"Subject: caf\xe9"), "Subject: café");
        assert_eq!(decode_raw_header("Subject: café".as_bytes()), "Subject: café");
    }

    #[test]
    fn test_unfold_headers() {
        let text = "Subject: This is a long\n\tsubject line\nFrom: user@example.com\n";
        let headers = unfold_headers(text);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "subject");
        assert_eq!(headers[0].1, "This is a long subject line");
    }

    #[test]
    fn test_unfold_headers_crlf() {
        let text = "Content-Type: multipart/mixed;\r\n boundary=\"xyz\"\r\nX-Empty:\r\n";
        let headers = unfold_headers(text);
        assert_eq!(
            header_value(&headers, "Content-Type"),
            Some("multipart/mixed; boundary=\"xyz\"")
        );
        assert_eq!(header_value(&headers, "x-empty"), Some(""));
        assert_eq!(header_value(&headers, "missing"), None);
    }

    #[test]
    fn test_split_header_block() {
        let msg = b"A: 1\r\nB: 2\r\n\r\nbody";
        let (headers, body) = split_header_block(msg);
        assert_eq!(headers, b"A: 1\r\nB: 2\r\n");
        assert_eq!(&msg[body..], b"body");

        let msg = b"A: 1\n\nbody\n\nmore";
        let (headers, body) = split_header_block(msg);
        assert_eq!(headers, b"A: 1\n");
        assert_eq!(&msg[body..], b"body\n\nmore");
    }

    #[test]
    fn test_split_header_block_edge_cases() {
        assert_eq!(split_header_block(b"A: 1\r\n"), (&b"A: 1\r\n"[..], 6));
        assert_eq!(split_header_block(b"\r\nbody"), (&b""[..], 2));
        assert_eq!(split_header_block(b""), (&b""[..], 0));
    }
}
