//! Tolerant `Content-Type` / `Content-Disposition` parsing.
//!
//! Real mail carries media types that no strict parser accepts: missing
//! subtypes, unquoted file names with spaces, raw UTF-8, stray HTML, values
//! with unbalanced quotes. Each value is repaired in a fixed order and then
//! handed to the strict grammar in [`crate::parser::rfc2045`]:
//!
//! 1. Strip trailing HTML fragments (`text/html<br>`)
//! 2. Repair the structure: type slot, duplicate and malformed parameters
//! 3. Quote unquoted values that need it
//! 4. Escape stray quotes inside quoted values
//! 5. Turn line breaks into spaces
//!
//! Line breaks are normalized last, so quoting still treats them as
//! whitespace.

use std::collections::{BTreeMap, HashSet};

use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine as _;
use tracing::debug;

use crate::error::{MimeError, Result};
use crate::model::MediaType;
use crate::parser::header::decode_encoded_words;
use crate::parser::rfc2045::{is_token, parse_strict};

/// What the strict parser sees in place of a type we had to make up.
const SYNTHESIZED_TYPE: &str = "application/octet-stream";

/// Knobs for [`parse_media_type_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaTypeOptions {
    /// Report parameters written without `=value` in [`MediaType::rejected`].
    /// When `false` they are discarded.
    pub record_valueless_params: bool,
}

impl Default for MediaTypeOptions {
    fn default() -> Self {
        Self {
            record_valueless_params: true,
        }
    }
}

/// The type portion of a repaired value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TypeSlot {
    Given(String),
    /// No usable type; reported as an empty essence.
    Synthesized,
}

/// A parameter after structural repair. `value` is `None` for a bare name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawParam {
    name: String,
    value: Option<String>,
}

/// Parse a header value with default options.
///
/// Returns the soft-empty descriptor when the value has no type
/// information. Errors only when the value is still malformed after repair.
pub fn parse_media_type(value: &str) -> Result<MediaType> {
    parse_media_type_with(value, &MediaTypeOptions::default())
}

/// Parse a header value.
pub fn parse_media_type_with(value: &str, options: &MediaTypeOptions) -> Result<MediaType> {
    let stripped = strip_trailing_html(value);
    let (slot, raw_params) = repair_structure(stripped);

    let mut strict_input = match &slot {
        TypeSlot::Given(essence) => essence.clone(),
        TypeSlot::Synthesized => SYNTHESIZED_TYPE.to_string(),
    };
    let mut valueless = Vec::new();
    for param in raw_params {
        match param.value {
            Some(raw) => {
                strict_input.push_str("; ");
                strict_input.push_str(&param.name);
                strict_input.push('=');
                strict_input.push_str(&repair_value(&raw));
            }
            None if options.record_valueless_params => valueless.push(param.name),
            None => debug!(param = %param.name, "Discarding parameter without a value"),
        }
    }
    let strict_input = normalize_line_breaks(&strict_input);

    let (essence, params) = match parse_strict(&strict_input) {
        Ok(parsed) => parsed,
        Err(MimeError::NoMediaType) => return Ok(MediaType::default()),
        Err(e) => {
            debug!(value, repaired = %strict_input, error = %e, "Media type rejected after repair");
            return Err(e);
        }
    };

    let essence = match slot {
        TypeSlot::Given(_) => essence,
        TypeSlot::Synthesized => String::new(),
    };
    let params = params
        .into_iter()
        .map(|(name, value)| {
            let value = if value.contains("=?") {
                decode_encoded_words(&value)
            } else {
                value
            };
            (name, value)
        })
        .collect::<BTreeMap<_, _>>();
    valueless.retain(|name| !params.contains_key(name));

    Ok(MediaType {
        essence,
        params,
        rejected: valueless,
    })
}

// ── Stage 1: trailing HTML ──────────────────────────────────────

/// Remove `<...>` runs at the end of the value, ignoring brackets in quotes.
fn strip_trailing_html(value: &str) -> &str {
    let mut s = value;
    loop {
        let trimmed = s.trim_end();
        if !trimmed.ends_with('>') {
            return s;
        }
        let gt = unquoted_positions(trimmed, '>').last().copied();
        let lt = unquoted_positions(trimmed, '<').last().copied();
        match (lt, gt) {
            (Some(lt), Some(gt)) if gt == trimmed.len() - 1 && lt < gt => {
                debug!(fragment = &trimmed[lt..], "Stripping trailing HTML from media type");
                s = &trimmed[..lt];
            }
            _ => return s,
        }
    }
}

/// Byte offsets of `target` outside double-quoted strings.
fn unquoted_positions(s: &str, target: char) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_quotes {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == target {
            positions.push(i);
        }
    }
    positions
}

// ── Stage 2: structure ──────────────────────────────────────────

fn split_unquoted(s: &str, separator: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    for i in unquoted_positions(s, separator) {
        segments.push(&s[start..i]);
        start = i + separator.len_utf8();
    }
    segments.push(&s[start..]);
    segments
}

fn repair_structure(value: &str) -> (TypeSlot, Vec<RawParam>) {
    let segments = split_unquoted(value, ';');
    let first = segments[0].trim();

    let (slot, param_segments) = if first.is_empty() {
        (TypeSlot::Synthesized, &segments[1..])
    } else if first.contains('=') {
        // The value opens with a parameter.
        (TypeSlot::Synthesized, &segments[..])
    } else {
        (repair_type(first), &segments[1..])
    };
    if slot == TypeSlot::Synthesized {
        debug!(value, "No media type present; synthesizing one");
    }

    let mut seen = HashSet::new();
    let mut params = Vec::new();
    for segment in param_segments {
        let Some(param) = parse_param_segment(segment) else {
            continue;
        };
        if !is_token(&param.name) {
            debug!(param = %param.name, "Dropping parameter with an invalid name");
            continue;
        }
        if !seen.insert(param.name.clone()) {
            debug!(param = %param.name, "Dropping duplicate parameter");
            continue;
        }
        params.push(param);
    }

    (slot, params)
}

fn repair_type(first: &str) -> TypeSlot {
    let mut parts = first.split('/').map(str::trim);
    let main = parts.next().unwrap_or_default();
    let Some(sub) = parts.next() else {
        // Bare token such as a disposition.
        return TypeSlot::Given(first.to_string());
    };
    if parts.next().is_some() {
        debug!(value = first, "Collapsing extra '/' segments in media type");
    }
    if !sub.is_empty() {
        return TypeSlot::Given(format!("{main}/{sub}"));
    }
    let default_sub = match main.to_ascii_lowercase().as_str() {
        "text" => "plain",
        "application" => "octet-stream",
        "multipart" => "mixed",
        _ => return TypeSlot::Synthesized,
    };
    TypeSlot::Given(format!("{main}/{default_sub}"))
}

/// `name=value`, a bare `name`, or `None` for an empty segment.
fn parse_param_segment(segment: &str) -> Option<RawParam> {
    let segment = segment.trim();
    if segment.is_empty() {
        return None;
    }

    let (name, rest) = match encoded_name_end(segment) {
        Some(end) => (decode_encoded_words(&segment[..end]), &segment[end..]),
        None => match segment.find('=') {
            Some(eq) => (segment[..eq].to_string(), &segment[eq..]),
            None => {
                return Some(RawParam {
                    name: segment.to_ascii_lowercase(),
                    value: None,
                })
            }
        },
    };
    let name = name.trim().to_ascii_lowercase();
    let value = match rest.trim_start().strip_prefix('=') {
        Some(value) => Some(value.trim().to_string()),
        // Anything but `=` after an encoded name is ignored.
        None => None,
    };
    Some(RawParam { name, value })
}

/// End of an RFC 2047 encoded-word used as a parameter name.
///
/// The closing `?=` is searched for only after the `?` that ends the
/// encoding letter, so a Q payload starting with `=XX` is not cut short.
fn encoded_name_end(segment: &str) -> Option<usize> {
    let rest = segment.strip_prefix("=?")?;
    let charset_end = rest.find('?')?;
    let encoding_end = charset_end + 1 + rest[charset_end + 1..].find('?')?;
    let text_start = encoding_end + 1;
    rest[text_start..]
        .find("?=")
        .map(|i| 2 + text_start + i + 2)
}

// ── Stages 3 and 4: values ──────────────────────────────────────

fn repair_value(raw: &str) -> String {
    if raw.starts_with('"') {
        return escape_embedded_quotes(raw);
    }
    if is_token(raw) {
        return raw.to_string();
    }
    if !raw.is_ascii() {
        return format!("\"=?utf-8?b?{}?=\"", STANDARD.encode(raw));
    }
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('"');
    for c in raw.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Re-emit a quoted value with every inner `"` escaped and the closing
/// quote present.
fn escape_embedded_quotes(raw: &str) -> String {
    let inner = &raw[1..];
    let body = match inner.strip_suffix('"') {
        Some(body) if !ends_with_escape(body) => body,
        _ => inner,
    };

    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push('\\');
                out.push(chars.next().unwrap_or('\\'));
            }
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Whether `s` ends in an odd run of backslashes.
fn ends_with_escape(s: &str) -> bool {
    s.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}

// ── Stage 5: line breaks ────────────────────────────────────────

fn normalize_line_breaks(s: &str) -> String {
    s.replace('\n', " ").replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: &str) -> MediaType {
        parse_media_type(value).unwrap()
    }

    fn media(essence: &str, params: &[(&str, &str)]) -> MediaType {
        params
            .iter()
            .fold(MediaType::new(essence), |mt, (k, v)| mt.with_param(k, *v))
    }

    #[test]
    fn test_well_formed() {
        assert_eq!(
            parse("text/plain; charset=\"utf-8\""),
            media("text/plain", &[("charset", "utf-8")])
        );
    }

    #[test]
    fn test_missing_subtype_filled() {
        assert_eq!(
            parse("text/;charset=utf-8"),
            media("text/plain", &[("charset", "utf-8")])
        );
        assert_eq!(parse("application/"), media("application/octet-stream", &[]));
        assert_eq!(
            parse("Multipart/; boundary=b"),
            media("multipart/mixed", &[("boundary", "b")])
        );
    }

    #[test]
    fn test_unknown_bare_type_synthesized() {
        assert_eq!(parse("image/; x=1"), media("", &[("x", "1")]));
    }

    #[test]
    fn test_leading_parameter() {
        assert_eq!(parse("; name=\"file.two\""), media("", &[("name", "file.two")]));
        assert_eq!(parse("name=foo.txt"), media("", &[("name", "foo.txt")]));
    }

    #[test]
    fn test_soft_empty() {
        assert!(parse("").is_empty());
        assert!(parse("   ").is_empty());
        assert!(parse(";").is_empty());
        assert!(parse("@@@").is_empty());
    }

    #[test]
    fn test_whitespace_and_extra_slashes() {
        assert_eq!(parse("text / html"), media("text/html", &[]));
        assert_eq!(
            parse("text/html/extra; charset=x"),
            media("text/html", &[("charset", "x")])
        );
    }

    #[test]
    fn test_bare_disposition() {
        assert_eq!(
            parse("inline; filename=x.png"),
            media("inline", &[("filename", "x.png")])
        );
    }

    #[test]
    fn test_trailing_html_stripped() {
        assert_eq!(
            parse("text/html; charset=utf-8<br>"),
            media("text/html", &[("charset", "utf-8")])
        );
        assert_eq!(
            parse("text/html; charset=utf-8 <br><p> "),
            media("text/html", &[("charset", "utf-8")])
        );
        assert_eq!(
            parse("text/html; name=\"a<b>\""),
            media("text/html", &[("name", "a<b>")])
        );
    }

    #[test]
    fn test_duplicate_parameters_first_wins() {
        assert_eq!(
            parse("text/plain; charset=a; CHARSET=b"),
            media("text/plain", &[("charset", "a")])
        );
    }

    #[test]
    fn test_invalid_names_and_empty_segments_dropped() {
        assert_eq!(
            parse("text/plain; b@d=1;; ;ok=2;"),
            media("text/plain", &[("ok", "2")])
        );
    }

    #[test]
    fn test_valueless_params() {
        let mt = parse("text/plain; format; charset=x; DelSp");
        assert_eq!(mt.params.get("charset").map(String::as_str), Some("x"));
        assert_eq!(mt.rejected, vec!["format", "delsp"]);

        let options = MediaTypeOptions {
            record_valueless_params: false,
        };
        let mt = parse_media_type_with("text/plain; format; charset=x", &options).unwrap();
        assert!(mt.rejected.is_empty());
        assert_eq!(mt.params.len(), 1);
    }

    #[test]
    fn test_valueless_name_shadowed_by_param() {
        let mt = parse("text/plain; title*0=a; title");
        assert_eq!(mt, media("text/plain", &[("title", "a")]));
    }

    #[test]
    fn test_unquoted_values_quoted() {
        assert_eq!(
            parse("attachment; filename=my file (1).txt"),
            media("attachment", &[("filename", "my file (1).txt")])
        );
        assert_eq!(
            parse(r"attachment; filename=C:\temp\a.txt"),
            media("attachment", &[("filename", r"C:\temp\a.txt")])
        );
    }

    #[test]
    fn test_unquoted_non_ascii_value() {
        assert_eq!(
            parse("attachment; filename=résumé.pdf"),
            media("attachment", &[("filename", "résumé.pdf")])
        );
    }

    #[test]
    fn test_embedded_quotes_escaped() {
        assert_eq!(
            parse(r#"attachment; filename="a "quoted" name.txt""#),
            media("attachment", &[("filename", r#"a "quoted" name.txt"#)])
        );
    }

    #[test]
    fn test_unterminated_quote_closed() {
        assert_eq!(
            parse(r#"attachment; filename="abc"#),
            media("attachment", &[("filename", "abc")])
        );
        assert_eq!(
            parse(r#"attachment; filename="abc\"#),
            media("attachment", &[("filename", r"abc\")])
        );
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!(
            parse("multipart/mixed;\r\n\tboundary=\"abc\""),
            media("multipart/mixed", &[("boundary", "abc")])
        );
        assert_eq!(
            parse("text/plain; name=\"a\r\nb\""),
            media("text/plain", &[("name", "a b")])
        );
    }

    #[test]
    fn test_encoded_word_value_decoded() {
        assert_eq!(
            parse("attachment; filename=\"=?UTF-8?B?w6k=?=\""),
            media("attachment", &[("filename", "é")])
        );
    }

    #[test]
    fn test_encoded_word_name_decoded() {
        assert_eq!(
            parse("text/plain; =?utf-8?q?charset?==utf-8"),
            media("text/plain", &[("charset", "utf-8")])
        );
    }

    #[test]
    fn test_valued_params_are_not_rejected() {
        let mt = parse("multipart/mixed; boundary=\"abc\"");
        assert_eq!(mt, media("multipart/mixed", &[("boundary", "abc")]));
        assert_eq!(mt.boundary(), Some("abc"));
        assert!(mt.rejected.is_empty());

        let mt = parse("text/;charset=utf-8");
        assert_eq!(mt.charset(), Some("utf-8"));
        assert!(mt.rejected.is_empty());
    }

    #[test]
    fn test_value_starting_with_equals() {
        let mt = parse("-==");
        assert_eq!(mt, media("", &[("-", "=")]));
        assert_eq!(parse(&mt.to_string()), mt);
    }

    #[test]
    fn test_encoded_name_with_q_escape_payload() {
        assert_eq!(
            parse("text/plain; =?utf-8?q?=41?==v"),
            media("text/plain", &[("a", "v")])
        );
        assert_eq!(encoded_name_end("=?utf-8?q?=41?==v"), Some(15));
        assert_eq!(encoded_name_end("=?utf-8?q?x"), None);
        assert_eq!(encoded_name_end("name=x"), None);
    }

    #[test]
    fn test_rfc2231_through_repair() {
        assert_eq!(
            parse("attachment; filename*=UTF-8''%e2%82%ac.txt"),
            media("attachment", &[("filename", "€.txt")])
        );
    }

    #[test]
    fn test_unrepairable_type_is_error() {
        let err = parse_media_type("text/pl@in; charset=utf-8").unwrap_err();
        assert!(matches!(err, MimeError::InvalidMediaType(_)));
        assert!(parse_media_type("text plain").is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        for input in [
            "text/plain; charset=utf-8",
            "; name=\"file.two\"",
            "text/plain; format; charset=x",
            "attachment; filename=résumé.pdf",
            r#"attachment; filename="a "quoted" name.txt""#,
            "attachment; filename=\"=?bogus\"",
            "text/plain; note=\"tab\there\"",
            "multipart/mixed; boundary=\"----=_Part_0_1\"",
        ] {
            let first = parse(input);
            let second = parse(&first.to_string());
            assert_eq!(second, first, "{input:?} -> {first}");
        }
    }
}
