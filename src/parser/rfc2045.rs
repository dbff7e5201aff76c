//! Strict RFC 2045 media-type grammar with RFC 2231 parameter extensions.
//!
//! This is the parser of last resort: it accepts only well-formed values.
//! The tolerant front end in [`crate::parser::mediatype`] repairs input
//! before handing it here.

use std::collections::BTreeMap;

use tracing::debug;

use crate::coding::charset;
use crate::error::{MimeError, Result};

/// Parameter map, keyed by lower-cased name.
pub type Params = BTreeMap<String, String>;

/// Parse `type/subtype; name=value; ...` (or a bare disposition token such
/// as `attachment; filename=x`).
///
/// The media type and parameter names are lower-cased. A trailing `;` is
/// ignored. The same name given twice with different values is an error.
pub fn parse_strict(value: &str) -> Result<(String, Params)> {
    let split = value.find(';').unwrap_or(value.len());
    let (base, mut rest) = value.split_at(split);
    let media_type = base.trim().to_ascii_lowercase();
    check_media_type(&media_type)?;

    let mut params = Params::new();
    let mut extended: BTreeMap<String, Params> = BTreeMap::new();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let Some((name, value, remainder)) = consume_param(rest) else {
            if rest.trim() == ";" {
                break;
            }
            return Err(MimeError::InvalidParameter(rest.to_string()));
        };

        let target = match name.split_once('*') {
            Some((base_name, _)) => extended.entry(base_name.to_string()).or_default(),
            None => &mut params,
        };
        if target.get(&name).is_some_and(|existing| *existing != value) {
            return Err(MimeError::InvalidParameter(format!(
                "duplicate parameter name {name:?}"
            )));
        }
        target.insert(name, value);
        rest = remainder;
    }

    for (name, pieces) in extended {
        if name.is_empty() {
            debug!("Dropping RFC 2231 parameter without a base name");
            continue;
        }
        match assemble_extended(&name, &pieces) {
            Some(value) => {
                params.insert(name, value);
            }
            None => debug!(param = %name, "Dropping undecodable RFC 2231 parameter"),
        }
    }

    Ok((media_type, params))
}

/// RFC 2045 `tspecials`.
pub fn is_tspecial(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
    )
}

/// Printable ASCII other than space and `tspecials`.
pub fn is_token_char(c: char) -> bool {
    matches!(c, '!'..='~') && !is_tspecial(c)
}

/// A non-empty run of token characters.
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_token_char)
}

fn check_media_type(s: &str) -> Result<()> {
    let (main, rest) = consume_token(s);
    if main.is_empty() {
        return Err(MimeError::NoMediaType);
    }
    if rest.is_empty() {
        return Ok(());
    }
    let Some(rest) = rest.strip_prefix('/') else {
        return Err(MimeError::InvalidMediaType(format!(
            "expected slash after {main:?} in {s:?}"
        )));
    };
    let (sub, rest) = consume_token(rest);
    if sub.is_empty() {
        return Err(MimeError::InvalidMediaType(format!(
            "expected token after slash in {s:?}"
        )));
    }
    if !rest.is_empty() {
        return Err(MimeError::InvalidMediaType(format!(
            "unexpected {rest:?} after subtype in {s:?}"
        )));
    }
    Ok(())
}

fn consume_token(v: &str) -> (&str, &str) {
    let end = v.find(|c: char| !is_token_char(c)).unwrap_or(v.len());
    v.split_at(end)
}

/// `; name = value`, returning the lower-cased name, the unquoted value and
/// the remaining input.
fn consume_param(v: &str) -> Option<(String, String, &str)> {
    let rest = v.trim_start().strip_prefix(';')?.trim_start();
    let (name, rest) = consume_token(rest);
    if name.is_empty() {
        return None;
    }
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let (value, rest) = consume_value(rest)?;
    Some((name.to_ascii_lowercase(), value, rest))
}

fn consume_value(v: &str) -> Option<(String, &str)> {
    if let Some(quoted) = v.strip_prefix('"') {
        return consume_quoted(quoted);
    }
    let (token, rest) = consume_token(v);
    if token.is_empty() {
        None
    } else {
        Some((token.to_string(), rest))
    }
}

/// Body of a quoted-string, after the opening quote.
fn consume_quoted(v: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = v.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &v[i + 1..])),
            '\\' => match chars.peek() {
                Some(&(_, next)) if is_tspecial(next) => {
                    out.push(next);
                    chars.next();
                }
                // MSIE sends unescaped Windows paths; keep the backslash.
                _ => out.push('\\'),
            },
            '\r' | '\n' => return None,
            _ => out.push(c),
        }
    }
    None
}

/// Join `name*`, `name*0`, `name*1*`, ... into one value.
fn assemble_extended(name: &str, pieces: &Params) -> Option<String> {
    if let Some(value) = pieces.get(&format!("{name}*")) {
        return decode_extended(value);
    }

    let mut charset_label = None;
    let mut bytes = Vec::new();
    let mut found = false;
    for n in 0usize.. {
        let simple = format!("{name}*{n}");
        if let Some(value) = pieces.get(&simple) {
            bytes.extend_from_slice(value.as_bytes());
            found = true;
            continue;
        }
        let Some(value) = pieces.get(&format!("{simple}*")) else {
            break;
        };
        found = true;
        if n == 0 {
            if let Some((label, encoded)) = split_extended(value) {
                if let Some(decoded) = percent_decode(encoded) {
                    charset_label = Some(label);
                    bytes.extend(decoded);
                }
            }
        } else if let Some(decoded) = percent_decode(value) {
            bytes.extend(decoded);
        }
    }

    if !found {
        return None;
    }
    match charset_label {
        Some(label) => charset::to_utf8(label, &bytes).ok(),
        None => Some(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

/// `charset'language'percent-encoded`
fn decode_extended(value: &str) -> Option<String> {
    let (label, encoded) = split_extended(value)?;
    let bytes = percent_decode(encoded)?;
    charset::to_utf8(label, &bytes).ok()
}

fn split_extended(value: &str) -> Option<(&str, &str)> {
    let mut parts = value.splitn(3, '\'');
    let label = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    if label.is_empty() {
        return None;
    }
    Some((label, encoded))
}

fn percent_decode(s: &str) -> Option<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}
