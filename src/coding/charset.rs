//! Charset conversion: named charset + raw bytes → UTF-8.
//!
//! Label resolution is delegated to `encoding_rs` (WHATWG labels), with a
//! short alias table for names that real mail uses but WHATWG does not list.

use encoding_rs::Encoding;
use tracing::warn;

use crate::error::{MimeError, Result};

/// Labels seen in the wild that `Encoding::for_label` does not know.
const ALIASES: &[(&str, &str)] = &[
    ("cp932", "shift_jis"),
    ("cp936", "gbk"),
    ("cp949", "euc-kr"),
    ("cp950", "big5"),
    ("utf8mb4", "utf-8"),
    ("unknown", "windows-1252"),
    ("unknown-8bit", "windows-1252"),
    ("x-unknown", "windows-1252"),
];

/// Resolve a charset label to an `encoding_rs` encoding.
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    let label = label.trim().trim_matches('"').trim();
    if label.is_empty() {
        return None;
    }
    if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
        return Some(encoding);
    }
    let lower = label.to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .and_then(|(_, target)| Encoding::for_label(target.as_bytes()))
}

/// Whether `label` names a charset we can convert from.
pub fn is_supported(label: &str) -> bool {
    lookup(label).is_some()
}

/// Convert `bytes` in the named charset to a UTF-8 string.
///
/// Unknown labels yield [`MimeError::UnsupportedEncoding`]; bytes that are
/// malformed for the charset yield [`MimeError::CharsetConversion`].
pub fn to_utf8(charset: &str, bytes: &[u8]) -> Result<String> {
    let Some(encoding) = lookup(charset) else {
        warn!(charset = charset, "Unknown charset");
        return Err(MimeError::UnsupportedEncoding(charset.to_string()));
    };

    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| MimeError::CharsetConversion {
            charset: encoding.name().to_string(),
        })
}
