//! Parsed `Content-Type` / `Content-Disposition` value.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::MimeError;
use crate::parser::header::encode_b;
use crate::parser::mediatype::parse_media_type;
use crate::parser::rfc2045::is_token;

/// A media type (or disposition) with its parameters.
///
/// Produced by [`parse_media_type`]. `Display` writes a header value that
/// parses back to an equal descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MediaType {
    /// Lower-cased `type/subtype` or disposition token.
    /// Empty when the header carried no usable type.
    pub essence: String,

    /// Parameters keyed by lower-cased name.
    pub params: BTreeMap<String, String>,

    /// Names of parameters that appeared without a value, in input order.
    pub rejected: Vec<String>,
}

impl MediaType {
    /// A descriptor with no parameters.
    pub fn new(essence: impl Into<String>) -> Self {
        Self {
            essence: essence.into().to_ascii_lowercase(),
            ..Self::default()
        }
    }

    /// Builder-style parameter insertion; the name is lower-cased.
    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// The part before `/` (`text` for `text/plain`).
    pub fn main_type(&self) -> &str {
        self.essence.split('/').next().unwrap_or_default()
    }

    /// The part after `/`, if any.
    pub fn sub_type(&self) -> Option<&str> {
        self.essence.split_once('/').map(|(_, sub)| sub)
    }

    /// Look up a parameter (case-insensitive).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The multipart boundary, if present and non-empty.
    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    /// `filename`, falling back to the older `name` parameter.
    pub fn filename(&self) -> Option<&str> {
        self.param("filename").or_else(|| self.param("name"))
    }

    pub fn is_multipart(&self) -> bool {
        self.main_type() == "multipart"
    }

    /// `true` for the soft-empty result of a header with no information.
    pub fn is_empty(&self) -> bool {
        self.essence.is_empty() && self.params.is_empty() && self.rejected.is_empty()
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.essence)?;
        for (name, value) in &self.params {
            write!(f, "; {name}=")?;
            write_value(f, value)?;
        }
        for name in &self.rejected {
            write!(f, "; {name}")?;
        }
        Ok(())
    }
}

impl FromStr for MediaType {
    type Err = MimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_media_type(s)
    }
}

/// Token values are written bare. Values a header cannot carry literally
/// become a quoted `B` encoded-word; the rest are quoted.
fn write_value(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    if is_token(value) {
        return f.write_str(value);
    }
    if value.contains("=?") || value.chars().any(|c| !c.is_ascii() || c.is_ascii_control()) {
        return write!(f, "\"{}\"", encode_b(value));
    }
    f.write_str("\"")?;
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}
