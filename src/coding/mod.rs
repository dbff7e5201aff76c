//! Byte-level decoding helpers: charset conversion and transfer-encoding cleaners.

pub mod base64;
pub mod charset;
pub mod quoted_printable;
