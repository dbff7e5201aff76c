//! Tolerant decoding of real-world MIME.
//!
//! The crate provides the low-level pieces a mail processor needs to read
//! non-conformant messages without giving up on them: a streaming multipart
//! boundary reader, a media-type parser that repairs broken
//! `Content-Type`/`Content-Disposition` values, an RFC 2047 encoded-word
//! decoder, and cleaners that make sloppy base64 and quoted-printable
//! bodies decodable.

pub mod coding;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;

pub use error::{MimeError, Result};
pub use model::MediaType;
pub use parser::boundary::BoundaryReader;
pub use parser::header::decode_encoded_words;
pub use parser::mediatype::{parse_media_type, parse_media_type_with, MediaTypeOptions};
