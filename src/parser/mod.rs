//! MIME parsing: multipart boundary scanning, media types, and header decoding.

pub mod boundary;
pub mod header;
pub mod mediatype;
pub mod rfc2045;
pub mod source;
