//! Data model types produced by the parsers.

pub mod media_type;

pub use media_type::MediaType;
