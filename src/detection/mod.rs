//! Content detection: what a file really is, and how its text is encoded.
//!
//! - [`sniff`]: magic-number file type detection
//! - [`encoding`]: encoding detection, decoding and text normalization

pub mod encoding;
pub mod sniff;

pub use encoding::{
    decode, decode_text, decode_with, detect_encoding, encode, normalize_line_endings, remove_bom,
    DecodingReader, TextEncoding,
};
pub use sniff::{check_file, sniff, ContentFamily, FileCheck, FileKind, SniffReport};
