//! Character encoding detection and text normalization.
//!
//! Detection order: byte-order marks, pure ASCII, a structural UTF-8 check, Windows-1252
//! control-range bytes, then the share of accented Latin bytes. Decoding is whole-buffer via
//! [`decode_with`] or chunked via [`DecodingReader`] for large files.

use std::io::{self, Read};

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use serde::Serialize;
use tracing::{debug, warn};

/// Encodings the detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Windows1252,
    Iso8859_1,
}

impl TextEncoding {
    pub const ALL: [TextEncoding; 7] = [
        TextEncoding::Utf8,
        TextEncoding::Utf16Le,
        TextEncoding::Utf16Be,
        TextEncoding::Utf32Le,
        TextEncoding::Utf32Be,
        TextEncoding::Windows1252,
        TextEncoding::Iso8859_1,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Utf32Le => "utf-32le",
            TextEncoding::Utf32Be => "utf-32be",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Iso8859_1 => "iso-8859-1",
        }
    }

    /// Parse a label (case-insensitive, common aliases accepted).
    pub fn from_label(label: &str) -> Option<Self> {
        let l = label.trim().to_ascii_lowercase().replace('_', "-");
        match l.as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => Some(TextEncoding::Utf8),
            "utf-16le" | "utf-16" | "utf16le" => Some(TextEncoding::Utf16Le),
            "utf-16be" | "utf16be" => Some(TextEncoding::Utf16Be),
            "utf-32le" | "utf-32" | "utf32le" => Some(TextEncoding::Utf32Le),
            "utf-32be" | "utf32be" => Some(TextEncoding::Utf32Be),
            "windows-1252" | "cp1252" | "x-cp1252" => Some(TextEncoding::Windows1252),
            "iso-8859-1" | "latin1" | "latin-1" | "l1" | "iso8859-1" => Some(TextEncoding::Iso8859_1),
            _ => None,
        }
    }

    fn bom(self) -> &'static [u8] {
        match self {
            TextEncoding::Utf8 => b"\xEF\xBB\xBF",
            TextEncoding::Utf16Le => b"\xFF\xFE",
            TextEncoding::Utf16Be => b"\xFE\xFF",
            TextEncoding::Utf32Le => b"\xFF\xFE\x00\x00",
            TextEncoding::Utf32Be => b"\x00\x00\xFE\xFF",
            TextEncoding::Windows1252 | TextEncoding::Iso8859_1 => b"",
        }
    }
}

// UTF-32LE must be tested before UTF-16LE: its BOM starts with the same two bytes.
const BOM_ORDER: [TextEncoding; 5] = [
    TextEncoding::Utf32Le,
    TextEncoding::Utf32Be,
    TextEncoding::Utf8,
    TextEncoding::Utf16Le,
    TextEncoding::Utf16Be,
];

/// Detect the encoding of a sampled byte prefix.
pub fn detect_encoding(sample: &[u8]) -> TextEncoding {
    if let Some(enc) = detect_bom(sample) {
        return enc;
    }
    if sample.is_ascii() {
        return TextEncoding::Utf8;
    }

    let (valid, invalid) = utf8_sequence_counts(sample);
    if invalid == 0 || invalid * 10 < valid {
        return TextEncoding::Utf8;
    }

    if sample.iter().any(|&b| is_windows_1252_control(b)) {
        return TextEncoding::Windows1252;
    }

    let accented = sample.iter().filter(|&&b| b >= 0xC0).count();
    if accented * 100 > sample.len() {
        return TextEncoding::Iso8859_1;
    }

    TextEncoding::Utf8
}

/// Encoding declared by a byte-order mark, if any.
pub fn detect_bom(sample: &[u8]) -> Option<TextEncoding> {
    BOM_ORDER.into_iter().find(|e| sample.starts_with(e.bom()))
}

/// Count well-formed and malformed multi-byte UTF-8 sequences.
///
/// A sequence cut off by the end of the sample is ignored rather than counted as invalid.
fn utf8_sequence_counts(sample: &[u8]) -> (usize, usize) {
    let mut valid = 0usize;
    let mut invalid = 0usize;
    let mut i = 0usize;

    while i < sample.len() {
        let b = sample[i];
        if b < 0x80 {
            i += 1;
            continue;
        }

        let (need, second_lo, second_hi) = match b {
            0xC2..=0xDF => (1, 0x80, 0xBF),
            0xE0 => (2, 0xA0, 0xBF),
            0xED => (2, 0x80, 0x9F),
            0xE1..=0xEF => (2, 0x80, 0xBF),
            0xF0 => (3, 0x90, 0xBF),
            0xF4 => (3, 0x80, 0x8F),
            0xF1..=0xF3 => (3, 0x80, 0xBF),
            _ => {
                invalid += 1;
                i += 1;
                continue;
            }
        };

        if i + need >= sample.len() {
            break;
        }

        let cont = &sample[i + 1..=i + need];
        let well_formed = (second_lo..=second_hi).contains(&cont[0])
            && cont[1..].iter().all(|c| (0x80..=0xBF).contains(c));
        if well_formed {
            valid += 1;
            i += need + 1;
        } else {
            invalid += 1;
            i += 1;
        }
    }

    (valid, invalid)
}

// 0x81, 0x8D, 0x8F, 0x90 and 0x9D are unassigned in Windows-1252.
fn is_windows_1252_control(b: u8) -> bool {
    (0x80..=0x9F).contains(&b) && !matches!(b, 0x81 | 0x8D | 0x8F | 0x90 | 0x9D)
}

/// Decode `bytes` using an encoding label.
///
/// Labels outside [`TextEncoding`] are resolved through the WHATWG label registry; unknown
/// labels fall back to UTF-8 (logged, never an error).
pub fn decode(bytes: &[u8], label: &str) -> String {
    if let Some(enc) = TextEncoding::from_label(label) {
        return decode_with(bytes, enc);
    }
    match Encoding::for_label(label.trim().as_bytes()) {
        Some(enc) => {
            let (text, _, had_errors) = enc.decode(bytes);
            if had_errors {
                debug!(label, "decoded with replacement characters");
            }
            text.into_owned()
        }
        None => {
            warn!(label, "unsupported encoding label, falling back to utf-8");
            decode_with(bytes, TextEncoding::Utf8)
        }
    }
}

/// Decode `bytes` with a known encoding. A BOM matching `encoding` is consumed.
pub fn decode_with(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Utf8 => UTF_8.decode_with_bom_removal(bytes).0.into_owned(),
        TextEncoding::Utf16Le => UTF_16LE.decode_with_bom_removal(bytes).0.into_owned(),
        TextEncoding::Utf16Be => UTF_16BE.decode_with_bom_removal(bytes).0.into_owned(),
        TextEncoding::Utf32Le | TextEncoding::Utf32Be => {
            let big_endian = encoding == TextEncoding::Utf32Be;
            let body = bytes.strip_prefix(encoding.bom()).unwrap_or(bytes);
            let mut out = String::with_capacity(body.len() / 4);
            let rest = decode_utf32_into(body, big_endian, &mut out);
            if !rest.is_empty() {
                out.push(char::REPLACEMENT_CHARACTER);
            }
            out
        }
        TextEncoding::Windows1252 => WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned(),
        TextEncoding::Iso8859_1 => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Decode whole 4-byte units into `out`, returning the trailing partial unit.
fn decode_utf32_into<'a>(bytes: &'a [u8], big_endian: bool, out: &mut String) -> &'a [u8] {
    let chunks = bytes.chunks_exact(4);
    let rest = chunks.remainder();
    for c in chunks {
        let unit = [c[0], c[1], c[2], c[3]];
        let cp = if big_endian {
            u32::from_be_bytes(unit)
        } else {
            u32::from_le_bytes(unit)
        };
        out.push(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    rest
}

/// Encode `text`. Characters that `encoding` cannot represent are replaced.
pub fn encode(text: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        TextEncoding::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        TextEncoding::Utf32Le => text.chars().flat_map(|c| (c as u32).to_le_bytes()).collect(),
        TextEncoding::Utf32Be => text.chars().flat_map(|c| (c as u32).to_be_bytes()).collect(),
        TextEncoding::Windows1252 => WINDOWS_1252.encode(text).0.into_owned(),
        TextEncoding::Iso8859_1 => text
            .chars()
            .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
            .collect(),
    }
}

/// Strip leading U+FEFF characters.
pub fn remove_bom(text: &str) -> &str {
    text.trim_start_matches('\u{FEFF}')
}

/// Map `\r\n` and lone `\r` to `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    let mut out = Vec::with_capacity(text.len());
    let mut pending_cr = false;
    push_normalized(&mut out, text.as_bytes(), &mut pending_cr);
    // Only ASCII bytes were removed or rewritten, so the buffer is still UTF-8.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Line-ending normalization that can resume across buffer boundaries.
fn push_normalized(out: &mut Vec<u8>, bytes: &[u8], pending_cr: &mut bool) {
    for &b in bytes {
        match b {
            b'\r' => {
                out.push(b'\n');
                *pending_cr = true;
            }
            b'\n' if *pending_cr => *pending_cr = false,
            _ => {
                *pending_cr = false;
                out.push(b);
            }
        }
    }
}

/// Detect, decode, strip BOMs and normalize line endings in one pass.
pub fn decode_text(bytes: &[u8], sample_len: usize) -> (TextEncoding, String) {
    let sample = &bytes[..bytes.len().min(sample_len)];
    let encoding = detect_encoding(sample);
    let decoded = decode_with(bytes, encoding);
    (encoding, normalize_line_endings(remove_bom(&decoded)))
}

enum StreamDecoder {
    Whatwg(Decoder),
    Latin1,
    Utf32 { big_endian: bool, carry: Vec<u8> },
}

impl StreamDecoder {
    fn new(encoding: TextEncoding) -> Self {
        match encoding {
            TextEncoding::Utf8 => Self::Whatwg(UTF_8.new_decoder_with_bom_removal()),
            TextEncoding::Utf16Le => Self::Whatwg(UTF_16LE.new_decoder_with_bom_removal()),
            TextEncoding::Utf16Be => Self::Whatwg(UTF_16BE.new_decoder_with_bom_removal()),
            TextEncoding::Windows1252 => Self::Whatwg(WINDOWS_1252.new_decoder_without_bom_handling()),
            TextEncoding::Iso8859_1 => Self::Latin1,
            TextEncoding::Utf32Le => Self::Utf32 { big_endian: false, carry: Vec::new() },
            TextEncoding::Utf32Be => Self::Utf32 { big_endian: true, carry: Vec::new() },
        }
    }

    fn decode(&mut self, mut src: &[u8], last: bool, dst: &mut String) {
        match self {
            Self::Whatwg(decoder) => loop {
                let needed = decoder
                    .max_utf8_buffer_length(src.len())
                    .unwrap_or(src.len() * 3 + 16);
                dst.reserve(needed);
                let (result, read, _) = decoder.decode_to_string(src, dst, last);
                src = &src[read..];
                if matches!(result, CoderResult::InputEmpty) {
                    break;
                }
            },
            Self::Latin1 => dst.extend(src.iter().map(|&b| b as char)),
            Self::Utf32 { big_endian, carry } => {
                carry.extend_from_slice(src);
                let rest = decode_utf32_into(carry, *big_endian, dst).len();
                let keep = carry.len() - rest;
                carry.drain(..keep);
                if last && !carry.is_empty() {
                    dst.push(char::REPLACEMENT_CHARACTER);
                    carry.clear();
                }
            }
        }
    }
}

/// A [`Read`] adapter yielding UTF-8 with BOMs removed and line endings normalized.
///
/// Input is consumed in fixed-size chunks, so peak memory is bounded by the chunk size rather
/// than the file size.
pub struct DecodingReader<R> {
    inner: R,
    decoder: StreamDecoder,
    in_buf: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
    scratch: String,
    pending_cr: bool,
    at_start: bool,
    finished: bool,
    consumed: u64,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: TextEncoding, chunk_size: usize) -> Self {
        Self {
            inner,
            decoder: StreamDecoder::new(encoding),
            in_buf: vec![0; chunk_size.max(16)],
            out: Vec::new(),
            pos: 0,
            scratch: String::new(),
            pending_cr: false,
            at_start: true,
            finished: false,
            consumed: 0,
        }
    }

    /// Raw (undecoded) bytes read from the inner reader so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    fn fill(&mut self) -> io::Result<()> {
        let n = loop {
            match self.inner.read(&mut self.in_buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        let last = n == 0;
        self.consumed += n as u64;

        self.scratch.clear();
        self.decoder.decode(&self.in_buf[..n], last, &mut self.scratch);

        let mut text = self.scratch.as_str();
        if self.at_start && !text.is_empty() {
            text = remove_bom(text);
            self.at_start = text.is_empty();
        }

        self.out.clear();
        self.pos = 0;
        push_normalized(&mut self.out, text.as_bytes(), &mut self.pending_cr);
        self.finished = last;
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.out.len() {
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = (self.out.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
