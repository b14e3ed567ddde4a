//! Content-based file type detection.
//!
//! The declared extension and the browser-supplied MIME type are hints at best. [`sniff`]
//! inspects magic numbers in the leading bytes and decides which parser family will actually
//! read the file.

use serde::Serialize;

use crate::config::ImportConfig;
use crate::error::{ImportError, ImportResult};

pub const MIME_CSV: &str = "text/csv";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_XLS: &str = "application/vnd.ms-excel";
pub const MIME_ODS: &str = "application/vnd.oasis.opendocument.spreadsheet";
pub const MIME_ZIP: &str = "application/zip";
pub const MIME_OLE: &str = "application/x-ole-storage";

/// Container family identified from content bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentFamily {
    /// ZIP container (`.xlsx`, `.ods`).
    Zip,
    /// OLE2 compound document (`.xls`).
    Ole,
    /// A recognised signature that is not a spreadsheet.
    Foreign(&'static str),
}

impl ContentFamily {
    fn mime(self) -> &'static str {
        match self {
            ContentFamily::Zip => MIME_ZIP,
            ContentFamily::Ole => MIME_OLE,
            ContentFamily::Foreign(mime) => mime,
        }
    }
}

/// Which parser reads the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileKind {
    DelimitedText,
    Workbook,
}

const SIGNATURES: &[(&[u8], ContentFamily)] = &[
    (b"PK\x03\x04", ContentFamily::Zip),
    (b"PK\x05\x06", ContentFamily::Zip),
    (b"PK\x07\x08", ContentFamily::Zip),
    (b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1", ContentFamily::Ole),
    (b"%PDF-", ContentFamily::Foreign("application/pdf")),
    (b"\x89PNG\r\n\x1A\n", ContentFamily::Foreign("image/png")),
    (b"\xFF\xD8\xFF", ContentFamily::Foreign("image/jpeg")),
    (b"GIF87a", ContentFamily::Foreign("image/gif")),
    (b"GIF89a", ContentFamily::Foreign("image/gif")),
    (b"\x1F\x8B", ContentFamily::Foreign("application/gzip")),
    (b"\x7FELF", ContentFamily::Foreign("application/x-executable")),
    (b"MZ", ContentFamily::Foreign("application/x-msdownload")),
    (b"Rar!\x1A\x07", ContentFamily::Foreign("application/vnd.rar")),
    (b"7z\xBC\xAF\x27\x1C", ContentFamily::Foreign("application/x-7z-compressed")),
];

/// Outcome of [`sniff`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SniffReport {
    pub is_valid: bool,
    /// MIME type implied by the content, if any signature or text fallback applied.
    pub detected_mime: Option<String>,
    /// Lower-case extension taken from the file name.
    pub extension: String,
    /// Canonical MIME type for the extension.
    pub mime_type: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Parser family to use; `None` when the file is rejected.
    pub kind: Option<FileKind>,
}

/// An accepted file: parser family, content type and non-fatal findings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileCheck {
    pub kind: FileKind,
    pub detected_mime: &'static str,
    /// Extension/content mismatches and a declared type that disagrees with the extension.
    pub warnings: Vec<String>,
}

/// Detect the type of a file from its name and leading bytes.
///
/// `declared_mime` is the type claimed by the uploader; it only ever produces warnings.
pub fn sniff(
    file_name: &str,
    prefix: &[u8],
    declared_mime: Option<&str>,
    config: &ImportConfig,
) -> SniffReport {
    let extension = extension_of(file_name).unwrap_or_default();
    let mime_type = mime_for_extension(&extension).to_string();
    let mut report = SniffReport {
        is_valid: false,
        detected_mime: None,
        extension,
        mime_type,
        errors: Vec::new(),
        warnings: Vec::new(),
        kind: None,
    };

    match check_file(file_name, prefix, declared_mime, config) {
        Ok(check) => {
            report.is_valid = true;
            report.kind = Some(check.kind);
            report.detected_mime = Some(check.detected_mime.to_string());
            report.warnings = check.warnings;
        }
        Err(e) => {
            report.errors.push(e.to_string());
            report.warnings.extend(declared_mime_warning(&report.extension, declared_mime));
        }
    }
    report
}

/// Like [`sniff`] but returns the structured rejection, or the kind plus non-fatal warnings.
pub fn check_file(
    file_name: &str,
    prefix: &[u8],
    declared_mime: Option<&str>,
    config: &ImportConfig,
) -> ImportResult<FileCheck> {
    let (kind, detected_mime, mut warnings) = classify(file_name, prefix, config)?;
    let extension = extension_of(file_name).unwrap_or_default();
    warnings.extend(declared_mime_warning(&extension, declared_mime));
    Ok(FileCheck {
        kind,
        detected_mime,
        warnings,
    })
}

fn declared_mime_warning(extension: &str, declared_mime: Option<&str>) -> Option<String> {
    let declared = declared_mime.map(str::trim).filter(|m| !m.is_empty())?;
    (!declared_mime_matches(extension, declared)).then(|| {
        format!("declared type '{declared}' does not match '.{extension}' (content is checked instead)")
    })
}

fn classify(
    file_name: &str,
    prefix: &[u8],
    config: &ImportConfig,
) -> ImportResult<(FileKind, &'static str, Vec<String>)> {
    let extension = extension_of(file_name).ok_or_else(|| ImportError::MissingExtension {
        file_name: file_name.to_string(),
    })?;
    if !config.accepts_extension(&extension) || !is_spreadsheet_extension(&extension) {
        return Err(ImportError::UnsupportedExtension {
            extension,
            accepted: config.accepted_list(),
        });
    }

    let mut warnings = Vec::new();
    match detect_family(prefix) {
        None if extension == "csv" => Ok((FileKind::DelimitedText, MIME_CSV, warnings)),
        None => Err(ImportError::UndetectedFileType { extension }),
        Some(ContentFamily::Foreign(mime)) => Err(ImportError::DisallowedContent {
            detected: mime.to_string(),
        }),
        Some(family) => {
            let expected = match family {
                ContentFamily::Zip => matches!(extension.as_str(), "xlsx" | "ods"),
                ContentFamily::Ole => extension == "xls",
                ContentFamily::Foreign(_) => false,
            };
            if !expected {
                warnings.push(format!(
                    "'.{extension}' file contains {} data; reading it as a workbook",
                    family.mime()
                ));
            }
            Ok((FileKind::Workbook, family.mime(), warnings))
        }
    }
}

/// Lower-case text after the last `.`, if non-empty.
pub fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// First matching signature in `prefix`.
pub fn detect_family(prefix: &[u8]) -> Option<ContentFamily> {
    SIGNATURES
        .iter()
        .find(|(magic, _)| prefix.starts_with(magic) && (*magic != DOS_MAGIC || is_binary_header(prefix)))
        .map(|(_, family)| *family)
}

/// Two bytes are too weak on their own: `MZ Region,value` is a valid header line.
const DOS_MAGIC: &[u8] = b"MZ";

/// Whether the first bytes contain NULs or control characters that plain text would not.
fn is_binary_header(prefix: &[u8]) -> bool {
    prefix
        .iter()
        .take(64)
        .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r'))
}

fn is_spreadsheet_extension(ext: &str) -> bool {
    matches!(ext, "csv" | "xlsx" | "xls" | "ods")
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "csv" => MIME_CSV,
        "xlsx" => MIME_XLSX,
        "xls" => MIME_XLS,
        "ods" => MIME_ODS,
        _ => "application/octet-stream",
    }
}

fn declared_mime_matches(ext: &str, declared: &str) -> bool {
    let declared = declared.to_ascii_lowercase();
    match ext {
        // Browsers report CSV under a zoo of names, including the Excel one.
        "csv" => matches!(
            declared.as_str(),
            "text/csv" | "text/plain" | "application/csv" | "text/comma-separated-values"
                | "application/vnd.ms-excel"
        ),
        "xlsx" => declared == MIME_XLSX || declared == MIME_ZIP,
        "xls" => declared == MIME_XLS,
        "ods" => declared == MIME_ODS || declared == MIME_ZIP,
        _ => false,
    }
}
