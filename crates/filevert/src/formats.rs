//! Static conversion tables.
//!
//! Format tokens are canonical upper-case (`PDF`, `DOCX`); lookups are
//! case-insensitive. Nothing here is mutated at runtime.

use std::path::Path;

/// MIME type served for formats missing from [`EXTENSION_MIME_TYPES`].
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const ODT: &str = "application/vnd.oasis.opendocument.text";
const ODS: &str = "application/vnd.oasis.opendocument.spreadsheet";
const ODP: &str = "application/vnd.oasis.opendocument.presentation";

/// Source MIME type → target formats it may be converted to.
pub const SUPPORTED_CONVERSIONS: &[(&str, &[&str])] = &[
    (
        "application/pdf",
        &["DOCX", "DOC", "XLSX", "PPTX", "TXT", "ODT", "RTF", "JPG", "PNG"],
    ),
    (DOCX, &["PDF", "DOC", "ODT", "TXT", "RTF"]),
    ("application/msword", &["PDF", "DOCX", "ODT", "TXT", "RTF"]),
    (ODT, &["PDF", "DOCX", "DOC", "TXT", "RTF"]),
    ("application/rtf", &["PDF", "DOCX", "DOC", "ODT", "TXT"]),
    ("text/plain", &["PDF", "DOCX", "DOC", "ODT", "RTF"]),
    (XLSX, &["PDF", "ODS", "CSV"]),
    ("application/vnd.ms-excel", &["PDF", "XLSX", "ODS", "CSV"]),
    (ODS, &["PDF", "XLSX", "CSV"]),
    ("text/csv", &["PDF", "XLSX", "ODS"]),
    (PPTX, &["PDF", "ODP"]),
    ("application/vnd.ms-powerpoint", &["PDF", "PPTX", "ODP"]),
    (ODP, &["PDF", "PPTX"]),
    ("image/jpeg", &["PDF", "PNG", "WEBP"]),
    ("image/png", &["PDF", "JPG", "WEBP"]),
    ("image/webp", &["PDF", "JPG", "PNG"]),
];

/// Lower-case extension → MIME type.
pub const EXTENSION_MIME_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("docx", DOCX),
    ("doc", "application/msword"),
    ("odt", ODT),
    ("txt", "text/plain"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("xlsx", XLSX),
    ("pptx", PPTX),
    ("ods", ODS),
    ("odp", ODP),
    ("rtf", "application/rtf"),
    ("csv", "text/csv"),
    ("webp", "image/webp"),
];

/// Canonicalizes a user-supplied format token: trims, drops a leading dot
/// and upper-cases. Returns `None` for empty or non-alphanumeric input.
pub fn normalize_format(token: &str) -> Option<String> {
    let token = token.trim().trim_start_matches('.');
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(token.to_ascii_uppercase())
}

/// Target formats allowed for `mime_type`, or `None` when the source type
/// is not convertible.
pub fn supported_targets(mime_type: &str) -> Option<&'static [&'static str]> {
    let essence = mime_essence(mime_type);
    SUPPORTED_CONVERSIONS
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(essence))
        .map(|(_, targets)| *targets)
}

/// Whether `mime_type` may be converted to `target_format`.
pub fn is_conversion_supported(mime_type: &str, target_format: &str) -> bool {
    let Some(target) = normalize_format(target_format) else {
        return false;
    };
    supported_targets(mime_type).is_some_and(|targets| targets.contains(&target.as_str()))
}

/// MIME type for a format token, falling back to `application/octet-stream`.
pub fn mime_for_format(format: &str) -> &'static str {
    let ext = format.trim().trim_start_matches('.');
    EXTENSION_MIME_TYPES
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
        .unwrap_or(FALLBACK_MIME_TYPE)
}

/// Format token for a MIME type, using the first matching extension.
pub fn format_for_mime(mime_type: &str) -> Option<String> {
    let essence = mime_essence(mime_type);
    EXTENSION_MIME_TYPES
        .iter()
        .find(|(_, mime)| mime.eq_ignore_ascii_case(essence))
        .map(|(ext, _)| ext.to_ascii_uppercase())
}

/// Format token from a file name's extension (`report.Pdf` → `PDF`).
pub fn format_from_file_name(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(normalize_format)
}

/// Guesses a MIME type from a file name, for uploads that arrive without
/// a usable content type.
pub fn guess_mime_type(file_name: &str) -> String {
    let by_table = format_from_file_name(file_name)
        .map(|f| mime_for_format(&f))
        .filter(|m| *m != FALLBACK_MIME_TYPE);
    match by_table {
        Some(mime) => mime.to_string(),
        None => mime_guess::from_path(file_name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string()),
    }
}

/// Name of a conversion result: the source stem with the target extension.
pub fn result_file_name(source_file_name: &str, target_format: &str) -> String {
    let stem = Path::new(source_file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("converted");
    format!("{}.{}", stem, target_format.trim().to_ascii_lowercase())
}

fn mime_essence(mime_type: &str) -> &str {
    mime_type.split(';').next().unwrap_or_default().trim()
}
