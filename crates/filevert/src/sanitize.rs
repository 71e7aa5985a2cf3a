//! Helpers for sanitizing data before it enters logs, errors and span attributes.
//!
//! Provider download URLs are pre-signed and object-storage URLs may carry
//! credentials, so neither is logged verbatim.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maximum length for response bodies kept in errors and logs.
pub const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Strips userinfo and the query string from a URL.
///
/// - `https://s3.example.com/bucket/out.docx?X-Amz-Signature=abc` → `https://s3.example.com/bucket/out.docx?****`
/// - `https://user:pw@host/path` → `https://****@host/path`
/// - `https://host/path` → `https://host/path` (no change)
pub fn redact_url(url: &str) -> String {
    let (base, had_query) = match url.find('?') {
        Some(pos) => (&url[..pos], true),
        None => (url, false),
    };

    let mut redacted = base.to_string();
    if let Some(scheme_end) = base.find("://") {
        let after_scheme = &base[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &base[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            redacted = format!("{}****@{}", scheme, after_at);
        }
    }

    if had_query {
        redacted.push_str("?****");
    }
    redacted
}

/// Truncates a response body to [`MAX_ERROR_BODY_LENGTH`] bytes on a char boundary.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.trim().to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

/// Returns a short deterministic hash of an identifier for correlation
/// without exposing the identifier itself.
pub fn hash_id(id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
