//! Acceptance rule for CSR uploads.
//!
//! A transport hands the issuer whatever the client declared about the
//! upload. The rule is deliberately loose: it filters out obvious mistakes
//! (a PDF, a zip) while the decoder does the real validation.

use crate::error::{IssuerError, Result};

/// MIME type for PEM files.
pub const PEM_CONTENT_TYPE: &str = "application/x-pem-file";

/// Filename suffixes accepted regardless of content type.
pub const CSR_FILE_SUFFIXES: [&str; 2] = [".csr", ".pem"];

/// Accept when the content type is [`PEM_CONTENT_TYPE`] or the filename
/// ends in `.csr` / `.pem`. Both checks are case-insensitive; content type
/// parameters (`; charset=...`) are ignored.
pub fn check_upload(content_type: Option<&str>, filename: Option<&str>) -> Result<()> {
    let pem_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().eq_ignore_ascii_case(PEM_CONTENT_TYPE))
        .unwrap_or(false);

    let csr_name = filename
        .map(|name| {
            let name = name.to_ascii_lowercase();
            CSR_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        })
        .unwrap_or(false);

    if pem_type || csr_name {
        Ok(())
    } else {
        Err(IssuerError::RejectedUpload(format!(
            "Expected a PEM file or a .csr/.pem filename (content type: {}, filename: {})",
            content_type.unwrap_or("none"),
            filename.unwrap_or("none")
        )))
    }
}

/// Turn a Common Name into a safe download filename stem.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`; leading dots are stripped
/// so the result is never hidden or a relative path.
pub fn sanitize_file_stem(common_name: &str) -> String {
    let cleaned: String = common_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "certificate".to_string()
    } else {
        trimmed.to_string()
    }
}
