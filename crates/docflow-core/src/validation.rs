//! Upload validation.
//!
//! Checks run before any bytes hit storage: size cap, declared
//! content-type allowlist, and a magic-byte cross-check so a renamed
//! binary cannot ride in under a text content type.

use crate::defaults::{ALLOWED_CONTENT_TYPES, UPLOAD_MAX_BYTES};

/// Reason an upload was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadRejection {
    /// Declared or detected content type is not accepted.
    InvalidType(String),
    /// Payload exceeds the configured byte cap.
    TooLarge { size: usize, max: usize },
    /// Payload is empty.
    Empty,
}

impl std::fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadRejection::InvalidType(ct) => {
                write!(f, "unsupported content type: {}", ct)
            }
            UploadRejection::TooLarge { size, max } => {
                write!(f, "upload of {} bytes exceeds limit of {} bytes", size, max)
            }
            UploadRejection::Empty => write!(f, "upload is empty"),
        }
    }
}

/// Validate an upload's declared content type and raw bytes.
///
/// The declared type must be on the allowlist. For formats `infer`
/// recognizes from magic bytes, the detected type must also be on the
/// allowlist; plain-text formats have no magic signature and pass on
/// the declared type alone.
pub fn validate_upload(content_type: &str, data: &[u8]) -> Result<(), UploadRejection> {
    if data.is_empty() {
        return Err(UploadRejection::Empty);
    }
    if data.len() > UPLOAD_MAX_BYTES {
        return Err(UploadRejection::TooLarge {
            size: data.len(),
            max: UPLOAD_MAX_BYTES,
        });
    }

    // Strip parameters like "; charset=utf-8" before matching.
    let declared = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if !ALLOWED_CONTENT_TYPES.contains(&declared.as_str()) {
        return Err(UploadRejection::InvalidType(declared));
    }

    if let Some(kind) = infer::get(data) {
        let detected = kind.mime_type();
        if !ALLOWED_CONTENT_TYPES.contains(&detected) {
            return Err(UploadRejection::InvalidType(detected.to_string()));
        }
    }

    Ok(())
}

/// Reduce a user-supplied filename to a safe basename.
///
/// Strips any path components and control characters. Returns
/// "upload" when nothing usable remains.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let trimmed = base.trim().trim_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
