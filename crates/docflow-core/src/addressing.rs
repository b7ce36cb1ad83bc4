//! Content-addressed storage key derivation.
//!
//! Keys are a pure function of `(content_hash, extension, owner_id)`:
//! no I/O, no randomness, no timestamps. A prior design that folded the
//! current time into the key produced a different path on every call,
//! so the path computed at job creation never matched the path the
//! bytes were stored at. Nothing non-deterministic may enter here.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Compute the BLAKE3 hash of raw bytes with a `blake3:` prefix.
pub fn compute_content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("blake3:{}", hash.to_hex())
}

/// Sanitize a file extension for use in a storage key.
///
/// Lowercases, strips a leading dot, keeps ASCII alphanumerics only,
/// and bounds the length. Empty or fully-stripped extensions become
/// `"bin"`.
pub fn sanitize_extension(extension: &str) -> String {
    let cleaned: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(16)
        .collect();
    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned
    }
}

/// Derive the object-store key for a raw document.
///
/// Layout: `objects/{owner_id}/{h0h1}/{h2h3}/{hex}.{ext}` where `hex`
/// is the hash digits of `content_hash` (prefix stripped). Two calls
/// with identical inputs always yield an identical key, so re-uploads
/// of the same bytes by the same owner resolve to the same location.
/// Rejects hashes whose hex part is too short to shard into the
/// two-level directory fan-out.
pub fn derive_key(content_hash: &str, extension: &str, owner_id: Uuid) -> Result<String> {
    let hex = checked_hex(content_hash)?;
    let ext = sanitize_extension(extension);
    Ok(format!(
        "objects/{}/{}/{}/{}.{}",
        owner_id,
        &hex[0..2],
        &hex[2..4],
        hex,
        ext
    ))
}

/// Derive the object-store key for parsed text, addressed by the hash
/// of the *source* document so re-parsing lands on the same key.
pub fn derive_parsed_key(content_hash: &str, owner_id: Uuid) -> Result<String> {
    let hex = checked_hex(content_hash)?;
    Ok(format!(
        "parsed/{}/{}/{}/{}.txt",
        owner_id,
        &hex[0..2],
        &hex[2..4],
        hex
    ))
}

/// Strip the algorithm prefix and validate the remaining hex digits.
fn checked_hex(content_hash: &str) -> Result<&str> {
    let hex = content_hash
        .split_once(':')
        .map(|(_, hex)| hex)
        .unwrap_or(content_hash);
    if hex.len() < 4 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidInput(format!(
            "malformed content hash: {:?}",
            content_hash
        )));
    }
    Ok(hex)
}
