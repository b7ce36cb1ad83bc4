//! Degraded local text extraction.
//!
//! When the external service rejects a document and the failure is not
//! worth retrying, the pipeline can fall back to a best-effort local
//! extraction so the document still becomes searchable. The output is
//! always marked `degraded = true` so callers can distinguish it from
//! a real parse.

use regex::Regex;
use tracing::debug;

use docflow_core::ParsedText;

/// Extract plain text locally from raw document bytes.
///
/// Text-like content types get a lossy UTF-8 decode; HTML additionally
/// has tags stripped. Binary formats still yield whatever printable
/// text survives the decode, which is crude but better than nothing.
pub fn extract_plain_text(data: &[u8], content_type: &str) -> ParsedText {
    let decoded = String::from_utf8_lossy(data);

    let text = if content_type.starts_with("text/html") {
        strip_html(&decoded)
    } else {
        decoded.into_owned()
    };

    let text = scrub(&text);

    debug!(
        subsystem = "parse",
        component = "fallback",
        content_type,
        input_bytes = data.len(),
        output_chars = text.len(),
        "degraded local extraction"
    );

    ParsedText {
        text,
        degraded: true,
    }
}

/// Remove script/style blocks and tags, leaving the visible text.
fn strip_html(html: &str) -> String {
    let block_re = Regex::new(r"(?is)<(script|style)\b.*?</(script|style)>").unwrap();
    let tag_re = Regex::new(r"(?s)<[^>]*>").unwrap();

    let without_blocks = block_re.replace_all(html, " ");
    tag_re.replace_all(&without_blocks, " ").into_owned()
}

/// Drop control characters and the UTF-8 replacement character,
/// collapse runs of whitespace, and trim.
fn scrub(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c == '\u{FFFD}' || (c.is_control() && c != '\n') {
            pending_space = true;
            continue;
        }
        if c == ' ' || c == '\t' {
            pending_space = true;
            continue;
        }
        if c == '\n' {
            // Preserve line breaks so paragraph chunking still works.
            while out.ends_with(' ') {
                out.pop();
            }
            out.push('\n');
            pending_space = false;
            continue;
        }
        if pending_space && !out.is_empty() && !out.ends_with('\n') {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out.trim_matches(['\n', ' ']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        let out = extract_plain_text(b"Hello world.\n\nSecond paragraph.", "text/plain");
        assert!(out.degraded);
        assert_eq!(out.text, "Hello world.\n\nSecond paragraph.");
    }

    #[test]
    fn test_invalid_utf8_is_lossy_not_fatal() {
        let mut data = b"valid ".to_vec();
        data.extend_from_slice(&[0xFF, 0xFE]);
        data.extend_from_slice(b" tail");
        let out = extract_plain_text(&data, "text/plain");
        assert!(out.text.contains("valid"));
        assert!(out.text.contains("tail"));
        assert!(!out.text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_html_tags_stripped() {
        let html = b"<html><head><style>p{color:red}</style></head>\
                     <body><p>First.</p><p>Second.</p></body></html>";
        let out = extract_plain_text(html, "text/html");
        assert!(out.text.contains("First."));
        assert!(out.text.contains("Second."));
        assert!(!out.text.contains('<'));
        assert!(!out.text.contains("color:red"));
    }

    #[test]
    fn test_script_content_removed() {
        let html = b"<body><script>alert('x')</script><p>Visible</p></body>";
        let out = extract_plain_text(html, "text/html");
        assert!(out.text.contains("Visible"));
        assert!(!out.text.contains("alert"));
    }

    #[test]
    fn test_whitespace_collapsed() {
        let out = extract_plain_text(b"a   \t b", "text/plain");
        assert_eq!(out.text, "a b");
    }

    #[test]
    fn test_binary_junk_yields_printable_remnants() {
        let mut data = vec![0x00, 0x01, 0x02];
        data.extend_from_slice(b"Readable fragment");
        data.extend_from_slice(&[0x03, 0x04]);
        let out = extract_plain_text(&data, "application/pdf");
        assert!(out.text.contains("Readable fragment"));
        assert!(out.degraded);
    }
}
