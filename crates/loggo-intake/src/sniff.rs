//! Content sniffing for attached payloads.

use loggo_types::SNIFF_LIMIT_BYTES;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Detects the MIME type of `data` from its content.
///
/// At most the first [`SNIFF_LIMIT_BYTES`] bytes are inspected. Known
/// binary signatures come first; anything else that is valid UTF-8 is plain
/// text, and the rest is an opaque byte stream.
pub fn sniff_mime_type(data: &[u8]) -> String {
    let prefix = &data[..data.len().min(SNIFF_LIMIT_BYTES)];

    if let Some(kind) = infer::get(prefix) {
        return kind.mime_type().to_string();
    }

    let is_text = match std::str::from_utf8(prefix) {
        Ok(_) => true,
        // A multi-byte character cut off by the prefix limit still counts.
        Err(e) => e.error_len().is_none() && prefix.len() < data.len(),
    };

    let mime = if is_text { TEXT_PLAIN } else { OCTET_STREAM };
    mime.to_string()
}
