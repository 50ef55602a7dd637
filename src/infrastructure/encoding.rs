//! Source text decoding.
//!
//! Legacy corpora mix UTF-8 with East-Asian codepages. The fallback chain is
//! deterministic: the first encoding that decodes without replacement
//! characters is adopted.

use encoding_rs::{Encoding, EUC_KR, GB18030, SHIFT_JIS, UTF_8};

/// Fallback chain after strict UTF-8.
const FALLBACKS: &[&Encoding] = &[EUC_KR, SHIFT_JIS, GB18030];

/// Decode raw bytes into text, reporting the encoding that was adopted.
/// Falls back to lossy UTF-8 when nothing decodes cleanly.
pub fn decode_source(bytes: &[u8]) -> (String, &'static str) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), "utf-8");
    }
    for encoding in FALLBACKS {
        let (text, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return (text.into_owned(), encoding.name());
        }
    }
    let (text, _, _) = UTF_8.decode(bytes);
    (text.into_owned(), "utf-8 (lossy)")
}
