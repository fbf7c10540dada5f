//! Flat scalar field extraction from a raw response buffer.
//!
//! The transcription reply is only ever searched for one flat string field,
//! and the poll loop may hand over a truncated buffer, so a structural parser
//! is not used here.  Nested values (the AI reply) go through `serde_json`
//! instead.
//!
//! ```text
//! {"foo":"bar","transcript": "hello, world"}
//!               ^key        ^ws ^──── span ────^ (ends at '}' outside quotes)
//! ```

/// Return the value that follows the first occurrence of `key`.
///
/// After the key, leading whitespace is skipped and the scan runs forward
/// tracking a single in-string flag: an unescaped `"` toggles it, and outside
/// a string any of `,` `}` `]` ends the value.  The span is trimmed, one pair
/// of surrounding quotes is removed (the closing one may be missing) and the
/// common escapes are undone.
///
/// A missing key yields an empty string.
pub fn extract_scalar_field(text: &str, key: &str) -> String {
    let Some(found) = text.find(key) else {
        return String::new();
    };
    let rest = text[found + key.len()..].trim_start();

    let mut in_string = false;
    let mut escaped = false;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ',' | '}' | ']' if !in_string => {
                end = i;
                break;
            }
            _ => {}
        }
    }

    let span = rest[..end].trim();
    // A truncated buffer can leave the closing quote missing.
    let inner = match span.strip_prefix('"') {
        Some(open) => open.strip_suffix('"').unwrap_or(open),
        None => span,
    };
    unescape(inner)
}

/// Undo `\"`, `\\`, `\/`, `\n`, `\r` and `\t`.  Other escapes are kept as
/// written.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
