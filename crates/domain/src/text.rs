//! Surrogate-safe text utilities.
//!
//! Tool-server subprocess output on some host encodings can carry lone
//! UTF-16 surrogates, either as WTF-8 byte triples in raw stdout or as
//! unpaired `\uD800`..`\uDFFF` escape sequences inside JSON text. Both
//! crash strict JSON serializers downstream. Everything that crosses a
//! process or transport boundary goes through this module first.
//!
//! Guarantees: output is valid UTF-8, contains no unpaired surrogate in
//! either form, and well-formed multi-byte text is untouched. All
//! functions are idempotent.

use std::sync::OnceLock;

use crate::config::SurrogatePolicy;

static POLICY: OnceLock<SurrogatePolicy> = OnceLock::new();

/// Install the process-wide surrogate policy (from config / `SURROGATE_POLICY`).
///
/// May be called once; later calls are ignored.
pub fn install_policy(policy: SurrogatePolicy) {
    let _ = POLICY.set(policy);
}

fn active_policy() -> SurrogatePolicy {
    POLICY.get().copied().unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// safe_text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scrub unpaired surrogate escape sequences from `input` using the
/// installed policy.
pub fn safe_text(input: &str) -> String {
    safe_text_with(input, active_policy())
}

/// Scrub unpaired surrogate escape sequences from `input`.
///
/// A well-formed high/low escape pair (`\uD83D\uDE00`) is preserved
/// verbatim; a lone half is replaced (`?`), dropped, or kept as its
/// visible escape, depending on `policy`.
pub fn safe_text_with(input: &str, policy: SurrogatePolicy) -> String {
    // Fast path: nothing that could be a surrogate escape.
    if !input.contains("\\u") {
        return input.to_string();
    }

    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        match parse_escape(bytes, i) {
            Some(unit) if (0xD800..=0xDBFF).contains(&unit) => {
                // High surrogate: paired iff immediately followed by a low one.
                match parse_escape(bytes, i + 6) {
                    Some(low) if (0xDC00..=0xDFFF).contains(&low) => {
                        out.push_str(&input[i..i + 12]);
                        i += 12;
                    }
                    _ => {
                        emit_unpaired(&mut out, &input[i..i + 6], policy);
                        i += 6;
                    }
                }
            }
            Some(unit) if (0xDC00..=0xDFFF).contains(&unit) => {
                // Low surrogate with no preceding high half.
                emit_unpaired(&mut out, &input[i..i + 6], policy);
                i += 6;
            }
            _ => {
                // Copy one whole character (may be multi-byte).
                let ch_len = utf8_len(bytes[i]);
                out.push_str(&input[i..i + ch_len]);
                i += ch_len;
            }
        }
    }
    out
}

/// Parse a `\uXXXX` escape starting at byte offset `i`, if present.
fn parse_escape(bytes: &[u8], i: usize) -> Option<u16> {
    if i + 6 > bytes.len() || bytes[i] != b'\\' || bytes[i + 1] != b'u' {
        return None;
    }
    let hex = std::str::from_utf8(&bytes[i + 2..i + 6]).ok()?;
    u16::from_str_radix(hex, 16).ok()
}

fn emit_unpaired(out: &mut String, escape: &str, policy: SurrogatePolicy) {
    match policy {
        SurrogatePolicy::Replace => out.push('?'),
        SurrogatePolicy::Ignore => {}
        SurrogatePolicy::Escape => out.push_str(escape),
    }
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b & 0xE0 == 0xC0 => 2,
        b if b & 0xF0 == 0xE0 => 3,
        _ => 4,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// decode_lossy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode raw child-process bytes into clean UTF-8.
///
/// WTF-8-encoded surrogates (`ED A0..BF xx`) are treated per the policy;
/// any other invalid sequence becomes U+FFFD as with a standard lossy
/// decode. The result is additionally run through [`safe_text`] so escape
/// sequences embedded in the text are scrubbed in the same pass.
pub fn decode_lossy(bytes: &[u8]) -> String {
    decode_lossy_with(bytes, active_policy())
}

pub fn decode_lossy_with(bytes: &[u8], policy: SurrogatePolicy) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(tail) => {
                out.push_str(tail);
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                if let Ok(s) = std::str::from_utf8(valid) {
                    out.push_str(s);
                }
                if after.len() >= 3
                    && after[0] == 0xED
                    && (0xA0..=0xBF).contains(&after[1])
                    && after[2] & 0xC0 == 0x80
                {
                    // A UTF-16 surrogate smuggled through as WTF-8.
                    let unit = (u16::from(after[0] & 0x0F) << 12)
                        | (u16::from(after[1] & 0x3F) << 6)
                        | u16::from(after[2] & 0x3F);
                    match policy {
                        SurrogatePolicy::Replace => out.push('?'),
                        SurrogatePolicy::Ignore => {}
                        SurrogatePolicy::Escape => {
                            out.push_str(&format!("\\u{unit:04X}"));
                        }
                    }
                    rest = &after[3..];
                } else {
                    out.push('\u{FFFD}');
                    let skip = e.error_len().unwrap_or(after.len());
                    rest = &after[skip..];
                }
                if rest.is_empty() {
                    break;
                }
            }
        }
    }
    safe_text_with(&out, policy)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON tree sanitizer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Apply [`safe_text`] to every string in a JSON tree, in place.
pub fn sanitize_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("\\u") {
                *s = safe_text(s);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                sanitize_value(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                sanitize_value(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_untouched() {
        assert_eq!(safe_text_with("hello world", SurrogatePolicy::Replace), "hello world");
    }

    #[test]
    fn japanese_preserved() {
        let text = "東京の天気は晴れです";
        assert_eq!(safe_text_with(text, SurrogatePolicy::Replace), text);
        assert_eq!(decode_lossy_with(text.as_bytes(), SurrogatePolicy::Replace), text);
    }

    #[test]
    fn unpaired_high_replaced() {
        assert_eq!(
            safe_text_with(r"before \uD800 after", SurrogatePolicy::Replace),
            "before ? after"
        );
    }

    #[test]
    fn unpaired_low_replaced() {
        assert_eq!(safe_text_with(r"x\uDC01y", SurrogatePolicy::Replace), "x?y");
    }

    #[test]
    fn well_formed_escape_pair_kept() {
        let text = r"emoji: \uD83D\uDE00";
        assert_eq!(safe_text_with(text, SurrogatePolicy::Replace), text);
    }

    #[test]
    fn ignore_policy_drops() {
        assert_eq!(safe_text_with(r"a\uD800b", SurrogatePolicy::Ignore), "ab");
    }

    #[test]
    fn escape_policy_keeps_visible() {
        assert_eq!(safe_text_with(r"a\uD800b", SurrogatePolicy::Escape), r"a\uD800b");
    }

    #[test]
    fn idempotent_under_every_policy() {
        for policy in [
            SurrogatePolicy::Replace,
            SurrogatePolicy::Ignore,
            SurrogatePolicy::Escape,
        ] {
            let input = r"mixed \uD800 text \uD83D\uDE00 and \uDFFF tail";
            let once = safe_text_with(input, policy);
            let twice = safe_text_with(&once, policy);
            assert_eq!(once, twice, "policy {policy:?} not idempotent");
        }
    }

    #[test]
    fn no_surrogate_escape_survives_replace() {
        let input = r"\uD800𐐀\uDFFF";
        let out = safe_text_with(input, SurrogatePolicy::Replace);
        // The literal astral char is untouched; the two escapes are lone halves.
        assert_eq!(out, r"?𐐀?");
    }

    #[test]
    fn wtf8_surrogate_bytes_become_question_mark() {
        // "ok" + WTF-8 encoding of U+D800 + "go"
        let bytes = [b'o', b'k', 0xED, 0xA0, 0x80, b'g', b'o'];
        assert_eq!(decode_lossy_with(&bytes, SurrogatePolicy::Replace), "ok?go");
    }

    #[test]
    fn wtf8_escape_policy_renders_escape() {
        let bytes = [0xED, 0xA0, 0x80];
        assert_eq!(decode_lossy_with(&bytes, SurrogatePolicy::Escape), r"\uD800");
    }

    #[test]
    fn other_invalid_bytes_become_replacement_char() {
        let bytes = [b'a', 0xFF, b'b'];
        assert_eq!(decode_lossy_with(&bytes, SurrogatePolicy::Replace), "a\u{FFFD}b");
    }

    #[test]
    fn decode_lossy_idempotent_through_safe_text() {
        let bytes = [b'x', 0xED, 0xB0, 0x81, b'y'];
        let once = decode_lossy_with(&bytes, SurrogatePolicy::Replace);
        assert_eq!(safe_text_with(&once, SurrogatePolicy::Replace), once);
    }

    #[test]
    fn sanitize_value_walks_nested_json() {
        let mut value = serde_json::json!({
            "ok": "plain",
            "bad": r"x\uD800y",
            "nested": { "list": [r"\uDC00", 42] }
        });
        sanitize_value(&mut value);
        assert_eq!(value["ok"], "plain");
        assert_eq!(value["bad"], "x?y");
        assert_eq!(value["nested"]["list"][0], "?");
        assert_eq!(value["nested"]["list"][1], 42);
    }
}
