//! `ST_Xstring` escapes: `_xHHHH_` stands for the UTF-16 code unit `HHHH`.
//!
//! SpreadsheetML text can't carry characters XML 1.0 forbids, and a literal carriage return
//! does not survive XML line-end normalisation, so both are written as `_xHHHH_`. Text
//! that already looks like an escape gets its leading `_` written as `_x005F_`.

use std::borrow::Cow;

const ESCAPE_LEN: usize = 7;

/// Encode `text` for a `<t>` or string `<v>` element (before XML entity escaping).
pub(crate) fn encode(text: &str) -> Cow<'_, str> {
    let needs_encoding = text.chars().any(must_encode) || escape_at_any(text);
    if !needs_encoding {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    for (idx, ch) in text.char_indices() {
        if must_encode(ch) {
            out.push_str(&format!("_x{:04X}_", ch as u32));
        } else if ch == '_' && parse_escape(&text[idx..]).is_some() {
            out.push_str("_x005F_");
        } else {
            out.push(ch);
        }
    }
    Cow::Owned(out)
}

/// Decode `_xHHHH_` escapes. Sequences that do not name a valid scalar value stay as-is.
pub(crate) fn decode(text: &str) -> Cow<'_, str> {
    if !escape_at_any(text) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("_x") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match parse_escape(tail).and_then(char::from_u32) {
            Some(ch) => {
                out.push(ch);
                rest = &tail[ESCAPE_LEN..];
            }
            None => {
                out.push('_');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn must_encode(ch: char) -> bool {
    match ch {
        '\t' | '\n' => false,
        '\r' => true,
        '\u{0}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}' => true,
        _ => false,
    }
}

fn escape_at_any(text: &str) -> bool {
    text.match_indices("_x")
        .any(|(idx, _)| parse_escape(&text[idx..]).is_some())
}

/// The code unit of an escape at the start of `text`.
fn parse_escape(text: &str) -> Option<u32> {
    let bytes = text.as_bytes();
    if bytes.len() < ESCAPE_LEN || !text.starts_with("_x") || bytes[6] != b'_' {
        return None;
    }
    let hex = &bytes[2..6];
    if !hex.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    std::str::from_utf8(hex)
        .ok()
        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_characters_and_carriage_returns_are_escaped() {
        assert_eq!(encode("A\u{1}B\r\nC"), "A_x0001_B_x000D_\nC");
        assert_eq!(encode("tab\there"), "tab\there");
        assert!(matches!(encode("Acme Ltd"), Cow::Borrowed(_)));
    }

    #[test]
    fn literal_escape_sequences_survive() {
        assert_eq!(encode("id_x0041_"), "id_x005F_x0041_");
        assert_eq!(decode("id_x005F_x0041_"), "id_x0041_");
        assert_eq!(encode("snake_case_x"), "snake_case_x");
    }

    #[test]
    fn decode_resolves_escapes_and_ignores_near_misses() {
        assert_eq!(decode("A_x0001_B_x000d_\nC"), "A\u{1}B\r\nC");
        assert_eq!(decode("_x12_ and _xZZZZ_"), "_x12_ and _xZZZZ_");
        // A lone surrogate code unit has no scalar value.
        assert_eq!(decode("_xD800_"), "_xD800_");
    }

    #[test]
    fn encode_then_decode_is_identity() {
        for text in ["", "plain", "A\u{1}B\r\nC", "_x0041_", "__x0001__", "\u{FFFF}", "x_x"] {
            assert_eq!(decode(&encode(text)), text, "{text:?}");
        }
    }
}
