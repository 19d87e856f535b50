// SPDX-License-Identifier: AGPL-3.0-or-later
//! Anchor id encoding

use std::fmt::Write;

/// Turn arbitrary text into a valid anchor id
///
/// Returns `None` for blank input. Anything that is not an ASCII letter,
/// digit, `-`, `_` or `.` is replaced by its UTF-8 bytes written as `.XX`.
///
/// ```
/// use doxia_core::ids::encode_id;
///
/// assert_eq!(encode_id("a b-c123 ").as_deref(), Some("a_b-c123"));
/// assert_eq!(encode_id("1anchor").as_deref(), Some("a1anchor"));
/// assert_eq!(encode_id("€").as_deref(), Some("a.E2.82.AC"));
/// assert_eq!(encode_id("   "), None);
/// ```
pub fn encode_id(text: &str) -> Option<String> {
    let text = text.trim();
    let first = text.chars().next()?;

    let mut id = String::with_capacity(text.len() + 1);
    if !(first.is_ascii_alphabetic() || first == '_') {
        id.push('a');
    }
    for c in text.chars() {
        match c {
            ' ' => id.push('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => id.push(c),
            c => {
                let mut utf8 = [0u8; 4];
                for byte in c.encode_utf8(&mut utf8).bytes() {
                    // writing to a String cannot fail
                    let _ = write!(id, ".{byte:02X}");
                }
            }
        }
    }
    Some(id)
}

/// Whether `text` is already a valid anchor id
pub fn is_valid_id(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_id_cases() {
        let cases = [
            ("", None),
            ("  ", None),
            (" _ ", Some("_")),
            ("1", Some("a1")),
            ("_anchor", Some("_anchor")),
            ("   anchor", Some("anchor")),
            ("myAnchor", Some("myAnchor")),
            ("Getting Started", Some("Getting_Started")),
            ("a:b", Some("a.3Ab")),
            ("é", Some("a.C3.A9")),
        ];
        for (input, expected) in cases {
            assert_eq!(encode_id(input).as_deref(), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("a1"));
        assert!(is_valid_id("_x-y.z"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("1a"));
        assert!(!is_valid_id("a b"));
        assert!(!is_valid_id("-a"));
    }

    proptest! {
        #[test]
        fn test_encoded_ids_are_valid(text in "\\PC*") {
            if let Some(id) = encode_id(&text) {
                prop_assert!(is_valid_id(&id));
            }
        }

        #[test]
        fn test_valid_ids_encode_to_themselves(text in "[A-Za-z_][A-Za-z0-9_.-]{0,20}") {
            prop_assert_eq!(encode_id(&text), Some(text.clone()));
        }
    }
}
