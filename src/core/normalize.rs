//! Input normalization and decoded-output rewriting.

use std::borrow::Cow;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::config::{Decoding, Normalization, UnicodeForm};

/// Applies `rules` in order. Returns the input unchanged when no rule applies.
pub(crate) fn normalize<'a>(text: &'a str, rules: &[Normalization]) -> Cow<'a, str> {
    let mut text = Cow::Borrowed(text);
    for rule in rules {
        match rule {
            Normalization::Unicode(form) => {
                let normalized: String = match form {
                    UnicodeForm::Nfc => text.nfc().collect(),
                    UnicodeForm::Nfd => text.nfd().collect(),
                    UnicodeForm::Nfkc => text.nfkc().collect(),
                    UnicodeForm::Nfkd => text.nfkd().collect(),
                };
                if normalized != *text {
                    text = Cow::Owned(normalized);
                }
            }
            Normalization::Nmt => {
                if text.chars().any(|c| is_nmt_removed(c) || is_nmt_space(c)) {
                    text = Cow::Owned(
                        text.chars()
                            .filter(|&c| !is_nmt_removed(c))
                            .map(|c| if is_nmt_space(c) { ' ' } else { c })
                            .collect(),
                    );
                }
            }
            Normalization::CaseFold { upper } => {
                text = Cow::Owned(if *upper {
                    text.to_uppercase()
                } else {
                    text.to_lowercase()
                });
            }
            Normalization::Extend {
                character,
                left,
                right,
            } => {
                if !text.is_empty() && (*left > 0 || *right > 0) {
                    let mut out = String::with_capacity(
                        text.len() + (*left + *right) as usize * character.len_utf8(),
                    );
                    out.extend(std::iter::repeat(*character).take(*left as usize));
                    out.push_str(&text);
                    out.extend(std::iter::repeat(*character).take(*right as usize));
                    text = Cow::Owned(out);
                }
            }
            Normalization::Strip {
                character,
                left,
                right,
            } => {
                let stripped = strip(&text, *character, *left, *right);
                if stripped.len() != text.len() {
                    text = Cow::Owned(stripped.to_string());
                }
            }
            Normalization::Collapse { character } => {
                let mut chars = text.chars();
                let mut previous = chars.next();
                let repeated = chars.any(|c| {
                    let hit = c == *character && previous == Some(c);
                    previous = Some(c);
                    hit
                });
                if repeated {
                    let mut previous = None;
                    text = Cow::Owned(
                        text.chars()
                            .filter(|&ch| {
                                let keep = !(ch == *character && previous == Some(ch));
                                previous = Some(ch);
                                keep
                            })
                            .collect(),
                    );
                }
            }
            Normalization::Replace {
                pattern,
                replacement,
            } => {
                if !pattern.is_empty() && text.contains(pattern.as_str()) {
                    text = Cow::Owned(text.replace(pattern.as_str(), replacement));
                }
            }
            Normalization::CharsMap(map) => {
                let mapped = match map.normalize(&text) {
                    Cow::Owned(mapped) => Some(mapped),
                    Cow::Borrowed(_) => None,
                };
                if let Some(mapped) = mapped {
                    text = Cow::Owned(mapped);
                }
            }
            Normalization::Clean => {
                if text.chars().any(|c| is_cleaned(c) || (c != ' ' && c.is_whitespace())) {
                    text = Cow::Owned(
                        text.chars()
                            .filter(|&c| !is_cleaned(c))
                            .map(|c| if c.is_whitespace() { ' ' } else { c })
                            .collect(),
                    );
                }
            }
            Normalization::StripAccents => {
                if text.chars().any(is_combining_mark) {
                    text = Cow::Owned(text.chars().filter(|&c| !is_combining_mark(c)).collect());
                }
            }
        }
    }
    text
}

fn is_cleaned(c: char) -> bool {
    c == '\0' || c == '\u{fffd}' || (c.is_control() && !c.is_whitespace())
}

/// Applies decoding rules to decoded bytes.
///
/// Rules operate on bytes so invalid UTF-8 output passes through untouched.
pub(crate) fn apply_decoding(bytes: &mut Vec<u8>, rules: &[Decoding]) {
    for rule in rules {
        match rule {
            Decoding::Strip {
                character,
                left,
                right,
            } => {
                let mut buf = [0u8; 4];
                let needle = character.encode_utf8(&mut buf).as_bytes();
                let mut start = 0;
                for _ in 0..*left {
                    if bytes[start..].starts_with(needle) {
                        start += needle.len();
                    } else {
                        break;
                    }
                }
                let mut end = bytes.len();
                for _ in 0..*right {
                    if end - start >= needle.len() && bytes[start..end].ends_with(needle) {
                        end -= needle.len();
                    } else {
                        break;
                    }
                }
                bytes.truncate(end);
                bytes.drain(..start);
            }
            Decoding::Replace {
                pattern,
                replacement,
            } => {
                let pattern = pattern.as_bytes();
                if pattern.is_empty() || bytes.len() < pattern.len() {
                    continue;
                }
                let mut out = Vec::with_capacity(bytes.len());
                let mut i = 0;
                while i < bytes.len() {
                    if bytes[i..].starts_with(pattern) {
                        out.extend_from_slice(replacement.as_bytes());
                        i += pattern.len();
                    } else {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
                *bytes = out;
            }
        }
    }
}

fn strip(text: &str, character: char, left: u32, right: u32) -> &str {
    let mut start = 0;
    for c in text.chars().take(left as usize) {
        if c != character {
            break;
        }
        start += c.len_utf8();
    }
    let mut end = text.len();
    for c in text[start..].chars().rev().take(right as usize) {
        if c != character {
            break;
        }
        end -= c.len_utf8();
    }
    &text[start..end]
}

fn is_nmt_removed(c: char) -> bool {
    matches!(c, '\u{1}'..='\u{8}' | '\u{b}' | '\u{e}'..='\u{1f}' | '\u{7f}' | '\u{8f}' | '\u{9f}')
}

fn is_nmt_space(c: char) -> bool {
    matches!(
        c,
        '\u{0}'
            | '\u{a}'
            | '\u{c}'
            | '\u{d}'
            | '\u{1680}'
            | '\u{200b}'..='\u{200f}'
            | '\u{2028}'
            | '\u{2029}'
            | '\u{2581}'
            | '\u{feff}'
            | '\u{fffd}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrowed_without_rules() {
        assert!(matches!(normalize("abc", &[]), Cow::Borrowed("abc")));
    }

    #[test]
    fn test_extend_and_strip() {
        let rules = [Normalization::Extend {
            character: ' ',
            left: 1,
            right: 0,
        }];
        assert_eq!(normalize("hello", &rules), " hello");
        assert_eq!(normalize("", &rules), "");

        let rules = [Normalization::Strip {
            character: ' ',
            left: u32::MAX,
            right: 1,
        }];
        assert_eq!(normalize("   a b  ", &rules), "a b ");
    }

    #[test]
    fn test_collapse() {
        let rules = [Normalization::Collapse { character: ' ' }];
        assert_eq!(normalize("a  b   c d", &rules), "a b c d");
        assert!(matches!(normalize("a b", &rules), Cow::Borrowed(_)));
    }

    #[test]
    fn test_nmt() {
        assert_eq!(
            normalize("a\u{1}b\tc\u{200b}d\ne", &[Normalization::Nmt]),
            "ab\tc d e"
        );
    }

    #[test]
    fn test_unicode_and_casefold() {
        let rules = [
            Normalization::Unicode(UnicodeForm::Nfkc),
            Normalization::CaseFold { upper: false },
        ];
        assert_eq!(normalize("Ｈｅｌｌｏ", &rules), "hello");
    }

    #[test]
    fn test_clean_and_strip_accents() {
        assert_eq!(
            normalize("a\u{0}b\u{7}c\td\u{3000}e", &[Normalization::Clean]),
            "abc d e"
        );
        let rules = [
            Normalization::Unicode(UnicodeForm::Nfd),
            Normalization::StripAccents,
        ];
        assert_eq!(normalize("Crème brûlée", &rules), "Creme brulee");
        assert!(matches!(normalize("plain", &rules), Cow::Borrowed(_)));
    }

    #[test]
    fn test_charsmap_rule() {
        let map = crate::core::charsmap::CharsMap::from_pairs([("\u{FF48}", "h"), ("\u{FF49}", "i")])
            .unwrap();
        let rules = [Normalization::CharsMap(map)];
        assert_eq!(normalize("\u{FF48}\u{FF49}!", &rules), "hi!");
        assert!(matches!(normalize("hi", &rules), Cow::Borrowed(_)));
    }

    #[test]
    fn test_replace() {
        let rules = [Normalization::Replace {
            pattern: "ab".to_string(),
            replacement: "x".to_string(),
        }];
        assert_eq!(normalize("abcab", &rules), "xcx");
    }

    #[test]
    fn test_decoding_strip() {
        let mut bytes = b"  hi ".to_vec();
        apply_decoding(
            &mut bytes,
            &[Decoding::Strip {
                character: ' ',
                left: 1,
                right: 0,
            }],
        );
        assert_eq!(bytes, b" hi ");
    }

    #[test]
    fn test_decoding_keeps_invalid_utf8() {
        let mut bytes = vec![b' ', 0xE4, 0xBD];
        apply_decoding(
            &mut bytes,
            &[
                Decoding::Strip {
                    character: ' ',
                    left: 1,
                    right: 1,
                },
                Decoding::Replace {
                    pattern: "▁".to_string(),
                    replacement: " ".to_string(),
                },
            ],
        );
        assert_eq!(bytes, vec![0xE4, 0xBD]);
    }
}
