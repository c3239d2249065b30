//! GPT-2 byte-level token spelling.
//!
//! Byte-level vocabularies spell every byte as one printable character so
//! that token strings stay valid JSON text:
//!
//! - Bytes 33-126, 161-172 and 174-255 map to the character of the same value
//! - All other bytes (0-32, 127-160, 173) map to U+0100 onwards, in order
//!
//! So a space (0x20) is spelled `Ġ` (U+0120) and a newline `Ċ` (U+010A).
//! Vocabularies are converted to raw bytes once at load time with
//! [`byte_level_decode`]; the engine itself never sees this spelling.

use rustc_hash::FxHashMap;
use std::sync::LazyLock;

/// Byte to character mapping (256 entries).
static BYTE_TO_CHAR: LazyLock<[char; 256]> = LazyLock::new(|| {
    let direct = |b: u8| matches!(b, 33..=126 | 161..=172 | 174..=255);

    let mut mapping = ['\0'; 256];
    let mut next = 0x100u32;
    for b in 0u8..=255 {
        mapping[b as usize] = if direct(b) {
            b as char
        } else {
            let c = char::from_u32(next).unwrap_or(char::REPLACEMENT_CHARACTER);
            next += 1;
            c
        };
    }
    mapping
});

/// Character to byte mapping (reverse of `BYTE_TO_CHAR`).
static CHAR_TO_BYTE: LazyLock<FxHashMap<char, u8>> = LazyLock::new(|| {
    BYTE_TO_CHAR
        .iter()
        .enumerate()
        .map(|(byte, &ch)| (ch, byte as u8))
        .collect()
});

/// Spell raw bytes in the byte-level alphabet.
#[inline]
pub fn byte_level_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| BYTE_TO_CHAR[b as usize]).collect()
}

/// Convert a byte-level token string back to raw bytes.
///
/// Returns `None` if any character is outside the byte-level alphabet.
#[inline]
pub fn byte_level_decode(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|ch| CHAR_TO_BYTE.get(&ch).copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_level_mapping_is_bijective() {
        let mut seen = rustc_hash::FxHashSet::default();
        for b in 0u8..=255 {
            let ch = BYTE_TO_CHAR[b as usize];
            assert!(seen.insert(ch), "Duplicate mapping for byte {}", b);
        }
        assert_eq!(seen.len(), 256);
        assert_eq!(CHAR_TO_BYTE.len(), 256);
    }

    #[test]
    fn test_byte_level_roundtrip() {
        for b in 0u8..=255 {
            let encoded = byte_level_encode(&[b]);
            let decoded = byte_level_decode(&encoded).unwrap();
            assert_eq!(decoded, vec![b], "Roundtrip failed for byte {}", b);
        }
    }

    #[test]
    fn test_whitespace_mapping() {
        assert_eq!(BYTE_TO_CHAR[b' ' as usize], '\u{0120}');
        assert_eq!(BYTE_TO_CHAR[b'\n' as usize], '\u{010A}');
        assert_eq!(BYTE_TO_CHAR[0xAD], '\u{0143}');
    }

    #[test]
    fn test_printable_ascii_preserved() {
        for b in 33u8..=126 {
            assert_eq!(BYTE_TO_CHAR[b as usize] as u32, b as u32, "ASCII {} should map to itself", b);
        }
        assert_eq!(byte_level_encode(b"Hello"), "Hello");
    }

    #[test]
    fn test_decode_with_space() {
        assert_eq!(byte_level_decode("\u{0120}hello").unwrap(), b" hello");
    }

    #[test]
    fn test_decode_multibyte() {
        // "你" is E4 BD A0
        let spelled = "\u{00E4}\u{00BD}\u{0142}";
        assert_eq!(byte_level_decode(spelled).unwrap(), "你".as_bytes());
        assert_eq!(byte_level_encode("你".as_bytes()), spelled);
    }

    #[test]
    fn test_decode_rejects_foreign_chars() {
        assert_eq!(byte_level_decode("a\u{2581}b"), None);
    }

    #[test]
    fn test_full_roundtrip_string() {
        let original = "Hello, 世界! 🌍";
        let encoded = byte_level_encode(original.as_bytes());
        let decoded = String::from_utf8(byte_level_decode(&encoded).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }
}
