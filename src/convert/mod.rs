//! Model format parsers.
//!
//! Every supported source format is converted into the same [`Definition`]
//! shape, so the engine never sees format-specific data after loading.
//!
//! | Format          | Input                                   |
//! |-----------------|-----------------------------------------|
//! | `Definition`    | Native binary produced by `to_bytes`    |
//! | `SentencePiece` | `.model` protobuf                       |
//! | `Tokenizers`    | `tokenizer.json`                        |
//! | `Tiktoken`      | `.tiktoken` base64 rank file            |
//! | `Tekken`        | Mistral `tekken.json`                   |

pub mod sentencepiece;
pub mod tekken;
pub mod tiktoken;
pub mod tokenizers;

use tracing::debug;

use crate::core::serialization::is_definition;
use crate::core::vocab::{Token, TokenKind};
use crate::core::{Definition, TokenizerError};

/// A supported model source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    Definition,
    SentencePiece,
    Tokenizers,
    Tiktoken,
    Tekken,
}

impl ModelFormat {
    /// Guesses the format from the leading bytes of `data`.
    pub fn detect(data: &[u8]) -> Result<Self, TokenizerError> {
        if is_definition(data) {
            return Ok(Self::Definition);
        }
        if data
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|&b| b == b'{')
        {
            if tekken::looks_like_tekken(data) {
                return Ok(Self::Tekken);
            }
            return Ok(Self::Tokenizers);
        }
        if tiktoken::looks_like_tiktoken(data) {
            return Ok(Self::Tiktoken);
        }
        // protobuf tag of field 1 (pieces), length delimited
        if data.first() == Some(&0x0A) {
            return Ok(Self::SentencePiece);
        }
        Err(TokenizerError::UnsupportedFormat(
            "unrecognized model data".to_string(),
        ))
    }
}

/// Parses `data` as a model of the given format.
pub fn parse(format: ModelFormat, data: &[u8]) -> Result<Definition, TokenizerError> {
    debug!(?format, bytes = data.len(), "parsing model");
    match format {
        ModelFormat::Definition => Definition::from_bytes(data),
        ModelFormat::SentencePiece => sentencepiece::convert_sentencepiece(data),
        ModelFormat::Tokenizers => tokenizers::convert_tokenizers(data),
        ModelFormat::Tiktoken => tiktoken::convert_tiktoken_default(data),
        ModelFormat::Tekken => tekken::convert_tekken(data),
    }
}

/// Byte of a `<0xNN>` piece.
pub(crate) fn parse_byte_piece(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// True if some normal token contains an ASCII control byte.
pub(crate) fn has_control_tokens(tokens: &[Token]) -> bool {
    tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Normal)
        .any(|t| t.bytes.iter().any(u8::is_ascii_control))
}

/// Escapes regex metacharacters so `text` matches literally.
pub(crate) fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '#' | '&' | '-' | '~'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(
            ModelFormat::detect(b"kitoken\x02\x00").unwrap(),
            ModelFormat::Definition
        );
        assert_eq!(
            ModelFormat::detect(b"  \n{\"model\": {}}").unwrap(),
            ModelFormat::Tokenizers
        );
        assert_eq!(
            ModelFormat::detect(br#"{"config": {"version": "v3"}, "vocab": []}"#).unwrap(),
            ModelFormat::Tekken
        );
        assert_eq!(
            ModelFormat::detect(b"IQ== 0\nIg== 1\n").unwrap(),
            ModelFormat::Tiktoken
        );
        assert_eq!(
            ModelFormat::detect(&[0x0A, 0x05, 0x0A, 0x01, b'a']).unwrap(),
            ModelFormat::SentencePiece
        );
    }

    #[test]
    fn test_detect_unknown() {
        assert!(matches!(
            ModelFormat::detect(b"GIF89a"),
            Err(TokenizerError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            ModelFormat::detect(b""),
            Err(TokenizerError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parse_byte_piece() {
        assert_eq!(parse_byte_piece("<0x0A>"), Some(0x0A));
        assert_eq!(parse_byte_piece("<0xff>"), Some(0xFF));
        assert_eq!(parse_byte_piece("<0x0A"), None);
        assert_eq!(parse_byte_piece("<0x100>"), None);
        assert_eq!(parse_byte_piece("0x0A"), None);
    }

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("a.b"), r"a\.b");
        assert_eq!(escape_regex("(x)+"), r"\(x\)\+");
        assert_eq!(escape_regex("▁"), "▁");
    }
}
