//! Token ids back to bytes.

use super::config::Config;
use super::error::TokenizerError;
use super::index::LookupIndex;
use super::normalize::apply_decoding;
use super::vocab::TokenId;

/// Concatenates the bytes of `tokens` and applies the decoding rules.
///
/// Control markers are skipped unless `with_specials` is set. The output is
/// raw bytes and may end inside a UTF-8 sequence when the ids do.
///
/// Word templates turn back into spaces: a token without the continuation
/// prefix starts a new word, and a word-end suffix becomes a space except
/// after the last token.
pub(crate) fn decode_tokens(
    index: &LookupIndex,
    config: &Config,
    tokens: &[TokenId],
    with_specials: bool,
) -> Result<Vec<u8>, TokenizerError> {
    let prefix = config.word_prefix().map(str::as_bytes);
    let suffix = config.word_suffix().map(str::as_bytes);
    let mut result = Vec::with_capacity(tokens.len() * 4);
    let mut ended_word = false;
    for &token in tokens {
        let entry = index
            .decode_entry(token)
            .ok_or(TokenizerError::InvalidToken(token))?;
        if entry.control && !with_specials {
            continue;
        }
        let mut bytes = entry.bytes.as_slice();
        if let Some(prefix) = prefix {
            match bytes.strip_prefix(prefix) {
                Some(rest) if !entry.special => bytes = rest,
                _ if !result.is_empty() => result.push(b' '),
                _ => {}
            }
        }
        ended_word = false;
        if let Some(rest) = suffix
            .filter(|_| !entry.special)
            .and_then(|suffix| bytes.strip_suffix(suffix))
        {
            result.extend_from_slice(rest);
            result.push(b' ');
            ended_word = true;
            continue;
        }
        result.extend_from_slice(bytes);
    }
    if ended_word {
        result.pop();
    }
    apply_decoding(&mut result, &config.decoding);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Decoding, InsertionPosition, Template};
    use crate::core::vocab::{SpecialToken, SpecialTokenKind, Token, Vocabulary};

    fn plain() -> Config {
        Config::default()
    }

    fn index() -> LookupIndex {
        let vocab = Vocabulary::new(
            vec![
                Token::new(0, " hello"),
                Token::new(1, vec![0xE4, 0xBD]),
                Token::new(2, vec![0xA0]),
            ],
            vec![
                SpecialToken::new(7, "<s>", SpecialTokenKind::Control),
                SpecialToken::new(1000, "<|x|>", SpecialTokenKind::Priority),
            ],
        );
        LookupIndex::new(&vocab)
    }

    #[test]
    fn test_partial_utf8_is_returned() {
        let index = index();
        assert_eq!(decode_tokens(&index, &plain(), &[1], false).unwrap(), vec![0xE4, 0xBD]);
        assert_eq!(
            decode_tokens(&index, &plain(), &[1, 2], false).unwrap(),
            "你".as_bytes()
        );
    }

    #[test]
    fn test_control_markers() {
        let index = index();
        assert_eq!(decode_tokens(&index, &plain(), &[7, 0], false).unwrap(), b" hello");
        assert_eq!(
            decode_tokens(&index, &plain(), &[7, 0], true).unwrap(),
            b"<s> hello"
        );
        assert_eq!(
            decode_tokens(&index, &plain(), &[0, 1000], false).unwrap(),
            b" hello<|x|>"
        );
    }

    #[test]
    fn test_invalid_token() {
        let index = index();
        assert!(matches!(
            decode_tokens(&index, &plain(), &[0, 3], false),
            Err(TokenizerError::InvalidToken(3))
        ));
    }

    #[test]
    fn test_rules_apply_after_concat() {
        let config = Config {
            decoding: vec![Decoding::Strip {
                character: ' ',
                left: 1,
                right: 0,
            }],
            ..Config::default()
        };
        let index = index();
        assert_eq!(decode_tokens(&index, &config, &[7, 0, 0], false).unwrap(), b"hello hello");
    }

    #[test]
    fn test_continuation_prefix_joins_words() {
        let vocab = Vocabulary::new(
            vec![
                Token::new(0, "un"),
                Token::new(1, "##aff"),
                Token::new(2, "##able"),
                Token::new(3, "world"),
            ],
            vec![SpecialToken::new(9, "[CLS]", SpecialTokenKind::Control)],
        );
        let index = LookupIndex::new(&vocab);
        let config = Config {
            templates: vec![Template::new("##", InsertionPosition::WordContinuation)],
            ..Config::default()
        };
        assert_eq!(
            decode_tokens(&index, &config, &[9, 0, 1, 2, 3], false).unwrap(),
            b"unaffable world"
        );
        assert_eq!(
            decode_tokens(&index, &config, &[9, 0, 1, 2, 3], true).unwrap(),
            b"[CLS] unaffable world"
        );
    }

    #[test]
    fn test_word_end_suffix_becomes_space() {
        let vocab = Vocabulary::new(
            vec![
                Token::new(0, "low</w>"),
                Token::new(1, "low"),
                Token::new(2, "er</w>"),
            ],
            vec![],
        );
        let index = LookupIndex::new(&vocab);
        let config = Config {
            templates: vec![Template::new("</w>", InsertionPosition::WordEnd)],
            ..Config::default()
        };
        assert_eq!(decode_tokens(&index, &config, &[0, 1, 2], false).unwrap(), b"low lower");
        assert_eq!(decode_tokens(&index, &config, &[1], false).unwrap(), b"low");
    }
}
