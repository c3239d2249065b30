//! Mistral `tekken.json` vocabularies.
//!
//! A tekken file is a tiktoken rank table in JSON, with base64 token bytes and
//! the split pattern in its `config`. Special tokens are not listed: they take
//! the lowest ids, and every ranked token is shifted up by their count.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::debug;

use crate::core::config::{Config, Fallback};
use crate::core::vocab::{
    derive_merges, Position, SpecialToken, SpecialTokenKind, Token, TokenId, Vocabulary,
};
use crate::core::{Definition, TokenizerError};

const SUPPORTED_VERSION: &str = "v3";

/// Named special tokens in id order.
const SPECIALS: [&str; 14] = [
    "<unk>",
    "<s>",
    "</s>",
    "[INST]",
    "[/INST]",
    "[AVAILABLE_TOOLS]",
    "[/AVAILABLE_TOOLS]",
    "[TOOL_RESULTS]",
    "[/TOOL_RESULTS]",
    "[TOOL_CALLS]",
    "<pad>",
    "[PREFIX]",
    "[MIDDLE]",
    "[SUFFIX]",
];

#[derive(Deserialize, Debug)]
struct TekkenJson {
    config: TekkenConfig,
    vocab: Vec<TekkenToken>,
}

#[derive(Deserialize, Debug)]
struct TekkenConfig {
    pattern: String,
    default_vocab_size: Option<usize>,
    default_num_special_tokens: Option<usize>,
    version: String,
}

#[derive(Deserialize, Debug)]
struct TekkenToken {
    rank: usize,
    token_bytes: String,
}

/// Top-level keys, read without building the document.
#[derive(Deserialize)]
struct Shape {
    config: Option<IgnoredAny>,
    vocab: Option<IgnoredAny>,
    model: Option<IgnoredAny>,
}

/// True if `data` is a JSON object with `config` and `vocab` but no `model`.
pub(crate) fn looks_like_tekken(data: &[u8]) -> bool {
    serde_json::from_slice::<Shape>(data)
        .is_ok_and(|shape| shape.config.is_some() && shape.vocab.is_some() && shape.model.is_none())
}

fn special(id: TokenId, text: &str) -> SpecialToken {
    match text {
        "<unk>" => SpecialToken::new(id, text, SpecialTokenKind::Unknown).with_ident("unk"),
        "<s>" => SpecialToken::new(id, text, SpecialTokenKind::Control)
            .with_ident("bos")
            .at(Position::Start),
        "</s>" => SpecialToken::new(id, text, SpecialTokenKind::Control)
            .with_ident("eos")
            .at(Position::End),
        "<pad>" => SpecialToken::new(id, text, SpecialTokenKind::Control).with_ident("pad"),
        _ => SpecialToken::new(id, text, SpecialTokenKind::Priority),
    }
}

/// Converts a `tekken.json` document.
pub fn convert_tekken(data: &[u8]) -> Result<Definition, TokenizerError> {
    let tekken: TekkenJson = serde_json::from_slice(data).map_err(|e| {
        TokenizerError::corrupt(
            format!("tekken.json:{}:{}", e.line(), e.column()),
            e.to_string(),
        )
    })?;
    let config = tekken.config;
    if config.version != SUPPORTED_VERSION {
        return Err(TokenizerError::UnsupportedFormat(format!(
            "tekken version {:?}",
            config.version
        )));
    }

    let specials_len = config.default_num_special_tokens.unwrap_or(SPECIALS.len());
    let vocab_len = config
        .default_vocab_size
        .unwrap_or(tekken.vocab.len() + specials_len);
    if vocab_len > tekken.vocab.len() + specials_len {
        return Err(TokenizerError::corrupt(
            "config.default_vocab_size",
            format!(
                "{vocab_len} exceeds {} ranked and {specials_len} special tokens",
                tekken.vocab.len()
            ),
        ));
    }
    if vocab_len < specials_len || vocab_len > TokenId::MAX as usize {
        return Err(TokenizerError::corrupt(
            "config.default_vocab_size",
            format!("{vocab_len} is out of range"),
        ));
    }

    let specials: Vec<SpecialToken> = (0..specials_len)
        .map(|i| match SPECIALS.get(i) {
            Some(text) => special(i as TokenId, text),
            None => special(i as TokenId, &format!("<SPECIAL_{i}>")),
        })
        .collect();

    // tokens past the vocabulary size are dropped
    let mut tokens = Vec::with_capacity(vocab_len - specials_len);
    for (index, token) in tekken.vocab.into_iter().take(vocab_len - specials_len).enumerate() {
        let bytes = STANDARD.decode(token.token_bytes.as_bytes()).map_err(|e| {
            TokenizerError::corrupt(format!("vocab[{index}].token_bytes"), e.to_string())
        })?;
        let id = token
            .rank
            .checked_add(specials_len)
            .filter(|&id| id <= TokenId::MAX as usize)
            .ok_or_else(|| {
                TokenizerError::corrupt(format!("vocab[{index}].rank"), "rank is out of range")
            })?;
        tokens.push(Token::new(id as TokenId, bytes));
    }
    if tokens.is_empty() {
        return Err(TokenizerError::corrupt("vocab", "no tokens"));
    }
    tokens.sort_by_key(|t| t.id);

    let order: Vec<usize> = (0..tokens.len()).collect();
    let merges = derive_merges(&tokens, &order, false);

    let mut config = Config::byte_pair(&config.pattern);
    config.fallback.push(Fallback::Unknown);

    debug!(
        tokens = tokens.len(),
        specials = specials.len(),
        merges = merges.len(),
        "converted tekken vocabulary"
    );
    let mut vocab = Vocabulary::new(tokens, specials);
    vocab.merges = merges;
    Ok(Definition::new(vocab, config).with_meta("source", "tekken"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_tekken() {
        assert!(looks_like_tekken(
            br#"{"config": {"version": "v3"}, "vocab": []}"#
        ));
        assert!(!looks_like_tekken(br#"{"model": {}, "vocab": []}"#));
        assert!(!looks_like_tekken(
            br#"{"config": {}, "vocab": [], "model": {}}"#
        ));
        assert!(!looks_like_tekken(b"{not json"));
    }

    #[test]
    fn test_special_kinds() {
        assert_eq!(special(0, "<unk>").kind, SpecialTokenKind::Unknown);
        assert_eq!(special(1, "<s>").position, Some(Position::Start));
        assert_eq!(special(2, "</s>").position, Some(Position::End));
        assert_eq!(special(3, "[INST]").kind, SpecialTokenKind::Priority);
        assert_eq!(special(10, "<pad>").ident.as_deref(), Some("pad"));
    }
}
