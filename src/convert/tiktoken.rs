//! tiktoken rank files.
//!
//! Each line holds a base64-encoded token and its rank:
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! The rank doubles as the token id and as merge priority: lower ranks merge
//! first. The files carry neither a split pattern nor special tokens, so those
//! are supplied by the caller or picked from the vocabulary size.

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

use crate::core::config::{Config, CL100K_BASE_PATTERN, GPT2_PATTERN};
use crate::core::vocab::{derive_merges, SpecialToken, SpecialTokenKind, Token, TokenId, VocabError, Vocabulary};
use crate::core::{Definition, TokenizerError};

/// Special tokens of cl100k_base.
pub const CL100K_SPECIALS: &[(&str, TokenId)] = &[
    ("<|endoftext|>", 100257),
    ("<|fim_prefix|>", 100258),
    ("<|fim_middle|>", 100259),
    ("<|fim_suffix|>", 100260),
    ("<|im_start|>", 100264),
    ("<|im_end|>", 100265),
    ("<|endofprompt|>", 100276),
];

/// Special tokens of r50k/p50k-sized vocabularies.
pub const P50K_SPECIALS: &[(&str, TokenId)] = &[
    ("<|endoftext|>", 50256),
    ("<|fim_prefix|>", 50281),
    ("<|fim_middle|>", 50282),
    ("<|fim_suffix|>", 50283),
];

const LARGE_VOCAB: usize = 100_000;

/// Parses one `base64 rank` line.
fn parse_line(line: &[u8]) -> Result<(Vec<u8>, TokenId), VocabError> {
    let space_pos = line
        .iter()
        .rposition(|&b| b == b' ')
        .ok_or_else(|| VocabError::Parse("Missing space separator".to_string()))?;

    let token = STANDARD.decode(&line[..space_pos])?;

    let rank_str = std::str::from_utf8(&line[space_pos + 1..])
        .map_err(|_| VocabError::Parse("Invalid UTF-8 in rank".to_string()))?;
    let rank: TokenId = rank_str
        .trim()
        .parse()
        .map_err(|_| VocabError::Parse(format!("Invalid rank: {}", rank_str)))?;
    Ok((token, rank))
}

fn lines(data: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    data.split(|&b| b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| !line.is_empty())
}

/// True if the first non-empty line parses as a rank line.
pub(crate) fn looks_like_tiktoken(data: &[u8]) -> bool {
    lines(data)
        .next()
        .is_some_and(|(_, line)| parse_line(line).is_ok())
}

/// Parses the rank table into tokens ordered by rank.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<Vec<Token>, TokenizerError> {
    let mut tokens = Vec::new();
    for (number, line) in lines(data) {
        let (bytes, rank) = parse_line(line)
            .map_err(|e| TokenizerError::corrupt(format!("line {number}"), e.to_string()))?;
        tokens.push(Token::new(rank, bytes));
    }
    if tokens.is_empty() {
        return Err(TokenizerError::corrupt("vocab", "no tokens"));
    }
    tokens.sort_by_key(|t| t.id);
    Ok(tokens)
}

/// Converts a tiktoken file with an explicit split pattern and special tokens.
pub fn convert_tiktoken(
    data: &[u8],
    pattern: &str,
    specials: &[(&str, TokenId)],
) -> Result<Definition, TokenizerError> {
    let tokens = load_tiktoken_bpe(data)?;
    let order: Vec<usize> = (0..tokens.len()).collect();
    let merges = derive_merges(&tokens, &order, false);

    let specials = specials
        .iter()
        .filter(|&&(text, id)| {
            let taken = tokens.binary_search_by_key(&id, |t| t.id).is_ok();
            if taken {
                debug!(special = text, id, "special id already used by a token, skipping");
            }
            !taken
        })
        .map(|&(text, id)| SpecialToken::new(id, text, SpecialTokenKind::Priority))
        .collect();

    debug!(tokens = tokens.len(), merges = merges.len(), "converted tiktoken vocabulary");
    let mut vocab = Vocabulary::new(tokens, specials);
    vocab.merges = merges;
    Ok(Definition::new(vocab, Config::byte_pair(pattern)).with_meta("source", "tiktoken"))
}

/// Converts a tiktoken file with the pattern and specials matching its size.
pub fn convert_tiktoken_default(data: &[u8]) -> Result<Definition, TokenizerError> {
    let size = lines(data).count();
    if size >= LARGE_VOCAB {
        convert_tiktoken(data, CL100K_BASE_PATTERN, CL100K_SPECIALS)
    } else {
        convert_tiktoken(data, GPT2_PATTERN, P50K_SPECIALS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vocab::Merge;

    fn line(token: &[u8], rank: u32) -> String {
        format!("{} {}\n", STANDARD.encode(token), rank)
    }

    #[test]
    fn test_load_tiktoken_bpe() {
        let data = "SGVsbG8= 0\nV29ybGQ= 1\nIQ== 2\n";
        let tokens = load_tiktoken_bpe(data.as_bytes()).unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].bytes, b"Hello");
        assert_eq!(tokens[1].bytes, b"World");
        assert_eq!(tokens[2].bytes, b"!");
        assert_eq!(tokens[2].id, 2);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let data = "SGVsbG8= 0\r\n\r\nIQ== 1\r\n";
        let tokens = load_tiktoken_bpe(data.as_bytes()).unwrap();
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_bad_line_reports_number() {
        let data = "SGVsbG8= 0\nnot-a-line\n";
        match load_tiktoken_bpe(data.as_bytes()) {
            Err(TokenizerError::CorruptModel { field, .. }) => assert_eq!(field, "line 2"),
            other => panic!("unexpected result: {:?}", other),
        }
        let data = "@@@@ 0\n";
        assert!(matches!(
            load_tiktoken_bpe(data.as_bytes()),
            Err(TokenizerError::CorruptModel { .. })
        ));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            load_tiktoken_bpe(b"\n\n"),
            Err(TokenizerError::CorruptModel { .. })
        ));
    }

    #[test]
    fn test_merges_follow_rank() {
        let mut data = String::new();
        for (rank, token) in [b"a".as_slice(), b"b", b"c", b"ab", b"abc"].iter().enumerate() {
            data.push_str(&line(token, rank as u32));
        }
        let def = convert_tiktoken(data.as_bytes(), GPT2_PATTERN, &[]).unwrap();
        assert_eq!(
            def.vocab.merges,
            vec![
                Merge { left: 0, right: 1, merged: 3 },
                Merge { left: 3, right: 2, merged: 4 },
            ]
        );
        assert_eq!(def.meta.get("source").map(String::as_str), Some("tiktoken"));
    }

    #[test]
    fn test_default_specials_skip_taken_ids() {
        let mut data = String::new();
        for b in 0u8..=255 {
            data.push_str(&line(&[b], b as u32));
        }
        let def = convert_tiktoken_default(data.as_bytes()).unwrap();
        let ids: Vec<u32> = def.vocab.specials.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![50256, 50281, 50282, 50283]);

        let def = convert_tiktoken(data.as_bytes(), GPT2_PATTERN, &[("<|x|>", 7)]).unwrap();
        assert!(def.vocab.specials.is_empty());
    }
}
