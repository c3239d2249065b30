//! Vocabulary data model.
//!
//! A [`Vocabulary`] is the normalized, format-independent token table every
//! model parser produces. Token bytes always use the raw byte convention:
//! a SentencePiece `▁` is stored as a plain space, `<0xNN>` pieces are stored
//! as the single byte they stand for, and GPT-2 byte-level strings are mapped
//! back to the bytes they encode. Encoding and decoding never need to know
//! which format a vocabulary came from.
//!
//! Lookup structures (exact map, trie, merge ranks) are derived from a
//! vocabulary by [`LookupIndex`](super::index::LookupIndex) and are never
//! serialized.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token identifier.
pub type TokenId = u32;

/// Errors raised when a vocabulary violates its structural invariants.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Duplicate token id: {0}")]
    DuplicateId(TokenId),
    #[error("Merge {index} references unknown token id {id}")]
    InvalidMerge { index: usize, id: TokenId },
    #[error("Merge {index} does not concatenate its inputs")]
    MergeMismatch { index: usize },
    #[error("Token {0} has no bytes")]
    EmptyToken(TokenId),
    #[error("Expected {expected} scores, found {found}")]
    ScoreCount { expected: usize, found: usize },
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    Parse(String),
}

/// How a regular token takes part in encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TokenKind {
    /// Matched during encoding.
    #[default]
    Normal,
    /// A single-byte fallback piece.
    Byte,
    /// Reserved: decodable, never produced by encoding.
    Unused,
}

/// A regular vocabulary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub bytes: Vec<u8>,
    /// Original piece string, kept when it differs from `bytes`.
    pub text: Option<String>,
    pub kind: TokenKind,
}

impl Token {
    pub fn new(id: TokenId, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            bytes: bytes.into(),
            text: None,
            kind: TokenKind::Normal,
        }
    }

    pub fn with_kind(mut self, kind: TokenKind) -> Self {
        self.kind = kind;
        self
    }

    /// Records the original piece string if it is not just the UTF-8 form of the bytes.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if text.as_bytes() != self.bytes.as_slice() {
            self.text = Some(text);
        }
        self
    }
}

/// Role of a special token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialTokenKind {
    /// Substituted for unrepresentable input; decodes to its surface bytes.
    Unknown,
    /// Sequence marker (bos, eos, pad); never matched in text, decodes to nothing.
    Control,
    /// Matched atomically in text before splitting; decodes to its bytes.
    Priority,
}

/// Where an automatically injected marker goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Start,
    End,
}

/// A vocabulary entry with engine-level meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialToken {
    pub id: TokenId,
    pub bytes: Vec<u8>,
    pub kind: SpecialTokenKind,
    /// Conventional name such as `"bos"`, `"eos"`, `"unk"` or `"pad"`.
    pub ident: Option<String>,
    /// Set when `encode(.., true)` injects this token.
    pub position: Option<Position>,
}

impl SpecialToken {
    pub fn new(id: TokenId, bytes: impl Into<Vec<u8>>, kind: SpecialTokenKind) -> Self {
        Self {
            id,
            bytes: bytes.into(),
            kind,
            ident: None,
            position: None,
        }
    }

    pub fn with_ident(mut self, ident: impl Into<String>) -> Self {
        self.ident = Some(ident.into());
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }
}

/// One BPE merge rule. Position in the merge table is its priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Merge {
    pub left: TokenId,
    pub right: TokenId,
    pub merged: TokenId,
}

/// The token table of a model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    pub tokens: Vec<Token>,
    pub specials: Vec<SpecialToken>,
    /// Ordered by priority, highest first.
    pub merges: Vec<Merge>,
    /// Unigram log probabilities aligned with `tokens`; empty for other models.
    pub scores: Vec<f32>,
}

impl Vocabulary {
    pub fn new(tokens: Vec<Token>, specials: Vec<SpecialToken>) -> Self {
        Self {
            tokens,
            specials,
            merges: Vec::new(),
            scores: Vec::new(),
        }
    }

    /// Number of token id slots, `max_id + 1`.
    pub fn vocab_size(&self) -> usize {
        let max_token = self.tokens.iter().map(|t| t.id).max();
        let max_special = self.specials.iter().map(|s| s.id).max();
        match max_token.max(max_special) {
            Some(max_id) => max_id as usize + 1,
            None => 0,
        }
    }

    /// Checks id uniqueness, merge references and score alignment.
    pub fn validate(&self) -> Result<(), VocabError> {
        self.validate_with_prefix(None)
    }

    /// Like [`validate`](Self::validate), also accepting merges whose right
    /// side carries a word continuation `prefix` that the merged token drops.
    pub fn validate_with_prefix(&self, prefix: Option<&[u8]>) -> Result<(), VocabError> {
        let mut bytes_by_id: FxHashMap<TokenId, &[u8]> =
            FxHashMap::with_capacity_and_hasher(self.tokens.len(), Default::default());
        for token in &self.tokens {
            if token.bytes.is_empty() {
                return Err(VocabError::EmptyToken(token.id));
            }
            if bytes_by_id.insert(token.id, &token.bytes).is_some() {
                return Err(VocabError::DuplicateId(token.id));
            }
        }
        let mut special_ids = rustc_hash::FxHashSet::default();
        for special in &self.specials {
            if bytes_by_id.contains_key(&special.id) || !special_ids.insert(special.id) {
                return Err(VocabError::DuplicateId(special.id));
            }
        }

        for (index, merge) in self.merges.iter().enumerate() {
            let lookup = |id: TokenId| {
                bytes_by_id
                    .get(&id)
                    .copied()
                    .ok_or(VocabError::InvalidMerge { index, id })
            };
            let left = lookup(merge.left)?;
            let right = lookup(merge.right)?;
            let merged = lookup(merge.merged)?;
            let joined = concatenates(left, right, merged)
                || prefix
                    .and_then(|p| right.strip_prefix(p))
                    .is_some_and(|rest| concatenates(left, rest, merged));
            if !joined {
                return Err(VocabError::MergeMismatch { index });
            }
        }

        if !self.scores.is_empty() && self.scores.len() != self.tokens.len() {
            return Err(VocabError::ScoreCount {
                expected: self.tokens.len(),
                found: self.scores.len(),
            });
        }
        Ok(())
    }

    /// Returns the special token with the given conventional name.
    pub fn special(&self, ident: &str) -> Option<&SpecialToken> {
        self.specials
            .iter()
            .find(|s| s.ident.as_deref() == Some(ident))
    }
}

fn concatenates(left: &[u8], right: &[u8], merged: &[u8]) -> bool {
    merged.len() == left.len() + right.len() && merged.starts_with(left) && merged.ends_with(right)
}

/// Derives merge rules from a vocabulary ordered by priority.
///
/// For each token in `order`, every split into two halves that are both
/// mergeable tokens yields one rule. With `char_boundaries` set, splits inside
/// a UTF-8 code point are skipped since such symbols never exist when
/// encoding starts from code points.
pub(crate) fn derive_merges(tokens: &[Token], order: &[usize], char_boundaries: bool) -> Vec<Merge> {
    let mut by_bytes: FxHashMap<&[u8], TokenId> =
        FxHashMap::with_capacity_and_hasher(tokens.len(), Default::default());
    for token in tokens.iter().filter(|t| t.kind == TokenKind::Normal) {
        by_bytes.entry(token.bytes.as_slice()).or_insert(token.id);
    }
    for token in tokens.iter().filter(|t| t.kind == TokenKind::Byte) {
        by_bytes.entry(token.bytes.as_slice()).or_insert(token.id);
    }

    let mut merges = Vec::with_capacity(tokens.len() * 2);
    for &i in order {
        let token = &tokens[i];
        if token.kind != TokenKind::Normal || token.bytes.len() < 2 {
            continue;
        }
        let bytes = token.bytes.as_slice();
        let text = if char_boundaries {
            std::str::from_utf8(bytes).ok()
        } else {
            None
        };
        for split in 1..bytes.len() {
            if let Some(text) = text {
                if !text.is_char_boundary(split) {
                    continue;
                }
            }
            if let (Some(&left), Some(&right)) =
                (by_bytes.get(&bytes[..split]), by_bytes.get(&bytes[split..]))
            {
                merges.push(Merge {
                    left,
                    right,
                    merged: token.id,
                });
            }
        }
    }
    merges
}
