//! Read-only lookup structures derived from a [`Vocabulary`].

use rustc_hash::FxHashMap;
use tracing::debug;

use super::trie::Trie;
use super::vocab::{SpecialToken, SpecialTokenKind, TokenId, TokenKind, Vocabulary};

/// Priority assigned to a merge rule; lower merges first.
pub type Rank = u32;

#[derive(Debug, Clone)]
pub(crate) struct DecodeEntry {
    pub bytes: Vec<u8>,
    /// Control markers are dropped unless specials are requested.
    pub control: bool,
    /// Special tokens never carry word templates.
    pub special: bool,
}

/// Exact-match map, prefix trie, merge ranks and decoder table for one vocabulary.
///
/// Built once per vocabulary and shared between snapshots, so replacing only
/// the configuration never rebuilds it.
#[derive(Debug)]
pub struct LookupIndex {
    encoder: FxHashMap<Vec<u8>, TokenId>,
    trie: Trie,
    merges: FxHashMap<(TokenId, TokenId), (Rank, TokenId)>,
    byte_tokens: [Option<TokenId>; 256],
    decoder: FxHashMap<TokenId, DecodeEntry>,
    scores: FxHashMap<TokenId, f32>,
    min_score: f32,
    unknown: Option<TokenId>,
    vocab_size: usize,
}

impl LookupIndex {
    /// Builds the index. The vocabulary must already be validated.
    pub fn new(vocab: &Vocabulary) -> Self {
        let mut encoder: FxHashMap<Vec<u8>, TokenId> =
            FxHashMap::with_capacity_and_hasher(vocab.tokens.len(), Default::default());
        let mut normal: Vec<(&[u8], TokenId)> = vocab
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Normal)
            .map(|t| (t.bytes.as_slice(), t.id))
            .collect();
        normal.sort_by_key(|&(_, id)| id);
        for &(bytes, id) in &normal {
            if encoder.contains_key(bytes) {
                debug!(id, "duplicate token bytes, keeping lowest id");
                continue;
            }
            encoder.insert(bytes.to_vec(), id);
        }

        let mut byte_tokens = [None; 256];
        for token in &vocab.tokens {
            if token.kind == TokenKind::Byte && token.bytes.len() == 1 {
                let slot = &mut byte_tokens[token.bytes[0] as usize];
                if slot.is_none() {
                    *slot = Some(token.id);
                }
                encoder.entry(token.bytes.clone()).or_insert(token.id);
            }
        }
        for (b, slot) in byte_tokens.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = encoder.get([b as u8].as_slice()).copied();
            }
        }

        let trie = Trie::new(normal.iter().copied());

        let mut first_rank: FxHashMap<TokenId, Rank> = FxHashMap::default();
        let mut merges = FxHashMap::with_capacity_and_hasher(vocab.merges.len(), Default::default());
        for (i, merge) in vocab.merges.iter().enumerate() {
            let rank = *first_rank.entry(merge.merged).or_insert(i as Rank);
            merges
                .entry((merge.left, merge.right))
                .or_insert((rank, merge.merged));
        }

        let mut decoder = FxHashMap::with_capacity_and_hasher(
            vocab.tokens.len() + vocab.specials.len(),
            Default::default(),
        );
        for token in &vocab.tokens {
            decoder.insert(
                token.id,
                DecodeEntry {
                    bytes: token.bytes.clone(),
                    control: false,
                    special: false,
                },
            );
        }
        for special in &vocab.specials {
            decoder.insert(
                special.id,
                DecodeEntry {
                    bytes: special.bytes.clone(),
                    control: special.kind == SpecialTokenKind::Control,
                    special: true,
                },
            );
        }

        let scores: FxHashMap<TokenId, f32> = vocab
            .tokens
            .iter()
            .zip(vocab.scores.iter())
            .map(|(t, &s)| (t.id, s))
            .collect();
        let min_score = scores.values().copied().fold(0.0f32, f32::min);

        let unknown = vocab
            .specials
            .iter()
            .find(|s| s.kind == SpecialTokenKind::Unknown)
            .map(|s| s.id);

        debug!(
            tokens = vocab.tokens.len(),
            specials = vocab.specials.len(),
            merges = merges.len(),
            trie_nodes = trie.len(),
            "lookup index built"
        );

        Self {
            encoder,
            trie,
            merges,
            byte_tokens,
            decoder,
            scores,
            min_score,
            unknown,
            vocab_size: vocab.vocab_size(),
        }
    }

    /// Exact-match lookup.
    #[inline]
    pub fn id_of(&self, bytes: &[u8]) -> Option<TokenId> {
        self.encoder.get(bytes).copied()
    }

    /// Bytes of any token or special token.
    #[inline]
    pub fn bytes_of(&self, id: TokenId) -> Option<&[u8]> {
        self.decoder.get(&id).map(|e| e.bytes.as_slice())
    }

    #[inline]
    pub(crate) fn decode_entry(&self, id: TokenId) -> Option<&DecodeEntry> {
        self.decoder.get(&id)
    }

    /// Merge rank and result of joining `left` and `right`, if any rule does.
    #[inline]
    pub fn merge(&self, left: TokenId, right: TokenId) -> Option<(Rank, TokenId)> {
        self.merges.get(&(left, right)).copied()
    }

    #[inline]
    pub(crate) fn prefixes<'a>(
        &'a self,
        bytes: &'a [u8],
    ) -> impl Iterator<Item = (usize, TokenId)> + 'a {
        self.trie.prefixes(bytes)
    }

    /// Token used for `byte` when falling back to bytes.
    #[inline]
    pub fn byte_token(&self, byte: u8) -> Option<TokenId> {
        self.byte_tokens[byte as usize]
    }

    #[inline]
    pub(crate) fn score(&self, id: TokenId) -> f32 {
        self.scores.get(&id).copied().unwrap_or(self.min_score)
    }

    /// Cost of covering one character with the unknown token.
    #[inline]
    pub(crate) fn unknown_score(&self) -> f32 {
        self.min_score - 10.0
    }

    #[inline]
    pub fn unknown(&self) -> Option<TokenId> {
        self.unknown
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// Specials carved out of input text before splitting.
pub(crate) fn carved_specials(specials: &[SpecialToken]) -> Vec<&SpecialToken> {
    specials
        .iter()
        .filter(|s| s.kind == SpecialTokenKind::Priority && !s.bytes.is_empty())
        .collect()
}
