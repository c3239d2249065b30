use lru::LruCache;
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

use super::bpe::{byte_pair_encode, Affixes, Part};
use super::config::{Config, Fallback, Mode, Processing};
use super::decode::decode_tokens;
use super::definition::{Definition, Metadata};
use super::error::TokenizerError;
use super::index::LookupIndex;
use super::normalize::normalize;
use super::split::{ChunkKind, RegexOptions, Splitter};
use super::unigram::{greedy_encode, unigram_encode};
use super::vocab::{Position, SpecialToken, TokenId, Vocabulary};
use super::wordpiece::wordpiece_encode;
use crate::convert::{self, ModelFormat};

/// Default cache size for encoded chunks
pub const DEFAULT_CACHE_SIZE: usize = 4096;

/// Build options that are not part of a model definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KitokenOptions {
    /// Capacity of the per-model chunk cache; `0` disables it.
    pub cache_size: usize,
    /// Try JIT compilation for split patterns.
    pub use_jit: bool,
    /// Compile split patterns with PCRE2 (requires the `pcre2` feature).
    pub use_pcre2: bool,
}

impl Default for KitokenOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            use_jit: true,
            use_pcre2: false,
        }
    }
}

type ChunkCache = Mutex<LruCache<u64, (Box<[u8]>, Vec<TokenId>)>>;

/// Everything one encode or decode call reads. Never mutated after build.
struct Snapshot {
    meta: Metadata,
    vocab: Arc<Vocabulary>,
    config: Config,
    index: Arc<LookupIndex>,
    splitter: Splitter,
    start_markers: Vec<TokenId>,
    end_markers: Vec<TokenId>,
    chunk_cache: Option<ChunkCache>,
}

impl Snapshot {
    fn build(
        meta: Metadata,
        vocab: Arc<Vocabulary>,
        config: Config,
        index: Arc<LookupIndex>,
        options: &KitokenOptions,
    ) -> Result<Self, TokenizerError> {
        let splitter = Splitter::new(
            &config.split,
            &vocab.specials,
            RegexOptions {
                use_jit: options.use_jit,
                use_pcre2: options.use_pcre2,
            },
        )?;
        let markers = |position: Position| -> Vec<TokenId> {
            vocab
                .specials
                .iter()
                .filter(|s| s.position == Some(position))
                .map(|s| s.id)
                .collect()
        };
        let start_markers = markers(Position::Start);
        let end_markers = markers(Position::End);
        let chunk_cache = NonZeroUsize::new(options.cache_size).map(|n| Mutex::new(LruCache::new(n)));

        if config.mode == Mode::Unigram && vocab.scores.is_empty() {
            debug!("unigram mode without scores, all tokens weigh the same");
        }
        debug!(
            mode = ?config.mode,
            split_rules = config.split.len(),
            start_markers = start_markers.len(),
            end_markers = end_markers.len(),
            "snapshot built"
        );

        Ok(Self {
            meta,
            vocab,
            config,
            index,
            splitter,
            start_markers,
            end_markers,
            chunk_cache,
        })
    }

    fn definition(&self) -> Definition {
        Definition {
            meta: self.meta.clone(),
            vocab: (*self.vocab).clone(),
            config: self.config.clone(),
        }
    }

    /// Compute a fast hash for a byte slice to use as an LRU cache key.
    #[inline]
    fn hash_slice(slice: &[u8]) -> u64 {
        let mut hasher = FxHasher::default();
        slice.hash(&mut hasher);
        hasher.finish()
    }

    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<TokenId>, TokenizerError> {
        let text = normalize(text, &self.config.normalization);
        let mut result = Vec::with_capacity(text.len() / 3 + 2);
        if add_special_tokens {
            result.extend_from_slice(&self.start_markers);
        }

        for chunk in self.splitter.split(&text) {
            let slice = &text[chunk.start..chunk.end];
            match chunk.kind {
                ChunkKind::Special(id) => result.push(id),
                ChunkKind::Bytes => {
                    for &b in slice.as_bytes() {
                        match self.index.byte_token(b) {
                            Some(id) => result.push(id),
                            None => self.fallback(&[b], &mut result)?,
                        }
                    }
                }
                ChunkKind::Text => self.encode_chunk(slice, &mut result)?,
            }
        }

        for rule in &self.config.processing {
            match rule {
                Processing::Collapse { id } => {
                    result.dedup_by(|next, previous| *next == *id && *previous == *id);
                }
            }
        }

        if add_special_tokens {
            result.extend_from_slice(&self.end_markers);
        }
        Ok(result)
    }

    fn affixes(&self) -> Affixes<'_> {
        Affixes {
            prefix: self.config.word_prefix().unwrap_or_default().as_bytes(),
            suffix: self.config.word_suffix().unwrap_or_default().as_bytes(),
        }
    }

    /// Token spelling the entire chunk as one word, if any.
    fn whole_word(&self, slice: &str) -> Option<TokenId> {
        let bytes = slice.as_bytes();
        match self.config.mode {
            Mode::Unigram => None,
            Mode::WordPiece { max_chars }
                if max_chars > 0 && slice.chars().count() > max_chars as usize =>
            {
                None
            }
            _ => {
                let suffix = self.affixes().suffix;
                if suffix.is_empty() {
                    self.index.id_of(bytes)
                } else {
                    self.index.id_of(&[bytes, suffix].concat())
                }
            }
        }
    }

    /// Encode a single text chunk with LRU caching.
    fn encode_chunk(&self, slice: &str, out: &mut Vec<TokenId>) -> Result<(), TokenizerError> {
        let bytes = slice.as_bytes();

        if self.config.separates_words() && slice.chars().all(char::is_whitespace) {
            return Ok(());
        }

        // Fast path: check if entire chunk is a known token
        if let Some(id) = self.whole_word(slice) {
            out.push(id);
            return Ok(());
        }

        let hash = Self::hash_slice(bytes);
        if let Some(cache) = &self.chunk_cache {
            if let Ok(mut cache) = cache.lock() {
                if let Some((key, cached)) = cache.get(&hash) {
                    if **key == *bytes {
                        out.extend_from_slice(cached);
                        return Ok(());
                    }
                }
            }
        }

        let parts = match self.config.mode {
            Mode::BytePair => byte_pair_encode(slice, &self.index, false, self.affixes()),
            Mode::CharPair => byte_pair_encode(slice, &self.index, true, self.affixes()),
            Mode::Greedy => greedy_encode(slice, &self.index),
            Mode::Unigram => unigram_encode(slice, &self.index),
            Mode::Word => vec![Part {
                start: 0,
                end: bytes.len(),
                id: None,
            }],
            Mode::WordPiece { max_chars } => {
                wordpiece_encode(slice, &self.index, self.affixes().prefix, max_chars)
            }
        };
        let mut encoded = Vec::with_capacity(parts.len());
        self.resolve(bytes, &parts, &mut encoded)?;
        out.extend_from_slice(&encoded);

        if let Some(cache) = &self.chunk_cache {
            if let Ok(mut cache) = cache.lock() {
                cache.put(hash, (bytes.into(), encoded));
            }
        }
        Ok(())
    }

    /// Emits resolved parts and sends consecutive unresolved ones through the fallbacks.
    fn resolve(
        &self,
        bytes: &[u8],
        parts: &[Part],
        out: &mut Vec<TokenId>,
    ) -> Result<(), TokenizerError> {
        let mut pending: Option<(usize, usize)> = None;
        for part in parts {
            match part.id {
                Some(id) => {
                    if let Some((start, end)) = pending.take() {
                        self.fallback(&bytes[start..end], out)?;
                    }
                    out.push(id);
                }
                None => {
                    pending = Some(match pending {
                        Some((start, _)) => (start, part.end),
                        None => (part.start, part.end),
                    });
                }
            }
        }
        if let Some((start, end)) = pending {
            self.fallback(&bytes[start..end], out)?;
        }
        Ok(())
    }

    fn fallback(&self, bytes: &[u8], out: &mut Vec<TokenId>) -> Result<(), TokenizerError> {
        for fallback in &self.config.fallback {
            match fallback {
                Fallback::Bytes => {
                    if bytes.iter().all(|&b| self.index.byte_token(b).is_some()) {
                        out.extend(bytes.iter().filter_map(|&b| self.index.byte_token(b)));
                        return Ok(());
                    }
                }
                Fallback::Unknown => {
                    if let Some(unknown) = self.index.unknown() {
                        out.push(unknown);
                        return Ok(());
                    }
                }
            }
        }
        Err(TokenizerError::EncodingFallbackExhausted(bytes.to_vec()))
    }

    fn decode(&self, tokens: &[TokenId], with_specials: bool) -> Result<Vec<u8>, TokenizerError> {
        decode_tokens(&self.index, &self.config, tokens, with_specials)
    }
}

/// Tokenizer engine over one loaded model.
///
/// The model lives in an immutable snapshot behind an `Arc`. Every call
/// clones the `Arc` once and runs against that snapshot without locking, so
/// [`set_definition`](Self::set_definition) and [`set_config`](Self::set_config)
/// never disturb calls already in flight: those finish against the model they
/// started with, and the old snapshot is dropped with its last reference.
///
/// # Performance Characteristics
///
/// - Single texts are encoded sequentially; [`encode_all`](Self::encode_all)
///   and [`decode_all`](Self::decode_all) parallelize across inputs with Rayon.
/// - Byte-pair models merge with a rank heap, `O(L log L)` per chunk.
/// - Frequently repeated chunks are served from an LRU cache owned by the
///   snapshot, so swapping the model also discards it.
/// - Special tokens are matched with Aho-Corasick ahead of split rules.
pub struct Kitoken {
    state: RwLock<Arc<Snapshot>>,
    options: KitokenOptions,
}

impl Kitoken {
    /// Create an engine from a definition with default options.
    pub fn new(definition: Definition) -> Result<Self, TokenizerError> {
        Self::with_options(definition, KitokenOptions::default())
    }

    /// Create an engine with explicit cache and regex options.
    pub fn with_options(
        definition: Definition,
        options: KitokenOptions,
    ) -> Result<Self, TokenizerError> {
        let snapshot = Self::build(definition, &options)?;
        Ok(Self {
            state: RwLock::new(Arc::new(snapshot)),
            options,
        })
    }

    fn build(definition: Definition, options: &KitokenOptions) -> Result<Snapshot, TokenizerError> {
        definition.validate()?;
        let Definition {
            meta,
            vocab,
            config,
        } = definition;
        let index = Arc::new(LookupIndex::new(&vocab));
        Snapshot::build(meta, Arc::new(vocab), config, index, options)
    }

    /// Load a model from raw bytes, detecting its format.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TokenizerError> {
        let format = ModelFormat::detect(data)?;
        Self::from_format(format, data)
    }

    /// Load a model from a file, detecting its format.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Load a model of a known format.
    pub fn from_format(format: ModelFormat, data: &[u8]) -> Result<Self, TokenizerError> {
        Self::new(convert::parse(format, data)?)
    }

    /// Load a SentencePiece `.model` protobuf.
    pub fn from_sentencepiece(data: &[u8]) -> Result<Self, TokenizerError> {
        Self::from_format(ModelFormat::SentencePiece, data)
    }

    /// Load a SentencePiece `.model` file.
    pub fn from_sentencepiece_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let data = std::fs::read(path)?;
        Self::from_sentencepiece(&data)
    }

    /// Load a `tokenizers` JSON model (`tokenizer.json`).
    pub fn from_tokenizers(data: &[u8]) -> Result<Self, TokenizerError> {
        Self::from_format(ModelFormat::Tokenizers, data)
    }

    /// Load a tiktoken rank file with a split pattern and special tokens.
    pub fn from_tiktoken(
        data: &[u8],
        pattern: &str,
        specials: &[(&str, TokenId)],
    ) -> Result<Self, TokenizerError> {
        Self::new(convert::tiktoken::convert_tiktoken(data, pattern, specials)?)
    }

    /// Load a Mistral `tekken.json` vocabulary.
    pub fn from_tekken(data: &[u8]) -> Result<Self, TokenizerError> {
        Self::from_format(ModelFormat::Tekken, data)
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, snapshot: Snapshot) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    /// Encode text to token ids.
    ///
    /// Priority special tokens occurring in `text` are always encoded as their
    /// ids. With `add_special_tokens`, the model's start and end markers are
    /// added around the result.
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<TokenId>, TokenizerError> {
        self.snapshot().encode(text, add_special_tokens)
    }

    /// Batch encode multiple texts in parallel.
    ///
    /// Results are in input order and equal to encoding each text on its own.
    pub fn encode_all<S: AsRef<str> + Sync>(
        &self,
        texts: &[S],
        add_special_tokens: bool,
    ) -> Result<Vec<Vec<TokenId>>, TokenizerError> {
        let snapshot = self.snapshot();
        texts
            .par_iter()
            .map(|text| snapshot.encode(text.as_ref(), add_special_tokens))
            .collect()
    }

    /// Decode token ids to bytes, skipping control markers.
    pub fn decode(&self, tokens: &[TokenId]) -> Result<Vec<u8>, TokenizerError> {
        self.snapshot().decode(tokens, false)
    }

    /// Decode token ids to bytes, optionally keeping control markers.
    pub fn decode_with_specials(
        &self,
        tokens: &[TokenId],
        with_specials: bool,
    ) -> Result<Vec<u8>, TokenizerError> {
        self.snapshot().decode(tokens, with_specials)
    }

    /// Decode token ids to a string, failing on invalid UTF-8.
    pub fn decode_string(&self, tokens: &[TokenId]) -> Result<String, TokenizerError> {
        String::from_utf8(self.decode(tokens)?).map_err(|_| TokenizerError::Utf8)
    }

    /// Decode token ids to a string, replacing invalid UTF-8 with replacement character.
    pub fn decode_lossy(&self, tokens: &[TokenId]) -> Result<String, TokenizerError> {
        Ok(String::from_utf8_lossy(&self.decode(tokens)?).into_owned())
    }

    /// Batch decode multiple token lists in parallel.
    pub fn decode_all<T: AsRef<[TokenId]> + Sync>(
        &self,
        token_lists: &[T],
    ) -> Result<Vec<Vec<u8>>, TokenizerError> {
        let snapshot = self.snapshot();
        token_lists
            .par_iter()
            .map(|tokens| snapshot.decode(tokens.as_ref(), false))
            .collect()
    }

    /// The current definition.
    pub fn definition(&self) -> Definition {
        self.snapshot().definition()
    }

    /// Replace vocabulary, configuration and metadata in one swap.
    ///
    /// On error the current model stays in place.
    pub fn set_definition(&self, definition: Definition) -> Result<(), TokenizerError> {
        let snapshot = Self::build(definition, &self.options)?;
        self.swap(snapshot);
        Ok(())
    }

    /// The current configuration.
    pub fn config(&self) -> Config {
        self.snapshot().config.clone()
    }

    /// Replace the configuration, keeping the vocabulary and its index.
    ///
    /// On error the current model stays in place.
    pub fn set_config(&self, config: Config) -> Result<(), TokenizerError> {
        let current = self.snapshot();
        let snapshot = Snapshot::build(
            current.meta.clone(),
            Arc::clone(&current.vocab),
            config,
            Arc::clone(&current.index),
            &self.options,
        )?;
        self.swap(snapshot);
        Ok(())
    }

    /// Serialize the current definition in the native binary format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TokenizerError> {
        self.definition().to_bytes()
    }

    /// Write the current definition to a file in the native binary format.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), TokenizerError> {
        self.definition().to_file(path)
    }

    /// Get the vocabulary size (max token id + 1, special tokens included).
    pub fn vocab_size(&self) -> usize {
        self.snapshot().index.vocab_size()
    }

    /// The special tokens of the current model.
    pub fn special_tokens(&self) -> Vec<SpecialToken> {
        self.snapshot().vocab.specials.clone()
    }

    /// Id of the token with exactly these bytes.
    pub fn token_to_id(&self, bytes: &[u8]) -> Option<TokenId> {
        self.snapshot().index.id_of(bytes)
    }

    /// Bytes of a token or special token.
    pub fn id_to_token(&self, id: TokenId) -> Option<Vec<u8>> {
        self.snapshot().index.bytes_of(id).map(<[u8]>::to_vec)
    }

    /// Clear the encoding cache.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.snapshot().chunk_cache {
            if let Ok(mut cache) = cache.lock() {
                cache.clear();
            }
        }
    }

    /// Get the current cache size.
    pub fn cache_len(&self) -> usize {
        self.snapshot()
            .chunk_cache
            .as_ref()
            .and_then(|cache| cache.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }
}

impl Clone for Kitoken {
    fn clone(&self) -> Self {
        Self {
            state: RwLock::new(self.snapshot()),
            options: self.options,
        }
    }
}

impl std::fmt::Debug for Kitoken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Kitoken")
            .field("tokens", &snapshot.vocab.tokens.len())
            .field("specials", &snapshot.vocab.specials.len())
            .field("merges", &snapshot.vocab.merges.len())
            .field("mode", &snapshot.config.mode)
            .finish()
    }
}
