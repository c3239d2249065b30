//! Core tokenization engine.
//!
//! # Architecture
//!
//! - [`vocab`], [`config`], [`definition`]: the plain-data model. A
//!   [`Definition`] is everything needed to rebuild an engine.
//! - `index`, `trie`: read-only lookup structures derived from a vocabulary.
//! - `normalize`, `split`: text rewriting and lossless pre-tokenization, with
//!   special tokens carved out by Aho-Corasick before any split rule runs.
//! - `bpe`, `unigram`, `wordpiece`: per-chunk encoders (rank-heap BPE,
//!   greedy longest match, Viterbi, WordPiece).
//! - [`charsmap`]: precompiled SentencePiece character maps.
//! - [`serialization`]: the versioned native binary format.
//! - [`Kitoken`]: the engine, an atomically swappable immutable snapshot with
//!   an LRU chunk cache and Rayon batch methods.
//!
//! # Performance Optimizations
//!
//! - **FxHashMap**: faster hashing than the standard HashMap for byte keys
//! - **Aho-Corasick**: single pass special-token matching
//! - **Rayon parallelism**: multi-core batch encoding and decoding
//! - **LRU cache**: avoids re-encoding repeated chunks
//! - **PCRE2 with JIT** (feature `pcre2`): optional split-pattern backend

mod bpe;
pub mod byte_level;
pub mod charsmap;
pub mod config;
mod decode;
pub mod definition;
mod error;
mod index;
mod normalize;
pub mod serialization;
mod split;
mod tokenizer;
mod trie;
mod unigram;
pub mod vocab;
mod wordpiece;

pub use byte_level::{byte_level_decode, byte_level_encode};
pub use charsmap::CharsMap;
pub use config::{
    Config, Decoding, Fallback, InsertionPosition, Mode, Normalization, Processing, Split,
    SplitBehavior, Template, UnicodeForm, CL100K_BASE_PATTERN, GPT2_PATTERN, O200K_BASE_PATTERN,
};
pub use definition::{Definition, Metadata};
pub use error::TokenizerError;
pub use tokenizer::{Kitoken, KitokenOptions, DEFAULT_CACHE_SIZE};
pub use vocab::{
    Merge, Position, SpecialToken, SpecialTokenKind, Token, TokenId, TokenKind, VocabError,
    Vocabulary,
};
