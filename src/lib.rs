//! Kitoken - fast tokenizer engine for SentencePiece, `tokenizers`, tiktoken and tekken models
//!
//! Models in any supported format are converted into one [`Definition`]
//! (vocabulary, configuration, metadata) and served by a [`Kitoken`] engine:
//!
//! - Byte-pair encoding with a rank heap (no `O(N²)` rescans on long inputs)
//! - Unigram (Viterbi), WordPiece, whole-word and greedy longest-match encoding
//! - Aho-Corasick special-token matching ahead of regex splitting
//! - Rayon parallelism for batch encoding and decoding
//! - LRU cache for frequently encoded chunks
//! - Versioned native binary format for fast reloading
//!
//! ```no_run
//! use kitoken::Kitoken;
//!
//! # fn main() -> Result<(), kitoken::TokenizerError> {
//! let tokenizer = Kitoken::from_file("tokenizer.model")?;
//! let ids = tokenizer.encode("hello world!", true)?;
//! assert_eq!(tokenizer.decode(&ids)?, b"hello world!");
//! # Ok(())
//! # }
//! ```

pub mod convert;
pub mod core;

pub use convert::ModelFormat;
pub use core::{
    Config, Definition, Kitoken, KitokenOptions, Metadata, SpecialToken, SpecialTokenKind,
    TokenId, TokenizerError, Vocabulary, CL100K_BASE_PATTERN, GPT2_PATTERN, O200K_BASE_PATTERN,
};
