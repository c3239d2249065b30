//! Pre-tokenization and post-processing configuration.
//!
//! A [`Config`] is plain data. It is compiled into a splitter when a snapshot
//! is built, and replaced as a whole through `Kitoken::set_config`.

use serde::{Deserialize, Serialize};

use super::charsmap::CharsMap;
use super::vocab::TokenId;

/// Default regex pattern for cl100k_base (GPT-4, GPT-3.5-turbo)
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Default regex pattern for o200k_base (GPT-4o)
pub const O200K_BASE_PATTERN: &str = r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// GPT-2 pre-tokenization pattern used by byte-level `tokenizer.json` models.
pub const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Encoding algorithm applied to each text chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Mode {
    /// BPE starting from single bytes.
    #[default]
    BytePair,
    /// BPE starting from single code points.
    CharPair,
    /// Longest-prefix match from left to right.
    Greedy,
    /// Highest-scoring segmentation over token scores.
    Unigram,
    /// Whole-chunk lookup. A chunk that is not a token is unknown as a whole.
    Word,
    /// Longest match from the start of the chunk, continuation pieces looked
    /// up with the [`InsertionPosition::WordContinuation`] template. A chunk
    /// that cannot be covered, or has more than `max_chars` characters
    /// (`0` for no limit), is unknown as a whole.
    WordPiece { max_chars: u32 },
}

/// How the matches of a split rule relate to the text between them.
///
/// Every behavior is lossless: the resulting chunks cover the input exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitBehavior {
    /// Matches and gaps become separate chunks.
    Isolate,
    /// Adjacent matches are joined, then isolated.
    Merge,
    /// Each match is appended to the gap before it.
    MergeLeft,
    /// Each match is prepended to the gap after it.
    MergeRight,
}

/// A pre-tokenization rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    /// Split on regex matches.
    Pattern {
        pattern: String,
        behavior: SplitBehavior,
    },
    /// Split on a literal character.
    Character {
        character: char,
        behavior: SplitBehavior,
    },
    /// Isolate runs of ASCII control characters; they are encoded byte by byte.
    Bytes,
}

/// Unicode normalization form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnicodeForm {
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
}

/// A text rewrite applied before splitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    Unicode(UnicodeForm),
    /// SentencePiece NMT cleanup: drop control characters, map odd spaces to `' '`.
    Nmt,
    CaseFold { upper: bool },
    /// Pad non-empty text with `left`/`right` copies of `character`.
    Extend { character: char, left: u32, right: u32 },
    /// Remove up to `left`/`right` copies of `character` from the ends.
    Strip { character: char, left: u32, right: u32 },
    /// Collapse runs of `character` into one.
    Collapse { character: char },
    Replace { pattern: String, replacement: String },
    /// Longest-match rewrite through a precompiled SentencePiece character map.
    CharsMap(CharsMap),
    /// Drop NUL, U+FFFD and control characters; map whitespace to `' '`.
    Clean,
    /// Drop combining marks. Usually preceded by NFD.
    StripAccents,
}

/// Where a word template is attached during lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertionPosition {
    /// Before every piece of a word except the first (`##` in BERT).
    WordContinuation,
    /// After the last piece of a word (`</w>` in CLIP and GPT-1).
    WordEnd,
}

/// Text that vocabulary entries carry inside words but input text does not.
///
/// With any template configured, whitespace delimits words: chunks made only
/// of whitespace encode to nothing and decoding puts the spaces back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Template {
    pub content: String,
    pub position: InsertionPosition,
}

impl Template {
    pub fn new(content: impl Into<String>, position: InsertionPosition) -> Self {
        Self {
            content: content.into(),
            position,
        }
    }
}

/// A rewrite of the encoded id sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Processing {
    /// Collapse runs of `id` into one.
    Collapse { id: TokenId },
}

/// A rewrite of decoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decoding {
    Strip { character: char, left: u32, right: u32 },
    Replace { pattern: String, replacement: String },
}

/// Strategy for bytes no token covers, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fallback {
    /// One byte token per byte.
    Bytes,
    /// The unknown special token.
    Unknown,
}

/// The full rule set applied around the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,
    pub normalization: Vec<Normalization>,
    pub split: Vec<Split>,
    pub processing: Vec<Processing>,
    pub decoding: Vec<Decoding>,
    pub fallback: Vec<Fallback>,
    pub templates: Vec<Template>,
}

impl Config {
    /// A regex-split byte-pair configuration, as used by tiktoken vocabularies.
    pub fn byte_pair(pattern: &str) -> Self {
        Self {
            mode: Mode::BytePair,
            split: vec![Split::Pattern {
                pattern: pattern.to_string(),
                behavior: SplitBehavior::Isolate,
            }],
            fallback: vec![Fallback::Bytes],
            ..Self::default()
        }
    }

    fn template(&self, position: InsertionPosition) -> Option<&str> {
        self.templates
            .iter()
            .find(|t| t.position == position && !t.content.is_empty())
            .map(|t| t.content.as_str())
    }

    /// Prefix of word continuation pieces, if configured.
    pub fn word_prefix(&self) -> Option<&str> {
        self.template(InsertionPosition::WordContinuation)
    }

    /// Suffix of word-final pieces, if configured.
    pub fn word_suffix(&self) -> Option<&str> {
        self.template(InsertionPosition::WordEnd)
    }

    /// True if whitespace-only chunks are word separators rather than text.
    pub fn separates_words(&self) -> bool {
        matches!(self.mode, Mode::WordPiece { .. })
            || self.word_prefix().is_some()
            || self.word_suffix().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_templates() {
        let mut config = Config::default();
        assert!(!config.separates_words());

        config.templates = vec![
            Template::new("", InsertionPosition::WordEnd),
            Template::new("##", InsertionPosition::WordContinuation),
        ];
        assert_eq!(config.word_prefix(), Some("##"));
        assert_eq!(config.word_suffix(), None);
        assert!(config.separates_words());

        let config = Config {
            mode: Mode::WordPiece { max_chars: 100 },
            ..Config::default()
        };
        assert!(config.separates_words());
    }
}
