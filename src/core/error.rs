use thiserror::Error;

use super::vocab::VocabError;

/// Errors returned by model parsing, engine construction, encoding and decoding.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Corrupt model data in {field}: {reason}")]
    CorruptModel { field: String, reason: String },
    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid token id: {0}")]
    InvalidToken(u32),
    #[error("No fallback can represent {} bytes: {:?}", .0.len(), String::from_utf8_lossy(.0))]
    EncodingFallbackExhausted(Vec<u8>),
    #[error("Vocabulary error: {0}")]
    Vocab(#[from] VocabError),
    #[error("Regex compilation error (regexr): {0}")]
    Regexr(#[from] regexr::Error),
    #[cfg(feature = "pcre2")]
    #[error("Regex compilation error (PCRE2): {0}")]
    Pcre2(#[from] pcre2::Error),
    #[error("PCRE2 feature not enabled. Compile with --features pcre2")]
    Pcre2NotEnabled,
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasick(#[from] aho_corasick::BuildError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Decoding error: invalid UTF-8")]
    Utf8,
}

impl TokenizerError {
    pub(crate) fn corrupt(field: impl Into<String>, reason: impl Into<String>) -> Self {
        TokenizerError::CorruptModel {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
