use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::config::Config;
use super::error::TokenizerError;
use super::vocab::Vocabulary;

/// Free-form model metadata, passed through unchanged.
pub type Metadata = BTreeMap<String, String>;

/// Complete, format-independent engine state.
///
/// This is the unit read by parsers, written by the serializer and swapped by
/// `Kitoken::set_definition`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Definition {
    pub meta: Metadata,
    pub vocab: Vocabulary,
    pub config: Config,
}

impl Definition {
    pub fn new(vocab: Vocabulary, config: Config) -> Self {
        Self {
            meta: Metadata::new(),
            vocab,
            config,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Checks the vocabulary invariants under the configured word templates.
    pub fn validate(&self) -> Result<(), TokenizerError> {
        self.vocab
            .validate_with_prefix(self.config.word_prefix().map(str::as_bytes))?;
        Ok(())
    }
}
