//! Native binary definition format.
//!
//! Layout:
//!
//! ```text
//! b"kitoken"   7-byte magic
//! u16 LE       format version
//! ...          bincode body
//! ```
//!
//! Version 1 bodies hold `(Vocabulary, Config)` without metadata and load with
//! empty metadata. Version 2 bodies hold the whole [`Definition`]. Version 3
//! adds word templates to the configuration. Writers always emit the current
//! version.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use super::config::{Config, Decoding, Fallback, Mode, Normalization, Processing, Split};
use super::definition::{Definition, Metadata};
use super::error::TokenizerError;
use super::vocab::Vocabulary;

/// Leading bytes of every serialized definition.
pub const MAGIC: &[u8; 7] = b"kitoken";

pub const VERSION_V1: u16 = 1;
pub const VERSION_V2: u16 = 2;
pub const VERSION_V3: u16 = 3;
/// Version written by [`Definition::to_bytes`].
pub const CURRENT_VERSION: u16 = VERSION_V3;

const HEADER_LEN: usize = MAGIC.len() + 2;

/// Returns true if `data` starts with the definition magic.
pub fn is_definition(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

impl Definition {
    /// Serializes the definition in the current format version.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TokenizerError> {
        let body = bincode::serialize(self)
            .map_err(|e| TokenizerError::corrupt("definition", e.to_string()))?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Deserializes and validates a definition of any supported version.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TokenizerError> {
        if !is_definition(data) {
            return Err(TokenizerError::UnsupportedFormat(
                "missing definition magic".to_string(),
            ));
        }
        if data.len() < HEADER_LEN {
            return Err(TokenizerError::corrupt("header", "truncated version tag"));
        }
        let version = u16::from_le_bytes([data[MAGIC.len()], data[MAGIC.len() + 1]]);
        let body = &data[HEADER_LEN..];
        let definition = match version {
            VERSION_V1 => read_v1(body)?,
            VERSION_V2 => read_v2(body)?,
            VERSION_V3 => read_v3(body)?,
            other => {
                return Err(TokenizerError::UnsupportedFormat(format!(
                    "definition version {other}"
                )))
            }
        };
        definition.validate()?;
        debug!(
            version,
            tokens = definition.vocab.tokens.len(),
            merges = definition.vocab.merges.len(),
            "definition loaded"
        );
        Ok(definition)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), TokenizerError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }
}

/// Configuration layout of versions 1 and 2, before word templates.
#[derive(Deserialize)]
struct ConfigV2 {
    mode: Mode,
    normalization: Vec<Normalization>,
    split: Vec<Split>,
    processing: Vec<Processing>,
    decoding: Vec<Decoding>,
    fallback: Vec<Fallback>,
}

impl From<ConfigV2> for Config {
    fn from(config: ConfigV2) -> Self {
        Self {
            mode: config.mode,
            normalization: config.normalization,
            split: config.split,
            processing: config.processing,
            decoding: config.decoding,
            fallback: config.fallback,
            templates: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct DefinitionV2 {
    meta: Metadata,
    vocab: Vocabulary,
    config: ConfigV2,
}

fn read_v1(body: &[u8]) -> Result<Definition, TokenizerError> {
    let (vocab, config): (Vocabulary, ConfigV2) = bincode::deserialize(body)
        .map_err(|e| TokenizerError::corrupt("body (v1)", e.to_string()))?;
    Ok(Definition {
        meta: Metadata::new(),
        vocab,
        config: config.into(),
    })
}

fn read_v2(body: &[u8]) -> Result<Definition, TokenizerError> {
    let definition: DefinitionV2 = bincode::deserialize(body)
        .map_err(|e| TokenizerError::corrupt("body (v2)", e.to_string()))?;
    Ok(Definition {
        meta: definition.meta,
        vocab: definition.vocab,
        config: definition.config.into(),
    })
}

fn read_v3(body: &[u8]) -> Result<Definition, TokenizerError> {
    bincode::deserialize(body).map_err(|e| TokenizerError::corrupt("body (v3)", e.to_string()))
}
