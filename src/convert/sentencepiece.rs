//! SentencePiece `.model` protobufs.
//!
//! Pieces keep their protobuf index as id. `▁` becomes a plain space and
//! `<0xNN>` byte pieces become the byte they name, so the whitespace handling
//! of the trainer is expressed entirely through normalization, split and
//! decoding rules on spaces.
//!
//! A non-empty precompiled charsmap is the normalization SentencePiece itself
//! runs, so it replaces the rules named by the normalizer.

use sentencepiece_model::{ModelType, SentencePieceModel, Type};
use tracing::{debug, warn};

use super::{has_control_tokens, parse_byte_piece};
use crate::core::charsmap::CharsMap;
use crate::core::config::{
    Config, Decoding, Fallback, Mode, Normalization, Processing, Split, SplitBehavior, UnicodeForm,
};
use crate::core::vocab::{
    derive_merges, Position, SpecialToken, SpecialTokenKind, Token, TokenId, TokenKind, Vocabulary,
};
use crate::core::{Definition, Metadata, TokenizerError};

const WHITESPACE: char = '\u{2581}';
const DEFAULT_UNK_SURFACE: &str = " \u{2047} ";

/// Trainer settings that shape the converted configuration.
struct Trainer {
    model_type: ModelType,
    suffix: bool,
    byte_fallback: bool,
    unk_surface: String,
    bos_id: i32,
    eos_id: i32,
    pad_id: i32,
}

impl Default for Trainer {
    fn default() -> Self {
        Self {
            model_type: ModelType::Unigram,
            suffix: false,
            byte_fallback: false,
            unk_surface: DEFAULT_UNK_SURFACE.to_string(),
            bos_id: 1,
            eos_id: 2,
            pad_id: -1,
        }
    }
}

/// Converts a serialized SentencePiece model.
pub fn convert_sentencepiece(data: &[u8]) -> Result<Definition, TokenizerError> {
    let model = SentencePieceModel::from_slice(data)
        .map_err(|e| TokenizerError::corrupt("model", format!("{e:?}")))?;
    convert_model(&model)
}

fn convert_model(model: &SentencePieceModel) -> Result<Definition, TokenizerError> {
    let trainer = model
        .trainer()
        .map(|t| Trainer {
            model_type: t.model_type(),
            suffix: t.treat_whitespace_as_suffix(),
            byte_fallback: t.byte_fallback(),
            unk_surface: t.unk_surface().to_string(),
            bos_id: t.bos_id(),
            eos_id: t.eos_id(),
            pad_id: t.pad_id(),
        })
        .unwrap_or_default();

    if model.pieces.is_empty() {
        return Err(TokenizerError::corrupt("pieces", "model has no pieces"));
    }
    if model.pieces.len() > TokenId::MAX as usize {
        return Err(TokenizerError::corrupt("pieces", "too many pieces"));
    }

    let mut tokens = Vec::with_capacity(model.pieces.len());
    let mut scores = Vec::with_capacity(model.pieces.len());
    let mut specials = Vec::new();
    let mut unk = None;

    for (index, piece) in model.pieces.iter().enumerate() {
        let id = index as TokenId;
        let field = || format!("pieces[{index}]");
        let text = piece
            .piece
            .as_deref()
            .ok_or_else(|| TokenizerError::corrupt(field(), "piece has no text"))?;
        if text.is_empty() {
            return Err(TokenizerError::corrupt(field(), "piece is empty"));
        }
        let bytes = text.replace(WHITESPACE, " ");

        match piece.r#type() {
            Type::Normal => {
                tokens.push(Token::new(id, bytes).with_text(text));
                scores.push(piece.score());
            }
            Type::Byte => {
                let byte = parse_byte_piece(text).ok_or_else(|| {
                    TokenizerError::corrupt(field(), format!("invalid byte piece {text:?}"))
                })?;
                tokens.push(
                    Token::new(id, vec![byte])
                        .with_kind(TokenKind::Byte)
                        .with_text(text),
                );
                scores.push(piece.score());
            }
            Type::Unused => {
                tokens.push(
                    Token::new(id, bytes)
                        .with_kind(TokenKind::Unused)
                        .with_text(text),
                );
                scores.push(piece.score());
            }
            Type::Unknown => {
                if unk.is_some() {
                    warn!(id, "multiple unknown pieces, keeping the first");
                    continue;
                }
                unk = Some(id);
                specials.push(
                    SpecialToken::new(id, trainer.unk_surface.clone(), SpecialTokenKind::Unknown)
                        .with_ident("unk"),
                );
            }
            Type::Control => {
                let mut special = SpecialToken::new(id, text, SpecialTokenKind::Control);
                let index = index as i64;
                if index == trainer.bos_id as i64 {
                    special = special.with_ident("bos").at(Position::Start);
                } else if index == trainer.eos_id as i64 {
                    special = special.with_ident("eos").at(Position::End);
                } else if index == trainer.pad_id as i64 {
                    special = special.with_ident("pad");
                }
                specials.push(special);
            }
            Type::UserDefined => {
                specials.push(SpecialToken::new(id, bytes, SpecialTokenKind::Priority));
            }
        }
    }

    let mut config = Config::default();
    let mut meta = Metadata::new();
    meta.insert("source".to_string(), "sentencepiece".to_string());
    meta.insert(
        "sentencepiece.model_type".to_string(),
        format!("{:?}", trainer.model_type).to_lowercase(),
    );

    let mut remove_extra_whitespaces = true;
    let mut add_dummy_prefix = true;
    if let Some(normalizer) = model.normalizer() {
        let name = normalizer.name();
        let charsmap = normalizer.precompiled_charsmap();
        match name {
            _ if !charsmap.is_empty() => {
                debug!(normalizer = name, bytes = charsmap.len(), "using precompiled charsmap");
                config
                    .normalization
                    .push(Normalization::CharsMap(CharsMap::from_bytes(charsmap)?));
            }
            "user_defined" => {
                return Err(TokenizerError::corrupt(
                    "normalizer_spec",
                    "user_defined normalizer has no precompiled charsmap",
                ))
            }
            "identity" | "" => {}
            "nfkc" => config.normalization.push(Normalization::Unicode(UnicodeForm::Nfkc)),
            "nmt_nfkc" => {
                config.normalization.push(Normalization::Unicode(UnicodeForm::Nfkc));
                config.normalization.push(Normalization::Nmt);
            }
            "nfkc_cf" => {
                config.normalization.push(Normalization::Unicode(UnicodeForm::Nfkc));
                config.normalization.push(Normalization::CaseFold { upper: false });
            }
            "nmt_nfkc_cf" => {
                config.normalization.push(Normalization::Unicode(UnicodeForm::Nfkc));
                config.normalization.push(Normalization::Nmt);
                config.normalization.push(Normalization::CaseFold { upper: false });
            }
            other => {
                return Err(TokenizerError::UnsupportedFormat(format!(
                    "sentencepiece normalizer {other:?}"
                )))
            }
        }
        remove_extra_whitespaces = normalizer.remove_extra_whitespaces();
        add_dummy_prefix = normalizer.add_dummy_prefix();
        meta.insert("sentencepiece.normalizer".to_string(), name.to_string());
    }
    meta.insert(
        "sentencepiece.remove_extra_whitespaces".to_string(),
        remove_extra_whitespaces.to_string(),
    );
    meta.insert(
        "sentencepiece.add_dummy_prefix".to_string(),
        add_dummy_prefix.to_string(),
    );
    meta.insert(
        "sentencepiece.treat_whitespace_as_suffix".to_string(),
        trainer.suffix.to_string(),
    );
    meta.insert(
        "sentencepiece.byte_fallback".to_string(),
        trainer.byte_fallback.to_string(),
    );

    let behavior = if trainer.suffix {
        SplitBehavior::MergeLeft
    } else {
        SplitBehavior::MergeRight
    };
    if remove_extra_whitespaces {
        config.normalization.push(Normalization::Strip {
            character: ' ',
            left: u32::MAX,
            right: u32::MAX,
        });
        config.normalization.push(Normalization::Collapse { character: ' ' });
        if let Some(id) = unk {
            config.processing.push(Processing::Collapse { id });
        }
        config.split.push(Split::Character {
            character: ' ',
            behavior,
        });
    } else {
        config.split.push(Split::Pattern {
            pattern: " +".to_string(),
            behavior,
        });
    }

    if add_dummy_prefix {
        let (left, right) = if trainer.suffix { (0, 1) } else { (1, 0) };
        config.normalization.push(Normalization::Extend {
            character: ' ',
            left,
            right,
        });
        config.decoding.push(Decoding::Strip {
            character: ' ',
            left,
            right,
        });
    }

    if trainer.byte_fallback {
        config.fallback.push(Fallback::Bytes);
        if !has_control_tokens(&tokens) {
            config.split.insert(0, Split::Bytes);
        }
    }
    config.fallback.push(Fallback::Unknown);
    if unk.is_none() && !trainer.byte_fallback {
        warn!("model has neither an unknown piece nor byte fallback, unseen text will fail to encode");
    }

    let mut merges = Vec::new();
    config.mode = match trainer.model_type {
        ModelType::Bpe => {
            let mut order: Vec<usize> = (0..tokens.len())
                .filter(|&i| tokens[i].kind == TokenKind::Normal)
                .collect();
            order.sort_by(|&a, &b| {
                scores[b]
                    .total_cmp(&scores[a])
                    .then(tokens[a].id.cmp(&tokens[b].id))
            });
            merges = derive_merges(&tokens, &order, true);
            scores.clear();
            Mode::CharPair
        }
        ModelType::Unigram => Mode::Unigram,
        ModelType::Word => {
            scores.clear();
            Mode::Word
        }
        ModelType::Char => {
            scores.clear();
            Mode::Greedy
        }
    };

    debug!(
        tokens = tokens.len(),
        specials = specials.len(),
        merges = merges.len(),
        mode = ?config.mode,
        "converted sentencepiece model"
    );

    let mut vocab = Vocabulary::new(tokens, specials);
    vocab.merges = merges;
    vocab.scores = scores;
    Ok(Definition { meta, vocab, config })
}
