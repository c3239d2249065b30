//! `tokenizers` JSON models (`tokenizer.json`).
//!
//! Two token spellings occur in practice. Byte-level models (GPT-2 and its
//! descendants) spell every byte as a printable character and are decoded
//! with [`byte_level`](crate::core::byte_level). Metaspace models (Llama,
//! Mistral) spell spaces as `▁`, which becomes a plain space here together
//! with every normalizer and decoder rule that mentions it.
//!
//! WordPiece models and BPE models with a continuing-subword prefix or an
//! end-of-word suffix carry those affixes as word templates. Their
//! pre-tokenizers drop whitespace, which the templates restore on decode.
//!
//! Components without a lossless equivalent are rejected with
//! [`TokenizerError::UnsupportedFormat`] rather than approximated.

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use super::{escape_regex, has_control_tokens, parse_byte_piece};
use crate::core::byte_level::byte_level_decode;
use crate::core::charsmap::CharsMap;
use crate::core::config::{
    Config, Decoding, Fallback, InsertionPosition, Mode, Normalization, Processing, Split,
    SplitBehavior, Template, UnicodeForm, GPT2_PATTERN,
};
use crate::core::vocab::{
    Merge, Position, SpecialToken, SpecialTokenKind, Token, TokenId, TokenKind, Vocabulary,
};
use crate::core::{Definition, Metadata, TokenizerError};

const WHITESPACE: char = '\u{2581}';

/// Code point ranges BERT treats as CJK ideographs.
const CJK_RANGES: [(u32, u32); 8] = [
    (0x4E00, 0x9FFF),
    (0x3400, 0x4DBF),
    (0x20000, 0x2A6DF),
    (0x2A700, 0x2B73F),
    (0x2B740, 0x2B81F),
    (0x2B920, 0x2CEAF),
    (0xF900, 0xFAFF),
    (0x2F800, 0x2FA1F),
];

/// ASCII symbols count as punctuation for BERT even outside `\p{P}`.
const BERT_PUNCTUATION: &str = r"[\p{P}!-/:-@\[-`{-~]";
const WHITESPACE_RUN: &str = r"\s+";
const WORD_OR_SYMBOLS: &str = r"\w+|[^\w\s]+";

/// Spacing fixes of the WordPiece decoder's cleanup step.
const WORDPIECE_CLEANUP: [(&str, &str); 11] = [
    (" .", "."),
    (" ?", "?"),
    (" !", "!"),
    (" ,", ","),
    (" ' ", "'"),
    (" n't", "n't"),
    (" 'm", "'m"),
    (" do not", " don't"),
    (" 's", "'s"),
    (" 've", "'ve"),
    (" 're", "'re"),
];

mod json {
    use std::collections::BTreeMap;

    use rustc_hash::FxHashMap;
    use serde::Deserialize;

    use crate::core::vocab::TokenId;

    fn default_true() -> bool {
        true
    }

    fn default_replacement() -> char {
        super::WHITESPACE
    }

    fn default_unk_token() -> String {
        "[UNK]".to_string()
    }

    fn default_subword_prefix() -> String {
        "##".to_string()
    }

    fn default_max_chars() -> u32 {
        100
    }


    #[derive(Deserialize, Debug)]
    pub struct TokenizerJson {
        #[serde(default)]
        pub added_tokens: Vec<AddedToken>,
        pub normalizer: Option<Normalizer>,
        pub pre_tokenizer: Option<PreTokenizer>,
        pub post_processor: Option<PostProcessor>,
        pub decoder: Option<Decoder>,
        pub model: Model,
        #[serde(flatten)]
        pub extra: BTreeMap<String, serde_json::Value>,
    }

    #[derive(Deserialize, Debug)]
    pub struct AddedToken {
        pub id: TokenId,
        pub content: String,
    }

    #[derive(Deserialize, Debug)]
    #[serde(tag = "type")]
    pub enum Model {
        #[serde(rename = "BPE")]
        Bpe(Bpe),
        Unigram(Unigram),
        WordPiece(WordPiece),
        #[serde(other)]
        Unsupported,
    }

    #[derive(Deserialize, Debug)]
    pub struct Bpe {
        pub unk_token: Option<String>,
        pub continuing_subword_prefix: Option<String>,
        pub end_of_word_suffix: Option<String>,
        pub fuse_unk: Option<bool>,
        pub byte_fallback: Option<bool>,
        pub vocab: FxHashMap<String, TokenId>,
        pub merges: Vec<MergeEntry>,
    }

    #[derive(Deserialize, Debug)]
    pub struct WordPiece {
        #[serde(default = "default_unk_token")]
        pub unk_token: String,
        #[serde(default = "default_subword_prefix")]
        pub continuing_subword_prefix: String,
        #[serde(default = "default_max_chars")]
        pub max_input_chars_per_word: u32,
        pub vocab: FxHashMap<String, TokenId>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Unigram {
        pub unk_id: Option<usize>,
        pub vocab: Vec<(String, f64)>,
        pub byte_fallback: Option<bool>,
    }

    /// `"a b"` in older files, `["a", "b"]` in newer ones.
    #[derive(Deserialize, Debug)]
    #[serde(untagged)]
    pub enum MergeEntry {
        Joined(String),
        Pair(String, String),
    }

    #[derive(Deserialize, Debug)]
    pub enum Pattern {
        String(String),
        Regex(String),
    }

    #[derive(Deserialize, Debug)]
    #[serde(tag = "type")]
    #[allow(clippy::upper_case_acronyms)]
    pub enum Normalizer {
        NFC,
        NFD,
        NFKC,
        NFKD,
        Lowercase,
        Nmt,
        Replace { pattern: Pattern, content: String },
        Prepend { prepend: String },
        StripAccents {},
        BertNormalizer {
            #[serde(default = "default_true")]
            clean_text: bool,
            #[serde(default = "default_true")]
            handle_chinese_chars: bool,
            strip_accents: Option<bool>,
            #[serde(default = "default_true")]
            lowercase: bool,
        },
        /// Base64 of a SentencePiece charsmap blob.
        Precompiled {
            #[serde(default)]
            precompiled_charsmap: String,
        },
        Sequence { normalizers: Vec<Normalizer> },
        #[serde(other)]
        Unsupported,
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[serde(rename_all = "snake_case")]
    pub enum PrependScheme {
        First,
        Never,
        #[default]
        Always,
    }

    #[derive(Deserialize, Debug, Clone, Copy)]
    pub enum SplitDelimiterBehavior {
        Removed,
        Isolated,
        MergedWithPrevious,
        MergedWithNext,
        Contiguous,
    }

    #[derive(Deserialize, Debug)]
    #[serde(tag = "type")]
    pub enum PreTokenizer {
        ByteLevel {
            #[serde(default)]
            add_prefix_space: bool,
            #[serde(default = "default_true")]
            use_regex: bool,
        },
        Metaspace {
            #[serde(default = "default_replacement")]
            replacement: char,
            #[serde(default)]
            prepend_scheme: PrependScheme,
            add_prefix_space: Option<bool>,
            #[serde(default = "default_true")]
            split: bool,
        },
        Split {
            pattern: Pattern,
            behavior: SplitDelimiterBehavior,
            #[serde(default)]
            invert: bool,
        },
        Digits {
            #[serde(default)]
            individual_digits: bool,
        },
        BertPreTokenizer {},
        Whitespace {},
        WhitespaceSplit {},
        Sequence {
            pretokenizers: Vec<PreTokenizer>,
        },
        #[serde(other)]
        Unsupported,
    }

    #[derive(Deserialize, Debug)]
    pub enum TemplatePiece {
        Sequence {},
        SpecialToken { id: String },
    }

    #[derive(Deserialize, Debug)]
    pub struct TemplateSpecial {
        pub ids: Vec<TokenId>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(tag = "type")]
    pub enum PostProcessor {
        TemplateProcessing {
            single: Vec<TemplatePiece>,
            #[serde(default)]
            special_tokens: BTreeMap<String, TemplateSpecial>,
        },
        ByteLevel {},
        BertProcessing {
            sep: (String, TokenId),
            cls: (String, TokenId),
        },
        RobertaProcessing {
            sep: (String, TokenId),
            cls: (String, TokenId),
        },
        Sequence {
            processors: Vec<PostProcessor>,
        },
        #[serde(other)]
        Other,
    }

    #[derive(Deserialize, Debug)]
    #[serde(tag = "type")]
    pub enum Decoder {
        ByteLevel {},
        ByteFallback {},
        Fuse {},
        Metaspace {
            #[serde(default = "default_replacement")]
            replacement: char,
            #[serde(default)]
            prepend_scheme: PrependScheme,
            add_prefix_space: Option<bool>,
        },
        Replace {
            pattern: Pattern,
            content: String,
        },
        Strip {
            content: char,
            start: u32,
            stop: u32,
        },
        WordPiece {
            #[serde(default = "default_true")]
            cleanup: bool,
        },
        #[serde(rename = "BPEDecoder")]
        Bpe {},
        Sequence {
            decoders: Vec<Decoder>,
        },
        #[serde(other)]
        Unsupported,
    }
}

use json::{Decoder, Model, Normalizer, Pattern, PostProcessor, PreTokenizer, PrependScheme};

fn flatten_normalizers(normalizer: Normalizer, out: &mut Vec<Normalizer>) {
    match normalizer {
        Normalizer::Sequence { normalizers } => {
            for n in normalizers {
                flatten_normalizers(n, out);
            }
        }
        other => out.push(other),
    }
}

fn flatten_pre_tokenizers(pre_tokenizer: PreTokenizer, out: &mut Vec<PreTokenizer>) {
    match pre_tokenizer {
        PreTokenizer::Sequence { pretokenizers } => {
            for p in pretokenizers {
                flatten_pre_tokenizers(p, out);
            }
        }
        other => out.push(other),
    }
}

fn flatten_post_processors(processor: PostProcessor, out: &mut Vec<PostProcessor>) {
    match processor {
        PostProcessor::Sequence { processors } => {
            for p in processors {
                flatten_post_processors(p, out);
            }
        }
        other => out.push(other),
    }
}

fn flatten_decoders(decoder: Decoder, out: &mut Vec<Decoder>) {
    match decoder {
        Decoder::Sequence { decoders } => {
            for d in decoders {
                flatten_decoders(d, out);
            }
        }
        other => out.push(other),
    }
}

fn unsupported(what: impl std::fmt::Display) -> TokenizerError {
    TokenizerError::UnsupportedFormat(format!("tokenizer.json {what}"))
}

/// Token spelling used by the model's vocabulary strings.
#[derive(Debug, Clone, Copy)]
struct Spelling {
    byte_level: bool,
    metaspace: bool,
}

impl Spelling {
    /// Maps `▁` to a space in rule text of metaspace models.
    fn text(self, text: &str) -> String {
        if self.metaspace {
            text.replace(WHITESPACE, " ")
        } else {
            text.to_string()
        }
    }

    fn char(self, c: char) -> char {
        if self.metaspace && c == WHITESPACE {
            ' '
        } else {
            c
        }
    }

    fn bytes(self, token: &str) -> Vec<u8> {
        if self.byte_level {
            byte_level_decode(token).unwrap_or_else(|| {
                debug!(token, "token outside the byte-level alphabet, keeping UTF-8");
                token.as_bytes().to_vec()
            })
        } else {
            self.text(token).into_bytes()
        }
    }
}

/// Converts a `tokenizer.json` document.
pub fn convert_tokenizers(data: &[u8]) -> Result<Definition, TokenizerError> {
    let tokenizer: json::TokenizerJson = serde_json::from_slice(data).map_err(|e| {
        TokenizerError::corrupt(
            format!("tokenizer.json:{}:{}", e.line(), e.column()),
            e.to_string(),
        )
    })?;

    let mut normalizers = Vec::new();
    if let Some(n) = tokenizer.normalizer {
        flatten_normalizers(n, &mut normalizers);
    }
    let mut pre_tokenizers = Vec::new();
    if let Some(p) = tokenizer.pre_tokenizer {
        flatten_pre_tokenizers(p, &mut pre_tokenizers);
    }
    let mut post_processors = Vec::new();
    if let Some(p) = tokenizer.post_processor {
        flatten_post_processors(p, &mut post_processors);
    }
    let mut decoders = Vec::new();
    if let Some(d) = tokenizer.decoder {
        flatten_decoders(d, &mut decoders);
    }

    let spelling = Spelling {
        byte_level: pre_tokenizers
            .iter()
            .any(|p| matches!(p, PreTokenizer::ByteLevel { .. }))
            || decoders.iter().any(|d| matches!(d, Decoder::ByteLevel {})),
        metaspace: pre_tokenizers
            .iter()
            .any(|p| matches!(p, PreTokenizer::Metaspace { .. }))
            || decoders.iter().any(|d| matches!(d, Decoder::Metaspace { .. }))
            || normalizers.iter().any(|n| {
                matches!(n, Normalizer::Replace { pattern: Pattern::String(p), content }
                    if p == " " && content.starts_with(WHITESPACE))
            }),
    };

    let byte_fallback_decoder = decoders
        .iter()
        .any(|d| matches!(d, Decoder::ByteFallback {}));

    let mut config = Config::default();
    convert_normalizers(normalizers, spelling, &mut config)?;
    let drops_whitespace = convert_pre_tokenizers(pre_tokenizers, spelling, &mut config)?;
    convert_decoders(decoders, spelling, &mut config)?;
    let markers = template_markers(post_processors, &tokenizer.added_tokens);

    let added_ids: FxHashSet<TokenId> = tokenizer.added_tokens.iter().map(|t| t.id).collect();
    let mut meta = Metadata::new();
    meta.insert("source".to_string(), "tokenizers".to_string());

    let (tokens, merges, scores, unk, byte_fallback) = match tokenizer.model {
        Model::Bpe(model) => {
            meta.insert("tokenizers.model".to_string(), "BPE".to_string());
            let affixes = [
                (model.continuing_subword_prefix.as_deref(), InsertionPosition::WordContinuation),
                (model.end_of_word_suffix.as_deref(), InsertionPosition::WordEnd),
            ];
            for (content, position) in affixes {
                if let Some(content) = content.filter(|c| !c.is_empty()) {
                    config
                        .templates
                        .push(Template::new(spelling.text(content), position));
                }
            }
            let byte_fallback = model.byte_fallback.unwrap_or(false) || byte_fallback_decoder;
            let unk = match &model.unk_token {
                Some(unk_token) => Some(
                    model
                        .vocab
                        .get(unk_token)
                        .copied()
                        .or_else(|| {
                            tokenizer
                                .added_tokens
                                .iter()
                                .find(|t| &t.content == unk_token)
                                .map(|t| t.id)
                        })
                        .ok_or_else(|| {
                            TokenizerError::corrupt("model.unk_token", format!("{unk_token:?} is not a token"))
                        })?,
                ),
                None => None,
            };

            let mut entries: Vec<(&String, TokenId)> =
                model.vocab.iter().map(|(s, &id)| (s, id)).collect();
            entries.sort_by_key(|&(_, id)| id);
            let tokens: Vec<Token> = entries
                .into_iter()
                .filter(|&(_, id)| !added_ids.contains(&id) && Some(id) != unk)
                .map(|(s, id)| make_token(s, id, spelling, byte_fallback))
                .collect();

            let prefix = model.continuing_subword_prefix.as_deref().unwrap_or_default();
            let merges = resolve_merges(&model.vocab, &model.merges, &tokens, prefix)?;
            if model.fuse_unk.unwrap_or(false) {
                if let Some(id) = unk {
                    config.processing.push(Processing::Collapse { id });
                }
            }
            config.mode = if spelling.byte_level {
                Mode::BytePair
            } else {
                Mode::CharPair
            };
            let unk = unk.map(|id| {
                let surface = model.unk_token.as_deref().unwrap_or_default();
                (id, spelling.bytes(surface))
            });
            (tokens, merges, Vec::new(), unk, byte_fallback)
        }
        Model::Unigram(model) => {
            meta.insert("tokenizers.model".to_string(), "Unigram".to_string());
            let byte_fallback = model.byte_fallback.unwrap_or(false) || byte_fallback_decoder;
            if model.vocab.len() > TokenId::MAX as usize {
                return Err(TokenizerError::corrupt("model.vocab", "too many pieces"));
            }
            let unk = match model.unk_id {
                Some(index) => {
                    let (text, _) = model.vocab.get(index).ok_or_else(|| {
                        TokenizerError::corrupt("model.unk_id", format!("{index} is out of range"))
                    })?;
                    Some((index as TokenId, spelling.bytes(text)))
                }
                None => None,
            };
            let unk_id = unk.as_ref().map(|&(id, _)| id);

            let mut tokens = Vec::with_capacity(model.vocab.len());
            let mut scores = Vec::with_capacity(model.vocab.len());
            for (index, (text, score)) in model.vocab.iter().enumerate() {
                let id = index as TokenId;
                if added_ids.contains(&id) || Some(id) == unk_id {
                    continue;
                }
                tokens.push(make_token(text, id, spelling, byte_fallback));
                scores.push(*score as f32);
            }
            if let Some(id) = unk_id {
                config.processing.push(Processing::Collapse { id });
            }
            config.mode = Mode::Unigram;
            (tokens, Vec::new(), scores, unk, byte_fallback)
        }
        Model::WordPiece(model) => {
            meta.insert("tokenizers.model".to_string(), "WordPiece".to_string());
            let unk_id = model
                .vocab
                .get(&model.unk_token)
                .copied()
                .or_else(|| {
                    tokenizer
                        .added_tokens
                        .iter()
                        .find(|t| t.content == model.unk_token)
                        .map(|t| t.id)
                })
                .ok_or_else(|| {
                    TokenizerError::corrupt(
                        "model.unk_token",
                        format!("{:?} is not a token", model.unk_token),
                    )
                })?;

            let mut entries: Vec<(&String, TokenId)> =
                model.vocab.iter().map(|(s, &id)| (s, id)).collect();
            entries.sort_by_key(|&(_, id)| id);
            let tokens: Vec<Token> = entries
                .into_iter()
                .filter(|&(_, id)| !added_ids.contains(&id) && id != unk_id)
                .map(|(s, id)| make_token(s, id, spelling, false))
                .collect();

            if !model.continuing_subword_prefix.is_empty() {
                config.templates.push(Template::new(
                    spelling.text(&model.continuing_subword_prefix),
                    InsertionPosition::WordContinuation,
                ));
            }
            config.mode = Mode::WordPiece {
                max_chars: model.max_input_chars_per_word,
            };
            let unk = Some((unk_id, spelling.bytes(&model.unk_token)));
            (tokens, Vec::new(), Vec::new(), unk, false)
        }
        Model::Unsupported => return Err(unsupported("model type")),
    };

    if tokens.is_empty() {
        return Err(TokenizerError::corrupt("model.vocab", "no tokens"));
    }
    if drops_whitespace && !config.separates_words() {
        return Err(unsupported(
            "whitespace-removing pre-tokenizer without word prefix or suffix",
        ));
    }

    if byte_fallback || spelling.byte_level {
        config.fallback.push(Fallback::Bytes);
    }
    if byte_fallback && !spelling.byte_level && !has_control_tokens(&tokens) {
        config.split.insert(0, Split::Bytes);
    }
    if unk.is_some() {
        config.fallback.push(Fallback::Unknown);
    }

    let specials = build_specials(&tokenizer.added_tokens, unk, &markers);

    for (key, value) in tokenizer.extra {
        if !value.is_null() {
            meta.insert(format!("tokenizers.{key}"), value.to_string());
        }
    }

    debug!(
        tokens = tokens.len(),
        specials = specials.len(),
        merges = merges.len(),
        mode = ?config.mode,
        "converted tokenizers model"
    );

    let mut vocab = Vocabulary::new(tokens, specials);
    vocab.merges = merges;
    vocab.scores = scores;
    Ok(Definition { meta, vocab, config })
}

fn make_token(text: &str, id: TokenId, spelling: Spelling, byte_fallback: bool) -> Token {
    if byte_fallback {
        if let Some(byte) = parse_byte_piece(text) {
            return Token::new(id, vec![byte])
                .with_kind(TokenKind::Byte)
                .with_text(text);
        }
    }
    Token::new(id, spelling.bytes(text)).with_text(text)
}

/// Looks up merge symbols. With a continuation `prefix`, the right symbol
/// loses its prefix when joined, so `un ##aff` forms `unaff`.
fn resolve_merges(
    vocab: &FxHashMap<String, TokenId>,
    entries: &[json::MergeEntry],
    tokens: &[Token],
    prefix: &str,
) -> Result<Vec<Merge>, TokenizerError> {
    let bytes_by_id: FxHashMap<TokenId, &[u8]> =
        tokens.iter().map(|t| (t.id, t.bytes.as_slice())).collect();

    let mut merges = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let field = || format!("model.merges[{index}]");
        let (left, right) = match entry {
            json::MergeEntry::Joined(joined) => joined
                .split_once(' ')
                .ok_or_else(|| TokenizerError::corrupt(field(), "expected two symbols"))?,
            json::MergeEntry::Pair(left, right) => (left.as_str(), right.as_str()),
        };
        let lookup = |symbol: &str| {
            vocab.get(symbol).copied().ok_or_else(|| {
                TokenizerError::corrupt(field(), format!("{symbol:?} is not in the vocabulary"))
            })
        };
        let joined = match right.strip_prefix(prefix).filter(|_| !prefix.is_empty()) {
            Some(rest) => format!("{left}{rest}"),
            None => format!("{left}{right}"),
        };
        let merge = Merge {
            left: lookup(left)?,
            right: lookup(right)?,
            merged: lookup(&joined)?,
        };

        let (Some(l), Some(r), Some(m)) = (
            bytes_by_id.get(&merge.left),
            bytes_by_id.get(&merge.right),
            bytes_by_id.get(&merge.merged),
        ) else {
            debug!(index, "merge references a special token, skipping");
            continue;
        };
        let r = r
            .strip_prefix(prefix.as_bytes())
            .filter(|_| !prefix.is_empty())
            .unwrap_or(*r);
        if m.len() != l.len() + r.len() || !m.starts_with(l) || !m.ends_with(r) {
            debug!(index, "merge does not concatenate after byte mapping, skipping");
            continue;
        }
        merges.push(merge);
    }
    Ok(merges)
}

fn convert_normalizers(
    normalizers: Vec<Normalizer>,
    spelling: Spelling,
    config: &mut Config,
) -> Result<(), TokenizerError> {
    for normalizer in normalizers {
        let rule = match normalizer {
            Normalizer::NFC => Normalization::Unicode(UnicodeForm::Nfc),
            Normalizer::NFD => Normalization::Unicode(UnicodeForm::Nfd),
            Normalizer::NFKC => Normalization::Unicode(UnicodeForm::Nfkc),
            Normalizer::NFKD => Normalization::Unicode(UnicodeForm::Nfkd),
            Normalizer::Lowercase => Normalization::CaseFold { upper: false },
            Normalizer::Nmt => Normalization::Nmt,
            Normalizer::Replace {
                pattern: Pattern::String(pattern),
                content,
            } => {
                let pattern = spelling.text(&pattern);
                let replacement = spelling.text(&content);
                if pattern == replacement {
                    continue;
                }
                Normalization::Replace {
                    pattern,
                    replacement,
                }
            }
            Normalizer::Replace {
                pattern: Pattern::Regex(_),
                ..
            } => return Err(unsupported("regex Replace normalizer")),
            Normalizer::Prepend { prepend } => {
                let prepend = spelling.text(&prepend);
                let mut chars = prepend.chars();
                match (chars.next(), chars.next()) {
                    (Some(character), None) => Normalization::Extend {
                        character,
                        left: 1,
                        right: 0,
                    },
                    _ => return Err(unsupported("multi-character Prepend normalizer")),
                }
            }
            Normalizer::StripAccents {} => Normalization::StripAccents,
            Normalizer::BertNormalizer {
                clean_text,
                handle_chinese_chars,
                strip_accents,
                lowercase,
            } => {
                if clean_text {
                    config.normalization.push(Normalization::Clean);
                }
                if handle_chinese_chars {
                    config.split.push(Split::Pattern {
                        pattern: cjk_class(),
                        behavior: SplitBehavior::Isolate,
                    });
                }
                if strip_accents.unwrap_or(lowercase) {
                    config.normalization.push(Normalization::Unicode(UnicodeForm::Nfd));
                    config.normalization.push(Normalization::StripAccents);
                }
                if !lowercase {
                    continue;
                }
                Normalization::CaseFold { upper: false }
            }
            Normalizer::Precompiled {
                precompiled_charsmap,
            } => {
                if precompiled_charsmap.is_empty() {
                    continue;
                }
                let blob = STANDARD.decode(precompiled_charsmap.as_bytes()).map_err(|e| {
                    TokenizerError::corrupt("normalizer.precompiled_charsmap", e.to_string())
                })?;
                Normalization::CharsMap(CharsMap::from_bytes(&blob)?)
            }
            Normalizer::Sequence { .. } => continue,
            Normalizer::Unsupported => return Err(unsupported("normalizer")),
        };
        config.normalization.push(rule);
    }
    Ok(())
}

/// Character class matching one CJK ideograph.
fn cjk_class() -> String {
    let mut class = String::from("[");
    for (start, end) in CJK_RANGES {
        if let (Some(start), Some(end)) = (char::from_u32(start), char::from_u32(end)) {
            class.push(start);
            class.push('-');
            class.push(end);
        }
    }
    class.push(']');
    class
}

/// Returns true if some pre-tokenizer removes whitespace from the text.
fn convert_pre_tokenizers(
    pre_tokenizers: Vec<PreTokenizer>,
    spelling: Spelling,
    config: &mut Config,
) -> Result<bool, TokenizerError> {
    let isolate = |pattern: &str| Split::Pattern {
        pattern: pattern.to_string(),
        behavior: SplitBehavior::Isolate,
    };
    let mut drops_whitespace = false;
    for pre_tokenizer in pre_tokenizers {
        match pre_tokenizer {
            PreTokenizer::ByteLevel {
                add_prefix_space,
                use_regex,
            } => {
                if add_prefix_space {
                    config.normalization.push(Normalization::Extend {
                        character: ' ',
                        left: 1,
                        right: 0,
                    });
                }
                if use_regex {
                    config.split.push(Split::Pattern {
                        pattern: GPT2_PATTERN.to_string(),
                        behavior: SplitBehavior::Isolate,
                    });
                }
            }
            PreTokenizer::Metaspace {
                replacement,
                prepend_scheme,
                add_prefix_space,
                split,
            } => {
                if replacement != WHITESPACE {
                    return Err(unsupported(format!("Metaspace replacement {replacement:?}")));
                }
                if add_prefix_space.unwrap_or(true) && prepend_scheme != PrependScheme::Never {
                    config.normalization.push(Normalization::Extend {
                        character: ' ',
                        left: 1,
                        right: 0,
                    });
                }
                if split {
                    config.split.push(Split::Character {
                        character: ' ',
                        behavior: SplitBehavior::MergeRight,
                    });
                }
            }
            PreTokenizer::Split {
                pattern,
                behavior,
                invert,
            } => {
                use json::SplitDelimiterBehavior as B;
                if invert {
                    return Err(unsupported("inverted Split pre-tokenizer"));
                }
                let pattern = match pattern {
                    Pattern::String(s) => escape_regex(&spelling.text(&s)),
                    Pattern::Regex(r) => spelling.text(&r),
                };
                let behavior = match behavior {
                    B::Isolated => SplitBehavior::Isolate,
                    B::Contiguous => SplitBehavior::Merge,
                    B::MergedWithPrevious => SplitBehavior::MergeLeft,
                    B::MergedWithNext => SplitBehavior::MergeRight,
                    B::Removed => return Err(unsupported("Split pre-tokenizer removing matches")),
                };
                config.split.push(Split::Pattern { pattern, behavior });
            }
            PreTokenizer::Digits { individual_digits } => {
                config.split.push(Split::Pattern {
                    pattern: (if individual_digits { r"\p{N}" } else { r"\p{N}+" }).to_string(),
                    behavior: SplitBehavior::Isolate,
                });
            }
            PreTokenizer::BertPreTokenizer {} => {
                config.split.push(isolate(WHITESPACE_RUN));
                config.split.push(isolate(BERT_PUNCTUATION));
                drops_whitespace = true;
            }
            PreTokenizer::Whitespace {} => {
                config.split.push(isolate(WORD_OR_SYMBOLS));
                drops_whitespace = true;
            }
            PreTokenizer::WhitespaceSplit {} => {
                config.split.push(isolate(WHITESPACE_RUN));
                drops_whitespace = true;
            }
            PreTokenizer::Sequence { .. } => {}
            PreTokenizer::Unsupported => return Err(unsupported("pre-tokenizer")),
        }
    }
    Ok(drops_whitespace)
}

fn convert_decoders(
    decoders: Vec<Decoder>,
    spelling: Spelling,
    config: &mut Config,
) -> Result<(), TokenizerError> {
    for decoder in decoders {
        match decoder {
            Decoder::ByteLevel {} | Decoder::ByteFallback {} | Decoder::Fuse {} => {}
            Decoder::Metaspace {
                replacement,
                prepend_scheme,
                add_prefix_space,
            } => {
                if replacement != WHITESPACE {
                    return Err(unsupported(format!("Metaspace replacement {replacement:?}")));
                }
                if add_prefix_space.unwrap_or(true) && prepend_scheme != PrependScheme::Never {
                    config.decoding.push(Decoding::Strip {
                        character: ' ',
                        left: 1,
                        right: 0,
                    });
                }
            }
            Decoder::Replace {
                pattern: Pattern::String(pattern),
                content,
            } => {
                let pattern = spelling.text(&pattern);
                let replacement = spelling.text(&content);
                if pattern != replacement {
                    config.decoding.push(Decoding::Replace {
                        pattern,
                        replacement,
                    });
                }
            }
            Decoder::Replace {
                pattern: Pattern::Regex(_),
                ..
            } => return Err(unsupported("regex Replace decoder")),
            Decoder::Strip {
                content,
                start,
                stop,
            } => config.decoding.push(Decoding::Strip {
                character: spelling.char(content),
                left: start,
                right: stop,
            }),
            Decoder::WordPiece { cleanup } => {
                if cleanup {
                    config.decoding.extend(WORDPIECE_CLEANUP.iter().map(
                        |&(pattern, replacement)| Decoding::Replace {
                            pattern: pattern.to_string(),
                            replacement: replacement.to_string(),
                        },
                    ));
                }
            }
            // word templates restore the spaces
            Decoder::Bpe {} => {}
            Decoder::Sequence { .. } => {}
            Decoder::Unsupported => return Err(unsupported("decoder")),
        }
    }
    Ok(())
}

/// Ids the single-sequence template places before and after the input.
fn template_markers(
    processors: Vec<PostProcessor>,
    added: &[json::AddedToken],
) -> Vec<(TokenId, Position)> {
    let mut markers = Vec::new();
    for processor in processors {
        match processor {
            PostProcessor::TemplateProcessing {
                single,
                special_tokens,
            } => {
                let mut position = Position::Start;
                for piece in single {
                    match piece {
                        json::TemplatePiece::Sequence { .. } => position = Position::End,
                        json::TemplatePiece::SpecialToken { id } => {
                            let ids = match special_tokens.get(&id) {
                                Some(special) => special.ids.clone(),
                                None => added
                                    .iter()
                                    .filter(|t| t.content == id)
                                    .map(|t| t.id)
                                    .collect(),
                            };
                            if ids.is_empty() {
                                warn!(token = %id, "template token not found, ignoring");
                            }
                            markers.extend(ids.into_iter().map(|id| (id, position)));
                        }
                    }
                }
            }
            PostProcessor::BertProcessing { sep, cls }
            | PostProcessor::RobertaProcessing { sep, cls } => {
                markers.push((cls.1, Position::Start));
                markers.push((sep.1, Position::End));
            }
            PostProcessor::ByteLevel {} | PostProcessor::Sequence { .. } => {}
            PostProcessor::Other => {
                warn!("post-processor is not supported and will be ignored");
            }
        }
    }
    markers
}

fn build_specials(
    added: &[json::AddedToken],
    unk: Option<(TokenId, Vec<u8>)>,
    markers: &[(TokenId, Position)],
) -> Vec<SpecialToken> {
    let unk_id = unk.as_ref().map(|&(id, _)| id);
    let mut seen = FxHashSet::default();
    let mut specials = Vec::with_capacity(added.len() + 1);

    for token in added {
        if !seen.insert(token.id) {
            debug!(id = token.id, "duplicate added token id, keeping the first");
            continue;
        }
        let special = if Some(token.id) == unk_id {
            SpecialToken::new(token.id, token.content.as_str(), SpecialTokenKind::Unknown)
                .with_ident("unk")
        } else if let Some(&(_, position)) = markers.iter().find(|(id, _)| *id == token.id) {
            let ident = match position {
                Position::Start => "bos",
                Position::End => "eos",
            };
            SpecialToken::new(token.id, token.content.as_str(), SpecialTokenKind::Control)
                .with_ident(ident)
                .at(position)
        } else {
            SpecialToken::new(token.id, token.content.as_str(), SpecialTokenKind::Priority)
        };
        specials.push(special);
    }

    if let Some((id, bytes)) = unk {
        if seen.insert(id) {
            specials.push(SpecialToken::new(id, bytes, SpecialTokenKind::Unknown).with_ident("unk"));
        }
    }
    for &(id, _) in markers {
        if !seen.contains(&id) {
            debug!(id, "template token is not an added token, not injected");
        }
    }
    specials
}
