//! Integration tests for the native definition format.

use kitoken::core::serialization::{MAGIC, VERSION_V1};
use kitoken::core::{
    Decoding, Fallback, Merge, Mode, Normalization, Position, Split, SplitBehavior, Token,
    TokenKind, VocabError,
};
use kitoken::{
    Config, Definition, Kitoken, ModelFormat, SpecialToken, SpecialTokenKind, TokenizerError,
    Vocabulary,
};

/// A small character-pair model: letters, a byte token and two merges.
fn create_definition() -> Definition {
    let mut vocab = Vocabulary::new(
        vec![
            Token::new(3, " "),
            Token::new(4, "a"),
            Token::new(5, "b"),
            Token::new(6, "ab"),
            Token::new(7, " ab"),
            Token::new(8, vec![b'\n']).with_kind(TokenKind::Byte).with_text("<0x0A>"),
        ],
        vec![
            SpecialToken::new(0, "<unk>", SpecialTokenKind::Unknown).with_ident("unk"),
            SpecialToken::new(1, "<s>", SpecialTokenKind::Control)
                .with_ident("bos")
                .at(Position::Start),
            SpecialToken::new(2, "<sep>", SpecialTokenKind::Priority),
        ],
    );
    vocab.merges = vec![
        Merge { left: 4, right: 5, merged: 6 },
        Merge { left: 3, right: 6, merged: 7 },
    ];
    let config = Config {
        mode: Mode::CharPair,
        normalization: vec![Normalization::Extend {
            character: ' ',
            left: 1,
            right: 0,
        }],
        split: vec![
            Split::Bytes,
            Split::Character {
                character: ' ',
                behavior: SplitBehavior::MergeRight,
            },
        ],
        processing: Vec::new(),
        decoding: vec![Decoding::Strip {
            character: ' ',
            left: 1,
            right: 0,
        }],
        fallback: vec![Fallback::Bytes, Fallback::Unknown],
        templates: Vec::new(),
    };
    Definition::new(vocab, config).with_meta("name", "tiny")
}

/// Test that a definition survives serialization unchanged.
#[test]
fn test_definition_roundtrip() {
    let definition = create_definition();
    let bytes = definition.to_bytes().unwrap();
    assert!(bytes.starts_with(MAGIC));
    assert_eq!(ModelFormat::detect(&bytes).unwrap(), ModelFormat::Definition);

    let loaded = Definition::from_bytes(&bytes).unwrap();
    assert_eq!(loaded, definition);
}

/// Test that a reloaded engine encodes exactly like the original.
#[test]
fn test_engine_reload_matches() {
    let tokenizer = Kitoken::new(create_definition()).unwrap();
    let reloaded = Kitoken::from_bytes(&tokenizer.to_bytes().unwrap()).unwrap();

    for text in ["ab ab", "ab<sep>ba", "a\nb", "zz"] {
        assert_eq!(
            tokenizer.encode(text, true).unwrap(),
            reloaded.encode(text, true).unwrap(),
            "Mismatch for {:?}",
            text
        );
    }
    assert_eq!(reloaded.definition().meta.get("name").map(String::as_str), Some("tiny"));
}

/// Test the behavior of the small model itself.
#[test]
fn test_definition_encoding() {
    let tokenizer = Kitoken::new(create_definition()).unwrap();

    let ids = tokenizer.encode("ab ab", true).unwrap();
    assert_eq!(ids, vec![1, 7, 7]);
    assert_eq!(tokenizer.decode(&ids).unwrap(), b"ab ab");

    let ids = tokenizer.encode("a\nb", false).unwrap();
    assert_eq!(ids, vec![3, 4, 8, 5]);
    assert_eq!(tokenizer.decode(&ids).unwrap(), b"a\nb");

    // no byte token for 'z', so the unknown token takes the whole run
    assert_eq!(tokenizer.encode("zz", false).unwrap(), vec![3, 0]);
}

/// Test writing and reading definition files.
#[test]
fn test_definition_file() {
    let path = std::env::temp_dir().join(format!("kitoken-test-{}.kit", std::process::id()));
    let tokenizer = Kitoken::new(create_definition()).unwrap();
    tokenizer.to_file(&path).unwrap();

    let loaded = Kitoken::from_file(&path).unwrap();
    assert_eq!(loaded.definition(), tokenizer.definition());
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(
        Kitoken::from_file(&path),
        Err(TokenizerError::Io(_))
    ));
}

/// Test that version 1 files load with empty metadata.
#[test]
fn test_definition_v1() {
    let definition = create_definition();
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&VERSION_V1.to_le_bytes());
    // version 1 stores the configuration without word templates
    let config = &definition.config;
    let legacy = (
        &config.mode,
        &config.normalization,
        &config.split,
        &config.processing,
        &config.decoding,
        &config.fallback,
    );
    bytes.extend_from_slice(&bincode::serialize(&(&definition.vocab, legacy)).unwrap());

    let loaded = Definition::from_bytes(&bytes).unwrap();
    assert!(loaded.meta.is_empty());
    assert_eq!(loaded.vocab, definition.vocab);
    assert_eq!(loaded.config, definition.config);
}

/// Test rejection of unknown versions and damaged bodies.
#[test]
fn test_definition_rejects_bad_data() {
    let bytes = create_definition().to_bytes().unwrap();

    let mut future = bytes.clone();
    future[MAGIC.len()..MAGIC.len() + 2].copy_from_slice(&99u16.to_le_bytes());
    assert!(matches!(
        Definition::from_bytes(&future),
        Err(TokenizerError::UnsupportedFormat(_))
    ));

    assert!(matches!(
        Definition::from_bytes(&bytes[..bytes.len() / 2]),
        Err(TokenizerError::CorruptModel { .. })
    ));
    assert!(matches!(
        Definition::from_bytes(&bytes[..MAGIC.len() + 1]),
        Err(TokenizerError::CorruptModel { .. })
    ));
}

/// Test that structurally invalid vocabularies are rejected on load.
#[test]
fn test_definition_validation() {
    let mut definition = create_definition();
    definition.vocab.tokens.push(Token::new(4, "c"));
    assert!(matches!(
        Kitoken::new(definition),
        Err(TokenizerError::Vocab(VocabError::DuplicateId(4)))
    ));

    let mut definition = create_definition();
    definition.vocab.merges.push(Merge { left: 4, right: 4, merged: 6 });
    assert!(matches!(
        Kitoken::new(definition.clone()),
        Err(TokenizerError::Vocab(VocabError::MergeMismatch { index: 2 }))
    ));
    // invalid definitions are also rejected when read back
    let bytes = definition.to_bytes().unwrap();
    assert!(Definition::from_bytes(&bytes).is_err());
}
