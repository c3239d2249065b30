//! Integration tests for tiktoken rank files.
//!
//! The rank files are generated in memory: every single byte first, then a
//! few merged tokens, so any input can be encoded.

use base64::{engine::general_purpose::STANDARD, Engine};
use kitoken::{Definition, Kitoken, ModelFormat, TokenizerError, GPT2_PATTERN};

fn rank_file(merged: &[&str]) -> Vec<u8> {
    let mut out = String::new();
    for b in 0..=255u8 {
        out.push_str(&format!("{} {}\n", STANDARD.encode([b]), b));
    }
    for (i, token) in merged.iter().enumerate() {
        out.push_str(&format!("{} {}\n", STANDARD.encode(token), 256 + i));
    }
    out.into_bytes()
}

fn create_tokenizer() -> Kitoken {
    let data = rank_file(&["he", "ll", "hell", "hello", " w", "or", " wor", "ld", " world"]);
    Kitoken::from_tiktoken(&data, GPT2_PATTERN, &[("<|endoftext|>", 300)]).unwrap()
}

/// Test basic encoding and decoding roundtrip.
#[test]
fn test_tiktoken_encode_decode_roundtrip() {
    let tokenizer = create_tokenizer();

    let test_cases = vec![
        "Hello, world!",
        "The quick brown fox jumps over the lazy dog.",
        "1234567890",
        "Special characters: !@#$%^&*()",
        "Multi-line\ntext\nwith\nnewlines",
        "Unicode: こんにちは 世界 🦀",
    ];

    for text in test_cases {
        let tokens = tokenizer.encode(text, false).unwrap();
        let decoded = tokenizer.decode_string(&tokens).unwrap();
        assert_eq!(decoded, text, "Roundtrip failed for: {:?}", text);
    }
}

/// Test that merges apply by rank.
#[test]
fn test_tiktoken_merges() {
    let tokenizer = create_tokenizer();
    assert_eq!(tokenizer.encode("hello world", false).unwrap(), vec![259, 264]);
    // "hellx": he + ll merge into hell, x stays a byte
    assert_eq!(tokenizer.encode("hellx", false).unwrap(), vec![258, b'x' as u32]);
}

/// Test special tokens are carved out of text.
#[test]
fn test_tiktoken_special_tokens() {
    let tokenizer = create_tokenizer();
    let tokens = tokenizer.encode("hello<|endoftext|> world", false).unwrap();
    assert_eq!(tokens, vec![259, 300, 264]);
    assert_eq!(
        tokenizer.decode_string(&tokens).unwrap(),
        "hello<|endoftext|> world"
    );
    assert_eq!(tokenizer.vocab_size(), 301);
}

/// Test detection and the default pattern for small vocabularies.
#[test]
fn test_tiktoken_detected() {
    let data = rank_file(&["he", "ll"]);
    assert_eq!(ModelFormat::detect(&data).unwrap(), ModelFormat::Tiktoken);

    let tokenizer = Kitoken::from_bytes(&data).unwrap();
    let ids = tokenizer.encode("hell<|endoftext|>", false).unwrap();
    assert_eq!(ids, vec![256, 257, 50256]);
}

/// Test that a malformed line is reported by number.
#[test]
fn test_tiktoken_corrupt_line() {
    let mut data = rank_file(&[]);
    data.extend_from_slice(b"bm90IGEgcmFuaw==\n");
    match Kitoken::from_format(ModelFormat::Tiktoken, &data) {
        Err(TokenizerError::CorruptModel { field, .. }) => assert_eq!(field, "line 257"),
        other => panic!("unexpected result: {:?}", other),
    }
}

/// Test that a converted vocabulary survives the native format unchanged.
#[test]
fn test_tiktoken_definition_roundtrip() {
    let tokenizer = create_tokenizer();
    let definition = tokenizer.definition();
    let loaded = Definition::from_bytes(&definition.to_bytes().unwrap()).unwrap();
    assert_eq!(loaded, definition);

    let reloaded = Kitoken::new(loaded).unwrap();
    for text in ["hello world", "hello<|endoftext|> world", "Unicode: 世界 🦀"] {
        assert_eq!(
            reloaded.encode(text, false).unwrap(),
            tokenizer.encode(text, false).unwrap()
        );
    }
}
