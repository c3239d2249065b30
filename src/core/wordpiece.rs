//! WordPiece: greedy longest match with a continuation prefix.

use super::bpe::Part;
use super::index::LookupIndex;

/// Covers `piece` left to right with the longest matching token.
///
/// The first token is looked up as is, later ones with `prefix` prepended.
/// If some position has no match, or the piece has more than `max_chars`
/// characters, the whole piece comes back as one unresolved part.
pub(crate) fn wordpiece_encode(
    piece: &str,
    index: &LookupIndex,
    prefix: &[u8],
    max_chars: u32,
) -> Vec<Part> {
    let bytes = piece.as_bytes();
    if bytes.is_empty() {
        return Vec::new();
    }
    let unknown = || {
        vec![Part {
            start: 0,
            end: bytes.len(),
            id: None,
        }]
    };
    if max_chars > 0 && piece.chars().count() > max_chars as usize {
        return unknown();
    }

    let mut parts = Vec::new();
    let mut key = Vec::with_capacity(prefix.len() + bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        key.clear();
        let skip = if pos == 0 { 0 } else { prefix.len() };
        key.extend_from_slice(&prefix[..skip]);
        key.extend_from_slice(&bytes[pos..]);

        let matched = index
            .prefixes(&key)
            .filter(|&(len, _)| len > skip && piece.is_char_boundary(pos + len - skip))
            .last();
        let Some((len, id)) = matched else {
            return unknown();
        };
        let end = pos + len - skip;
        parts.push(Part {
            start: pos,
            end,
            id: Some(id),
        });
        pos = end;
    }
    parts
}
