//! Trie-driven encoders: greedy longest match and Unigram Viterbi search.

use super::bpe::Part;
use super::index::LookupIndex;

/// Byte length of the code point starting at `pos`.
#[inline]
fn char_len(piece: &str, pos: usize) -> usize {
    piece[pos..].chars().next().map_or(1, char::len_utf8)
}

/// Takes the longest token matching at each position, left to right.
///
/// A position no token starts at becomes an unresolved one-character part.
pub(crate) fn greedy_encode(piece: &str, index: &LookupIndex) -> Vec<Part> {
    let bytes = piece.as_bytes();
    let mut parts = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let matched = index
            .prefixes(&bytes[pos..])
            .filter(|&(len, _)| piece.is_char_boundary(pos + len))
            .last();
        let (len, id) = match matched {
            Some((len, id)) => (len, Some(id)),
            None => (char_len(piece, pos), None),
        };
        parts.push(Part {
            start: pos,
            end: pos + len,
            id,
        });
        pos += len;
    }
    parts
}

#[derive(Debug, Clone, Copy)]
struct Lattice {
    score: f64,
    start: usize,
    id: Option<u32>,
    reached: bool,
}

/// Finds the segmentation with the highest total token score.
///
/// Characters no token covers are charged the unknown score and come back
/// as unresolved parts.
pub(crate) fn unigram_encode(piece: &str, index: &LookupIndex) -> Vec<Part> {
    let bytes = piece.as_bytes();
    let n = bytes.len();
    if n == 0 {
        return Vec::new();
    }

    let mut best = vec![
        Lattice {
            score: f64::NEG_INFINITY,
            start: 0,
            id: None,
            reached: false,
        };
        n + 1
    ];
    best[0].score = 0.0;
    best[0].reached = true;

    let unknown_score = index.unknown_score() as f64;
    for start in (0..n).filter(|&i| piece.is_char_boundary(i)) {
        if !best[start].reached {
            continue;
        }
        let base = best[start].score;
        let char_end = start + char_len(piece, start);
        let mut covers_char = false;

        for (len, id) in index.prefixes(&bytes[start..]) {
            let end = start + len;
            if !piece.is_char_boundary(end) {
                continue;
            }
            covers_char |= end == char_end;
            let score = base + index.score(id) as f64;
            if !best[end].reached || score > best[end].score {
                best[end] = Lattice {
                    score,
                    start,
                    id: Some(id),
                    reached: true,
                };
            }
        }

        if !covers_char {
            let score = base + unknown_score;
            if !best[char_end].reached || score > best[char_end].score {
                best[char_end] = Lattice {
                    score,
                    start,
                    id: None,
                    reached: true,
                };
            }
        }
    }

    let mut parts = Vec::new();
    let mut end = n;
    while end > 0 {
        let node = best[end];
        parts.push(Part {
            start: node.start,
            end,
            id: node.id,
        });
        end = node.start;
    }
    parts.reverse();
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vocab::{Token, Vocabulary};

    fn ids(parts: &[Part]) -> Vec<Option<u32>> {
        parts.iter().map(|p| p.id).collect()
    }

    fn scored(tokens: &[(&str, f32)]) -> LookupIndex {
        let mut vocab = Vocabulary::new(
            tokens
                .iter()
                .enumerate()
                .map(|(i, &(s, _))| Token::new(i as u32, s))
                .collect(),
            vec![],
        );
        vocab.scores = tokens.iter().map(|&(_, score)| score).collect();
        LookupIndex::new(&vocab)
    }

    #[test]
    fn test_greedy_longest() {
        let index = scored(&[("a", 0.0), ("ab", 0.0), ("abc", 0.0), ("c", 0.0)]);
        assert_eq!(ids(&greedy_encode("abcab", &index)), vec![Some(2), Some(1)]);
        assert_eq!(ids(&greedy_encode("abxc", &index)), vec![Some(1), None, Some(3)]);
    }

    #[test]
    fn test_greedy_unknown_is_one_char() {
        let index = scored(&[("a", 0.0)]);
        let parts = greedy_encode("a日a", &index);
        assert_eq!(parts[1], Part { start: 1, end: 4, id: None });
    }

    #[test]
    fn test_unigram_prefers_best_total() {
        // "abc" alone scores worse than "ab" + "c"
        let index = scored(&[
            ("a", -5.0),
            ("b", -5.0),
            ("c", -1.0),
            ("ab", -1.0),
            ("abc", -3.0),
        ]);
        assert_eq!(ids(&unigram_encode("abc", &index)), vec![Some(3), Some(2)]);

        let index = scored(&[("a", -5.0), ("b", -5.0), ("c", -1.0), ("ab", -1.0), ("abc", -1.5)]);
        assert_eq!(ids(&unigram_encode("abc", &index)), vec![Some(4)]);
    }

    #[test]
    fn test_unigram_unknown_chars() {
        let index = scored(&[("a", -1.0), ("b", -1.0)]);
        let parts = unigram_encode("a€b", &index);
        assert_eq!(
            parts,
            vec![
                Part { start: 0, end: 1, id: Some(0) },
                Part { start: 1, end: 4, id: None },
                Part { start: 4, end: 5, id: Some(1) },
            ]
        );
    }
}
