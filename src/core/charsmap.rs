//! Precompiled SentencePiece character maps.
//!
//! A map is serialized as a little-endian `u32` trie size, a darts-clone
//! double array of that many bytes, then NUL-terminated replacement strings.
//! Trie values are offsets into the replacement strings.
//!
//! Normalization walks the input left to right and replaces the longest key
//! matching at each position. Positions no key matches keep one character.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::TokenizerError;

const BLOCK: usize = 256;
/// Offsets at or above this would collide with the label bit of a unit.
const MAX_UNITS: usize = 1 << 21;

#[inline]
fn has_leaf(unit: u32) -> bool {
    (unit >> 8) & 1 == 1
}

#[inline]
fn value(unit: u32) -> u32 {
    unit & ((1 << 31) - 1)
}

#[inline]
fn label(unit: u32) -> u32 {
    unit & ((1 << 31) | 0xFF)
}

#[inline]
fn offset(unit: u32) -> usize {
    ((unit >> 10) << ((unit & (1 << 9)) >> 6)) as usize
}

/// Double-array trie from byte strings to replacement strings.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharsMap {
    array: Vec<u32>,
    normalized: Vec<u8>,
}

impl fmt::Debug for CharsMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharsMap")
            .field("units", &self.array.len())
            .field("normalized_bytes", &self.normalized.len())
            .finish()
    }
}

#[derive(Default)]
struct BuildNode {
    children: BTreeMap<u8, usize>,
    value: Option<u32>,
}

impl CharsMap {
    /// Reads the blob stored in `precompiled_charsmap` fields.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TokenizerError> {
        let corrupt = |reason: &str| TokenizerError::corrupt("precompiled_charsmap", reason);
        let header = data
            .get(..4)
            .and_then(|h| <[u8; 4]>::try_from(h).ok())
            .ok_or_else(|| corrupt("missing trie size"))?;
        let size = u32::from_le_bytes(header) as usize;
        if size == 0 || size % 4 != 0 {
            return Err(corrupt("trie size is not a positive multiple of 4"));
        }
        let trie = size
            .checked_add(4)
            .and_then(|end| data.get(4..end))
            .ok_or_else(|| corrupt("trie is truncated"))?;
        let array = trie
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            array,
            normalized: data[4 + size..].to_vec(),
        })
    }

    /// Writes the blob layout read by [`from_bytes`](Self::from_bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = (self.array.len() * 4) as u32;
        let mut out = Vec::with_capacity(4 + self.array.len() * 4 + self.normalized.len());
        out.extend_from_slice(&size.to_le_bytes());
        for unit in &self.array {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&self.normalized);
        out
    }

    /// Builds a map from `(from, to)` pairs. Later pairs replace earlier ones.
    ///
    /// Every trie node gets its own 256-unit block, which keeps construction
    /// trivial at the cost of size, so this suits small custom maps.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, TokenizerError> {
        let mut nodes = vec![BuildNode::default()];
        let mut normalized = Vec::new();
        for (from, to) in pairs {
            if from.is_empty() || from.contains('\0') || to.contains('\0') {
                return Err(TokenizerError::corrupt(
                    "charsmap",
                    format!("invalid mapping {from:?} -> {to:?}"),
                ));
            }
            let mut node = 0;
            for &b in from.as_bytes() {
                node = match nodes[node].children.get(&b) {
                    Some(&child) => child,
                    None => {
                        let child = nodes.len();
                        nodes.push(BuildNode::default());
                        nodes[node].children.insert(b, child);
                        child
                    }
                };
            }
            nodes[node].value = Some(normalized.len() as u32);
            normalized.extend_from_slice(to.as_bytes());
            normalized.push(0);
        }

        let mut array = vec![0u32; BLOCK];
        let mut stack = vec![(0usize, 0usize)];
        while let Some((node, pos)) = stack.pop() {
            let node = &nodes[node];
            if node.children.is_empty() && node.value.is_none() {
                continue;
            }
            let block = array.len();
            if block + BLOCK > MAX_UNITS {
                return Err(TokenizerError::corrupt("charsmap", "too many entries"));
            }
            array.resize(block + BLOCK, 0);
            array[pos] |= ((pos ^ block) as u32) << 10;
            if let Some(value) = node.value {
                array[block] = (1 << 31) | value;
            }
            for (&b, &child) in &node.children {
                let child_pos = block ^ b as usize;
                let leaf = if nodes[child].value.is_some() { 1 << 8 } else { 0 };
                array[child_pos] = b as u32 | leaf;
                stack.push((child, child_pos));
            }
        }
        Ok(Self { array, normalized })
    }

    /// Longest key that prefixes `text` and ends on a character boundary,
    /// as `(length, replacement)`.
    fn longest_match<'a>(&'a self, text: &str) -> Option<(usize, &'a str)> {
        let mut pos = offset(*self.array.first()?);
        let mut found = None;
        for (i, &b) in text.as_bytes().iter().enumerate() {
            if b == 0 {
                break;
            }
            pos ^= b as usize;
            let Some(&unit) = self.array.get(pos) else {
                break;
            };
            if label(unit) != b as u32 {
                break;
            }
            pos ^= offset(unit);
            if has_leaf(unit) && text.is_char_boundary(i + 1) {
                if let Some(replacement) = self
                    .array
                    .get(pos)
                    .and_then(|&leaf| self.replacement(value(leaf)))
                {
                    found = Some((i + 1, replacement));
                }
            }
        }
        found
    }

    fn replacement(&self, start: u32) -> Option<&str> {
        let tail = self.normalized.get(start as usize..)?;
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end]).ok()
    }

    /// Rewrites `text`, borrowing it when nothing changes.
    pub fn normalize<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = String::new();
        let mut changed = false;
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            match self.longest_match(rest) {
                Some((len, replacement)) => {
                    if !changed && replacement != &rest[..len] {
                        changed = true;
                        out.reserve(text.len());
                        out.push_str(&text[..pos]);
                    }
                    if changed {
                        out.push_str(replacement);
                    }
                    pos += len;
                }
                None => {
                    let len = rest.chars().next().map_or(1, char::len_utf8);
                    if changed {
                        out.push_str(&rest[..len]);
                    }
                    pos += len;
                }
            }
        }
        if changed {
            Cow::Owned(out)
        } else {
            Cow::Borrowed(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> CharsMap {
        CharsMap::from_pairs([
            ("\u{FF21}", "A"),
            ("\u{3000}", " "),
            ("ab", "x"),
            ("a", "y"),
            ("\u{FB01}", "fi"),
        ])
        .unwrap()
    }

    #[test]
    fn test_longest_match_wins() {
        let map = map();
        assert_eq!(map.normalize("abc"), "xc");
        assert_eq!(map.normalize("ac"), "yc");
        assert_eq!(map.normalize("\u{FF21}\u{3000}\u{FB01}ne"), "A fine");
    }

    #[test]
    fn test_unchanged_text_is_borrowed() {
        let map = map();
        assert!(matches!(map.normalize("zzz"), Cow::Borrowed("zzz")));
        assert!(matches!(map.normalize("日本"), Cow::Borrowed(_)));
        assert_eq!(map.normalize(""), "");
    }

    #[test]
    fn test_blob_roundtrip() {
        let map = map();
        let blob = map.to_bytes();
        let size = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
        assert_eq!(size % 4, 0);
        let loaded = CharsMap::from_bytes(&blob).unwrap();
        assert_eq!(loaded, map);
        assert_eq!(loaded.normalize("ab\u{FF21}"), "xA");
    }

    #[test]
    fn test_corrupt_blob() {
        assert!(CharsMap::from_bytes(&[1, 0]).is_err());
        assert!(CharsMap::from_bytes(&[0, 0, 0, 0]).is_err());
        assert!(CharsMap::from_bytes(&[8, 0, 0, 0, 1, 2, 3, 4]).is_err());
        assert!(CharsMap::from_bytes(&[3, 0, 0, 0, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_out_of_range_units_stop_matching() {
        // a root pointing past the array end matches nothing
        let mut blob = 4u32.to_le_bytes().to_vec();
        blob.extend_from_slice(&(0xFFFFu32 << 10).to_le_bytes());
        let map = CharsMap::from_bytes(&blob).unwrap();
        assert_eq!(map.normalize("abc"), "abc");
    }

    #[test]
    fn test_invalid_pairs() {
        assert!(CharsMap::from_pairs([("", "x")]).is_err());
        assert!(CharsMap::from_pairs([("a\0", "x")]).is_err());
    }
}
