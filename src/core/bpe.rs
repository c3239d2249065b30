//! Byte-pair encoding over a merge-rank table.
//!
//! Symbols form a doubly linked list over the chunk. Every adjacent pair that
//! has a merge rule is pushed onto a min-heap keyed by `(rank, start)`, so the
//! best-ranked pair is merged first and ties go to the leftmost pair. Merging
//! invalidates the entries of the two affected neighbours lazily: an entry is
//! discarded on pop if either side has since been merged away or replaced.
//! This keeps a chunk of `L` symbols at `O(L log L)` instead of the
//! `O(L²)` cost of rescanning after every merge.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::index::{LookupIndex, Rank};
use super::vocab::TokenId;

const NONE: usize = usize::MAX;

/// Word templates applied to the initial symbols of a chunk.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Affixes<'a> {
    /// Prepended to every symbol but the first.
    pub prefix: &'a [u8],
    /// Appended to the last symbol.
    pub suffix: &'a [u8],
}

impl Affixes<'_> {
    /// Token for `bytes[start..end]` with the templates its position calls for.
    fn lookup(&self, index: &LookupIndex, bytes: &[u8], start: usize, end: usize) -> Option<TokenId> {
        let prefix = if start > 0 { self.prefix } else { &[] };
        let suffix = if end == bytes.len() { self.suffix } else { &[] };
        if prefix.is_empty() && suffix.is_empty() {
            return index.id_of(&bytes[start..end]);
        }
        let mut key = Vec::with_capacity(prefix.len() + end - start + suffix.len());
        key.extend_from_slice(prefix);
        key.extend_from_slice(&bytes[start..end]);
        key.extend_from_slice(suffix);
        index.id_of(&key)
    }
}

/// A span of the chunk and the token covering it, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Part {
    pub start: usize,
    pub end: usize,
    pub id: Option<TokenId>,
}

#[derive(Debug, Clone, Copy)]
struct Symbol {
    start: usize,
    end: usize,
    id: Option<TokenId>,
    prev: usize,
    next: usize,
    alive: bool,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    rank: Rank,
    start: usize,
    left: usize,
    right: usize,
    left_id: TokenId,
    right_id: TokenId,
    merged: TokenId,
}

/// Encodes `piece` by merging adjacent symbols in rank order.
///
/// With `chars` set the initial symbols are code points, otherwise single
/// bytes. Symbols are looked up with `affixes` attached; merges then work on
/// ids alone. Symbols without a vocabulary entry stay unresolved and never
/// merge.
pub(crate) fn byte_pair_encode(
    piece: &str,
    index: &LookupIndex,
    chars: bool,
    affixes: Affixes<'_>,
) -> Vec<Part> {
    let bytes = piece.as_bytes();
    if bytes.is_empty() {
        return Vec::new();
    }

    let mut symbols: Vec<Symbol> = Vec::with_capacity(bytes.len());
    let mut push = |start: usize, end: usize| {
        let n = symbols.len();
        symbols.push(Symbol {
            start,
            end,
            id: affixes.lookup(index, bytes, start, end),
            prev: if n == 0 { NONE } else { n - 1 },
            next: n + 1,
            alive: true,
        });
    };
    if chars {
        for (i, c) in piece.char_indices() {
            push(i, i + c.len_utf8());
        }
    } else {
        for i in 0..bytes.len() {
            push(i, i + 1);
        }
    }
    if let Some(last) = symbols.last_mut() {
        last.next = NONE;
    }

    let mut heap = BinaryHeap::with_capacity(symbols.len());
    for left in 0..symbols.len().saturating_sub(1) {
        push_candidate(&symbols, index, left, left + 1, &mut heap);
    }

    while let Some(Reverse(candidate)) = heap.pop() {
        let left = symbols[candidate.left];
        let right = symbols[candidate.right];
        if !left.alive
            || !right.alive
            || left.next != candidate.right
            || left.id != Some(candidate.left_id)
            || right.id != Some(candidate.right_id)
        {
            continue;
        }

        symbols[candidate.left].end = right.end;
        symbols[candidate.left].id = Some(candidate.merged);
        symbols[candidate.left].next = right.next;
        symbols[candidate.right].alive = false;
        if right.next != NONE {
            symbols[right.next].prev = candidate.left;
        }

        if left.prev != NONE {
            push_candidate(&symbols, index, left.prev, candidate.left, &mut heap);
        }
        if right.next != NONE {
            push_candidate(&symbols, index, candidate.left, right.next, &mut heap);
        }
    }

    let mut parts = Vec::with_capacity(symbols.len());
    let mut current = 0;
    while current != NONE {
        let symbol = &symbols[current];
        parts.push(Part {
            start: symbol.start,
            end: symbol.end,
            id: symbol.id,
        });
        current = symbol.next;
    }
    parts
}

#[inline]
fn push_candidate(
    symbols: &[Symbol],
    index: &LookupIndex,
    left: usize,
    right: usize,
    heap: &mut BinaryHeap<Reverse<Candidate>>,
) {
    let (Some(left_id), Some(right_id)) = (symbols[left].id, symbols[right].id) else {
        return;
    };
    if let Some((rank, merged)) = index.merge(left_id, right_id) {
        heap.push(Reverse(Candidate {
            rank,
            start: symbols[left].start,
            left,
            right,
            left_id,
            right_id,
            merged,
        }));
    }
}
