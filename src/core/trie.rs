//! Byte trie for prefix queries over the vocabulary.
//!
//! Nodes are stored in one array with their edges packed contiguously and
//! sorted by byte, so a lookup step is a binary search over a short slice.

use super::vocab::TokenId;

#[derive(Debug, Clone, Copy)]
struct Node {
    edges_start: u32,
    edges_len: u32,
    token: Option<TokenId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Trie {
    nodes: Vec<Node>,
    edges: Vec<(u8, u32)>,
}

/// Insertion-time node: children kept sorted by byte.
#[derive(Default)]
struct BuildNode {
    children: Vec<(u8, usize)>,
    token: Option<TokenId>,
}

impl Trie {
    /// Builds a trie from `(bytes, id)` pairs. Earlier entries win on duplicate bytes.
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a [u8], TokenId)>) -> Self {
        let mut build = vec![BuildNode::default()];
        for (bytes, id) in entries {
            let mut node = 0;
            for &b in bytes {
                node = match build[node].children.binary_search_by_key(&b, |&(k, _)| k) {
                    Ok(pos) => build[node].children[pos].1,
                    Err(pos) => {
                        let child = build.len();
                        build.push(BuildNode::default());
                        build[node].children.insert(pos, (b, child));
                        child
                    }
                };
            }
            if build[node].token.is_none() {
                build[node].token = Some(id);
            }
        }

        let mut nodes = Vec::with_capacity(build.len());
        let mut edges = Vec::with_capacity(build.len().saturating_sub(1));
        for node in &build {
            nodes.push(Node {
                edges_start: edges.len() as u32,
                edges_len: node.children.len() as u32,
                token: node.token,
            });
            edges.extend(node.children.iter().map(|&(b, child)| (b, child as u32)));
        }
        Self { nodes, edges }
    }

    #[inline]
    fn step(&self, node: usize, byte: u8) -> Option<usize> {
        let node = &self.nodes[node];
        let start = node.edges_start as usize;
        let edges = &self.edges[start..start + node.edges_len as usize];
        edges
            .binary_search_by_key(&byte, |&(b, _)| b)
            .ok()
            .map(|pos| edges[pos].1 as usize)
    }

    /// All tokens that are prefixes of `bytes`, shortest first.
    pub fn prefixes<'a>(&'a self, bytes: &'a [u8]) -> impl Iterator<Item = (usize, TokenId)> + 'a {
        let mut node = if self.nodes.is_empty() { None } else { Some(0) };
        bytes.iter().enumerate().map_while(move |(i, &b)| {
            let next = self.step(node?, b)?;
            node = Some(next);
            Some((i + 1, self.nodes[next].token))
        })
        .filter_map(|(len, token)| token.map(|id| (len, id)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie() -> Trie {
        Trie::new([
            (b"a".as_slice(), 1),
            (b"ab".as_slice(), 2),
            (b"abcd".as_slice(), 3),
            (b"b".as_slice(), 4),
        ])
    }

    #[test]
    fn test_longest_match() {
        let trie = trie();
        assert_eq!(trie.prefixes(b"abc").last(), Some((2, 2)));
        assert_eq!(trie.prefixes(b"abcde").last(), Some((4, 3)));
        assert_eq!(trie.prefixes(b"ba").last(), Some((1, 4)));
        assert_eq!(trie.prefixes(b"c").last(), None);
        assert_eq!(trie.prefixes(b"").last(), None);
    }

    #[test]
    fn test_prefixes_shortest_first() {
        let trie = trie();
        let found: Vec<_> = trie.prefixes(b"abcdx").collect();
        assert_eq!(found, vec![(1, 1), (2, 2), (4, 3)]);
    }

    #[test]
    fn test_first_entry_wins() {
        let trie = Trie::new([(b"x".as_slice(), 7), (b"x".as_slice(), 9)]);
        assert_eq!(trie.prefixes(b"x").last(), Some((1, 7)));
    }

    #[test]
    fn test_empty() {
        let trie = Trie::new(std::iter::empty());
        assert_eq!(trie.prefixes(b"abc").last(), None);
        assert_eq!(trie.len(), 1);
    }
}
