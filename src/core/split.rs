//! Pre-tokenization: special-token carve-out followed by ordered split rules.
//!
//! Splitting is lossless. The chunks returned by [`Splitter::split`] are
//! contiguous and cover the input exactly, so concatenating them rebuilds it.
//!
//! Special tokens are matched first with Aho-Corasick and become atomic chunks
//! that no split rule ever sees. A regex match overlapping a special token
//! therefore never splits it.

use aho_corasick::{AhoCorasick, MatchKind};
use regexr::{Regex as RegexrRegex, RegexBuilder};

#[cfg(feature = "pcre2")]
use pcre2::bytes::Regex as Pcre2Regex;

use super::config::{Split, SplitBehavior};
use super::error::TokenizerError;
use super::index::carved_specials;
use super::vocab::{SpecialToken, TokenId};

/// Regex backend enum for switching between regexr (default) and PCRE2 (optional)
enum RegexBackend {
    Regexr(Box<RegexrRegex>),
    #[cfg(feature = "pcre2")]
    Pcre2(Pcre2Regex),
}

impl RegexBackend {
    fn new(pattern: &str, use_jit: bool, use_pcre2: bool) -> Result<Self, TokenizerError> {
        if use_pcre2 {
            return Self::new_pcre2(pattern, use_jit);
        }
        let regex = RegexBuilder::new(pattern).jit(use_jit).build()?;
        Ok(RegexBackend::Regexr(Box::new(regex)))
    }

    #[cfg(feature = "pcre2")]
    fn new_pcre2(pattern: &str, use_jit: bool) -> Result<Self, TokenizerError> {
        let mut regex_builder = pcre2::bytes::RegexBuilder::new();
        if use_jit {
            regex_builder.jit_if_available(true);
        }
        regex_builder.utf(true);
        regex_builder.ucp(true);
        Ok(RegexBackend::Pcre2(regex_builder.build(pattern)?))
    }

    #[cfg(not(feature = "pcre2"))]
    fn new_pcre2(_pattern: &str, _use_jit: bool) -> Result<Self, TokenizerError> {
        Err(TokenizerError::Pcre2NotEnabled)
    }

    /// Find all non-empty matches in the given text, returning (start, end) byte offsets
    fn find_iter(&self, text: &str) -> Vec<(usize, usize)> {
        match self {
            RegexBackend::Regexr(regex) => regex
                .find_iter(text)
                .map(|m| (m.start(), m.end()))
                .filter(|(start, end)| start < end)
                .collect(),
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(regex) => regex
                .find_iter(text.as_bytes())
                .filter_map(|m| m.ok())
                .map(|m| (m.start(), m.end()))
                .filter(|(start, end)| start < end)
                .collect(),
        }
    }
}

/// Regex compilation settings, carried over from the engine options.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegexOptions {
    pub use_jit: bool,
    pub use_pcre2: bool,
}

/// What a chunk is encoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Ordinary text, encoded with the model algorithm.
    Text,
    /// A carved-out special token.
    Special(TokenId),
    /// Control characters, encoded one byte token per byte.
    Bytes,
}

/// A contiguous byte range of the (normalized) input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: usize,
    pub end: usize,
    pub kind: ChunkKind,
}

impl Chunk {
    fn new(start: usize, end: usize, kind: ChunkKind) -> Self {
        Self { start, end, kind }
    }
}

enum Rule {
    Regex {
        regex: RegexBackend,
        behavior: SplitBehavior,
    },
    Character {
        character: char,
        behavior: SplitBehavior,
    },
    Bytes,
}

/// Compiled pre-tokenizer for one configuration and special-token set.
pub struct Splitter {
    special_matcher: Option<AhoCorasick>,
    special_ids: Vec<TokenId>,
    rules: Vec<Rule>,
}

impl Splitter {
    pub(crate) fn new(
        rules: &[Split],
        specials: &[SpecialToken],
        options: RegexOptions,
    ) -> Result<Self, TokenizerError> {
        let carved = carved_specials(specials);
        let special_ids = carved.iter().map(|s| s.id).collect();
        let special_matcher = if carved.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(carved.iter().map(|s| s.bytes.as_slice()))?,
            )
        };

        let rules = rules
            .iter()
            .map(|rule| {
                Ok(match rule {
                    Split::Pattern { pattern, behavior } => Rule::Regex {
                        regex: RegexBackend::new(pattern, options.use_jit, options.use_pcre2)?,
                        behavior: *behavior,
                    },
                    Split::Character {
                        character,
                        behavior,
                    } => Rule::Character {
                        character: *character,
                        behavior: *behavior,
                    },
                    Split::Bytes => Rule::Bytes,
                })
            })
            .collect::<Result<Vec<_>, TokenizerError>>()?;

        Ok(Self {
            special_matcher,
            special_ids,
            rules,
        })
    }

    /// Splits `text` into chunks covering it exactly.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut chunks = self.carve_specials(text);
        for rule in &self.rules {
            let mut next = Vec::with_capacity(chunks.len() * 2);
            for chunk in chunks {
                if chunk.kind != ChunkKind::Text {
                    next.push(chunk);
                    continue;
                }
                rule.apply(&text[chunk.start..chunk.end], chunk.start, &mut next);
            }
            chunks = next;
        }
        chunks
    }

    fn carve_specials(&self, text: &str) -> Vec<Chunk> {
        let Some(ref special_matcher) = self.special_matcher else {
            return vec![Chunk::new(0, text.len(), ChunkKind::Text)];
        };

        let mut chunks = Vec::new();
        let mut last_end = 0;
        for m in special_matcher.find_iter(text.as_bytes()) {
            let (start, end) = (m.start(), m.end());
            if !text.is_char_boundary(start) || !text.is_char_boundary(end) {
                continue;
            }
            if start > last_end {
                chunks.push(Chunk::new(last_end, start, ChunkKind::Text));
            }
            let id = self.special_ids[m.pattern().as_usize()];
            chunks.push(Chunk::new(start, end, ChunkKind::Special(id)));
            last_end = end;
        }
        if last_end < text.len() {
            chunks.push(Chunk::new(last_end, text.len(), ChunkKind::Text));
        }
        chunks
    }
}

impl Rule {
    fn apply(&self, text: &str, offset: usize, out: &mut Vec<Chunk>) {
        let (matches, behavior) = match self {
            Rule::Regex { regex, behavior } => (regex.find_iter(text), *behavior),
            Rule::Character {
                character,
                behavior,
            } => (
                text.match_indices(*character)
                    .map(|(i, s)| (i, i + s.len()))
                    .collect(),
                *behavior,
            ),
            Rule::Bytes => {
                split_control_runs(text, offset, out);
                return;
            }
        };
        for (start, end) in cut(text.len(), &matches, behavior) {
            out.push(Chunk::new(offset + start, offset + end, ChunkKind::Text));
        }
    }
}

/// Turns sorted, non-overlapping matches into ranges covering `0..len`.
///
/// Each behavior is a choice of cut points: isolating cuts at both ends of
/// every match, merging left cuts only after matches, merging right cuts only
/// before them.
fn cut(len: usize, matches: &[(usize, usize)], behavior: SplitBehavior) -> Vec<(usize, usize)> {
    let mut cuts = Vec::with_capacity(matches.len() * 2 + 2);
    cuts.push(0);
    match behavior {
        SplitBehavior::Isolate => {
            for &(start, end) in matches {
                cuts.push(start);
                cuts.push(end);
            }
        }
        SplitBehavior::Merge => {
            let mut previous_end = None;
            for &(start, end) in matches {
                if previous_end != Some(start) {
                    if let Some(previous_end) = previous_end {
                        cuts.push(previous_end);
                    }
                    cuts.push(start);
                }
                previous_end = Some(end);
            }
            if let Some(previous_end) = previous_end {
                cuts.push(previous_end);
            }
        }
        SplitBehavior::MergeLeft => cuts.extend(matches.iter().map(|&(_, end)| end)),
        SplitBehavior::MergeRight => cuts.extend(matches.iter().map(|&(start, _)| start)),
    }
    cuts.push(len);
    cuts.dedup();
    cuts.windows(2)
        .filter(|w| w[0] < w[1])
        .map(|w| (w[0], w[1]))
        .collect()
}

fn split_control_runs(text: &str, offset: usize, out: &mut Vec<Chunk>) {
    let bytes = text.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let control = bytes[start].is_ascii_control();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_control() == control {
            end += 1;
        }
        let kind = if control {
            ChunkKind::Bytes
        } else {
            ChunkKind::Text
        };
        out.push(Chunk::new(offset + start, offset + end, kind));
        start = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vocab::SpecialTokenKind;

    const OPTIONS: RegexOptions = RegexOptions {
        use_jit: true,
        use_pcre2: false,
    };

    fn ranges(chunks: &[Chunk]) -> Vec<(usize, usize)> {
        chunks.iter().map(|c| (c.start, c.end)).collect()
    }

    fn split_with(behavior: SplitBehavior, text: &str) -> Vec<(usize, usize)> {
        let rules = [Split::Character {
            character: ' ',
            behavior,
        }];
        let splitter = Splitter::new(&rules, &[], OPTIONS).unwrap();
        ranges(&splitter.split(text))
    }

    const TEXT: &str = "aaa bbb  ccc   ddd";

    #[test]
    fn test_isolate() {
        assert_eq!(
            split_with(SplitBehavior::Isolate, TEXT),
            vec![
                (0, 3),
                (3, 4),
                (4, 7),
                (7, 8),
                (8, 9),
                (9, 12),
                (12, 13),
                (13, 14),
                (14, 15),
                (15, 18)
            ]
        );
    }

    #[test]
    fn test_merge() {
        assert_eq!(
            split_with(SplitBehavior::Merge, TEXT),
            vec![(0, 3), (3, 4), (4, 7), (7, 9), (9, 12), (12, 15), (15, 18)]
        );
    }

    #[test]
    fn test_merge_left() {
        assert_eq!(
            split_with(SplitBehavior::MergeLeft, TEXT),
            vec![(0, 4), (4, 8), (8, 9), (9, 13), (13, 14), (14, 15), (15, 18)]
        );
    }

    #[test]
    fn test_merge_right() {
        assert_eq!(
            split_with(SplitBehavior::MergeRight, TEXT),
            vec![(0, 3), (3, 7), (7, 8), (8, 12), (12, 13), (13, 14), (14, 18)]
        );
    }

    #[test]
    fn test_edges() {
        assert_eq!(split_with(SplitBehavior::MergeRight, " a"), vec![(0, 2)]);
        assert_eq!(split_with(SplitBehavior::MergeLeft, "a "), vec![(0, 2)]);
        assert_eq!(split_with(SplitBehavior::Isolate, "   "), vec![(0, 1), (1, 2), (2, 3)]);
        assert_eq!(split_with(SplitBehavior::Merge, "   "), vec![(0, 3)]);
        assert_eq!(split_with(SplitBehavior::Isolate, "abc"), vec![(0, 3)]);
        assert!(split_with(SplitBehavior::Isolate, "").is_empty());
    }

    #[test]
    fn test_regex_rule() {
        let rules = [Split::Pattern {
            pattern: r"\S+|\s+".to_string(),
            behavior: SplitBehavior::Isolate,
        }];
        let splitter = Splitter::new(&rules, &[], OPTIONS).unwrap();
        let text = "Hello  World";
        let pieces: Vec<&str> = splitter
            .split(text)
            .iter()
            .map(|c| &text[c.start..c.end])
            .collect();
        assert_eq!(pieces, vec!["Hello", "  ", "World"]);
    }

    #[test]
    fn test_specials_take_precedence() {
        let specials = [
            SpecialToken::new(7, "<|end|>", SpecialTokenKind::Priority),
            SpecialToken::new(8, "<|endoftext|>", SpecialTokenKind::Priority),
            SpecialToken::new(9, "<s>", SpecialTokenKind::Control),
        ];
        let rules = [Split::Pattern {
            pattern: r"\S+|\s+".to_string(),
            behavior: SplitBehavior::Isolate,
        }];
        let splitter = Splitter::new(&rules, &specials, OPTIONS).unwrap();
        let text = "a<|endoftext|>b <s>";
        let chunks = splitter.split(text);
        let kinds: Vec<ChunkKind> = chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkKind::Text,
                ChunkKind::Special(8),
                ChunkKind::Text,
                ChunkKind::Text,
                ChunkKind::Text
            ]
        );
        assert_eq!(&text[chunks[4].start..chunks[4].end], "<s>");
    }

    #[test]
    fn test_control_runs() {
        let rules = [Split::Bytes];
        let splitter = Splitter::new(&rules, &[], OPTIONS).unwrap();
        let chunks = splitter.split("ab\n\t€\u{7f}");
        assert_eq!(
            chunks,
            vec![
                Chunk::new(0, 2, ChunkKind::Text),
                Chunk::new(2, 4, ChunkKind::Bytes),
                Chunk::new(4, 7, ChunkKind::Text),
                Chunk::new(7, 8, ChunkKind::Bytes),
            ]
        );
    }

    #[test]
    fn test_lossless_with_stacked_rules() {
        let specials = [SpecialToken::new(1, "<|x|>", SpecialTokenKind::Priority)];
        let rules = [
            Split::Bytes,
            Split::Pattern {
                pattern: r" ?\p{L}+|\p{N}{1,3}|\s+".to_string(),
                behavior: SplitBehavior::Isolate,
            },
            Split::Character {
                character: 'é',
                behavior: SplitBehavior::MergeRight,
            },
        ];
        let splitter = Splitter::new(&rules, &specials, OPTIONS).unwrap();
        let inputs = [
            "",
            "\u{0}\u{1}\u{2}",
            "héllo wörld 12345<|x|>\r\n\t🦀🦀 ∑x<|x|><|x|>",
            "<|x|",
            "日本語のテキスト\u{1b}[0m",
        ];
        for text in inputs {
            let chunks = splitter.split(text);
            let mut rebuilt = Vec::new();
            let mut position = 0;
            for chunk in &chunks {
                assert_eq!(chunk.start, position, "gap in chunks for {:?}", text);
                assert!(chunk.start < chunk.end);
                rebuilt.extend_from_slice(&text.as_bytes()[chunk.start..chunk.end]);
                position = chunk.end;
            }
            assert_eq!(rebuilt, text.as_bytes(), "Split not lossless for: {:?}", text);
        }
    }

    #[cfg(not(feature = "pcre2"))]
    #[test]
    fn test_pcre2_not_enabled() {
        let options = RegexOptions {
            use_jit: true,
            use_pcre2: true,
        };
        let rules = [Split::Pattern {
            pattern: r"\s+".to_string(),
            behavior: SplitBehavior::Isolate,
        }];
        assert!(matches!(
            Splitter::new(&rules, &[], options),
            Err(TokenizerError::Pcre2NotEnabled)
        ));
    }
}
