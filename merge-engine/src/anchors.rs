//! Anchor map construction.
//!
//! An anchor ties a proposed line to the original line it reproduces. The
//! mapper works window by window: unique lines first, then it recurses into
//! the gaps between the anchors it found, and finally pairs repeated lines
//! from both ends of windows that cannot be split any further. Along the way
//! every reference or removal marker is bounded to the original span it
//! stands for once its neighbours are anchored.
//!
//! Every anchor insertion is checked against its neighbours, so the map is
//! injective and strictly increasing no matter which step proposes it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::types::{AnchorMap, ReferenceBlock};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorMapping {
    pub anchors: AnchorMap,
    /// Marker line → original span it stands for. Markers whose span is
    /// empty or could not be bounded have no entry.
    pub blocks: BTreeMap<usize, ReferenceBlock>,
}

impl AnchorMapping {
    pub fn anchor(&self, proposed_line: usize) -> Option<usize> {
        self.anchors.get(&proposed_line).copied()
    }

    pub fn in_reference_block(&self, original_line: usize) -> bool {
        self.blocks.values().any(|b| b.contains(original_line))
    }
}

/// Build the anchor map for `proposed` against `original`.
///
/// `markers` holds the 1-based proposed lines that are reference or removal
/// markers; their (stripped) content never anchors.
pub fn build_anchor_map(
    original: &[&str],
    proposed: &[&str],
    markers: &BTreeSet<usize>,
) -> AnchorMapping {
    let mut mapper = AnchorMapper::new(original, proposed, markers);
    mapper.match_window(Window {
        p_start: 0,
        p_end: proposed.len(),
        o_start: 0,
        o_end: original.len(),
    });
    mapper.establish_reference_bounds();
    tracing::debug!(
        anchors = mapper.mapping.anchors.len(),
        blocks = mapper.mapping.blocks.len(),
        "anchor map built"
    );
    mapper.mapping
}

/// Half-open, 0-based line index ranges on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    p_start: usize,
    p_end: usize,
    o_start: usize,
    o_end: usize,
}

impl Window {
    fn is_empty(&self) -> bool {
        self.p_start >= self.p_end || self.o_start >= self.o_end
    }
}

struct AnchorMapper<'a> {
    original: &'a [&'a str],
    proposed: &'a [&'a str],
    markers: &'a BTreeSet<usize>,
    original_content: HashSet<&'a str>,
    used_original: HashSet<usize>,
    bounded: HashSet<usize>,
    mapping: AnchorMapping,
}

impl<'a> AnchorMapper<'a> {
    fn new(original: &'a [&'a str], proposed: &'a [&'a str], markers: &'a BTreeSet<usize>) -> Self {
        Self {
            original,
            proposed,
            markers,
            original_content: original.iter().copied().collect(),
            used_original: HashSet::new(),
            bounded: HashSet::new(),
            mapping: AnchorMapping::default(),
        }
    }

    fn match_window(&mut self, window: Window) {
        if window.is_empty() {
            return;
        }

        self.match_unique(window);
        self.establish_reference_bounds();

        let inner: Vec<(usize, usize)> = self
            .mapping
            .anchors
            .range(window.p_start + 1..=window.p_end)
            .map(|(&p, &o)| (p, o))
            .filter(|&(_, o)| o > window.o_start && o <= window.o_end)
            .collect();

        if inner.is_empty() {
            self.pair_duplicates(window);
            return;
        }

        let mut p_cursor = window.p_start;
        let mut o_cursor = window.o_start;
        for (p, o) in inner {
            self.match_window(Window {
                p_start: p_cursor,
                p_end: p - 1,
                o_start: o_cursor,
                o_end: o - 1,
            });
            p_cursor = p;
            o_cursor = o;
        }
        self.match_window(Window {
            p_start: p_cursor,
            p_end: window.p_end,
            o_start: o_cursor,
            o_end: window.o_end,
        });
    }

    /// Proposed line (1-based) that may take part in matching.
    fn matchable_proposed(&self, line: usize) -> bool {
        !self.markers.contains(&line)
            && !self.mapping.anchors.contains_key(&line)
            && !self.proposed[line - 1].trim().is_empty()
    }

    fn matchable_original(&self, line: usize) -> bool {
        !self.used_original.contains(&line) && !self.original[line - 1].trim().is_empty()
    }

    fn match_unique(&mut self, window: Window) {
        let mut proposed_counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for line in window.p_start + 1..=window.p_end {
            if self.matchable_proposed(line) {
                let entry = proposed_counts.entry(self.proposed[line - 1]).or_insert((0, line));
                entry.0 += 1;
            }
        }
        let mut original_counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for line in window.o_start + 1..=window.o_end {
            if self.matchable_original(line) {
                let entry = original_counts.entry(self.original[line - 1]).or_insert((0, line));
                entry.0 += 1;
            }
        }

        let mut pairs: Vec<(usize, usize)> = proposed_counts
            .iter()
            .filter(|(_, (count, _))| *count == 1)
            .filter_map(|(content, &(_, p))| match original_counts.get(content) {
                Some(&(1, o)) => Some((p, o)),
                _ => None,
            })
            .collect();
        pairs.sort_unstable();

        for (p, o) in longest_increasing_run(&pairs) {
            self.try_anchor(p, o);
        }
    }

    /// Pair repeated lines from the outside in: k-th first with k-th first,
    /// k-th last with k-th last, until either side runs out.
    fn pair_duplicates(&mut self, window: Window) {
        let mut order: Vec<&str> = Vec::new();
        let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
        for line in window.p_start + 1..=window.p_end {
            if !self.matchable_proposed(line) {
                continue;
            }
            let content = self.proposed[line - 1];
            positions
                .entry(content)
                .or_insert_with(|| {
                    order.push(content);
                    Vec::new()
                })
                .push(line);
        }

        for content in order {
            let proposed_lines = &positions[content];
            let original_lines: Vec<usize> = (window.o_start + 1..=window.o_end)
                .filter(|&o| self.original[o - 1] == content)
                .filter(|&o| self.matchable_original(o) && !self.mapping.in_reference_block(o))
                .collect();

            let limit = original_lines.len().min(proposed_lines.len());
            let (mut front, mut back) = (0, 0);
            while front + back < limit {
                self.try_anchor(proposed_lines[front], original_lines[front]);
                front += 1;
                if front + back >= limit {
                    break;
                }
                self.try_anchor(
                    proposed_lines[proposed_lines.len() - 1 - back],
                    original_lines[original_lines.len() - 1 - back],
                );
                back += 1;
            }
            self.establish_reference_bounds();
        }
    }

    fn try_anchor(&mut self, p: usize, o: usize) -> bool {
        if self.mapping.anchors.contains_key(&p) || !self.matchable_original(o) {
            return false;
        }
        if let Some((_, &prev)) = self.mapping.anchors.range(..p).next_back() {
            if prev >= o {
                return false;
            }
        }
        if let Some((_, &next)) = self.mapping.anchors.range(p + 1..).next() {
            if next <= o {
                return false;
            }
        }
        tracing::trace!(proposed = p, original = o, "anchor");
        self.mapping.anchors.insert(p, o);
        self.used_original.insert(o);
        true
    }

    fn is_blank_filler(&self, line: usize) -> bool {
        !self.markers.contains(&line) && self.proposed[line - 1].trim().is_empty()
    }

    fn is_new_code(&self, line: usize) -> bool {
        let content = self.proposed[line - 1];
        !self.markers.contains(&line)
            && !content.trim().is_empty()
            && !self.original_content.contains(content)
    }

    fn establish_reference_bounds(&mut self) {
        let pending: Vec<usize> = self
            .markers
            .iter()
            .copied()
            .filter(|m| !self.bounded.contains(m))
            .collect();
        for marker in pending {
            if let Some(block) = self.bound_marker(marker) {
                self.bounded.insert(marker);
                if let Some(block) = self.clip_to_free_span(block) {
                    tracing::trace!(marker, start = block.start, end = block.end, "reference block");
                    self.mapping.blocks.insert(marker, block);
                }
            }
        }
    }

    /// Original span for `marker`, possibly empty (`end < start`), or `None`
    /// while a neighbour is still unanchored.
    fn bound_marker(&self, marker: usize) -> Option<ReferenceBlock> {
        let proposed_len = self.proposed.len();
        let original_len = self.original.len();

        let mut prev = marker - 1;
        let mut lines_back = 1;
        while prev > 0 && self.is_blank_filler(prev) {
            prev -= 1;
            lines_back += 1;
        }
        let top = if prev == 0 {
            1
        } else {
            self.mapping.anchor(prev)? + lines_back
        };

        let mut next = marker + 1;
        let mut lines_forward = 1;
        while next <= proposed_len && self.is_blank_filler(next) {
            next += 1;
            lines_forward += 1;
        }
        let bottom = if next > proposed_len {
            original_len
        } else if let Some(anchor) = self.mapping.anchor(next) {
            anchor.saturating_sub(lines_forward)
        } else if self.is_new_code(next) {
            self.mapping
                .anchors
                .range(next + 1..)
                .next()
                .map(|(_, &o)| o - 1)
                .unwrap_or(original_len)
        } else {
            return None;
        };

        Some(ReferenceBlock::new(top, bottom))
    }

    /// Shrink `block` so it does not overlap any block already recorded.
    fn clip_to_free_span(&self, mut block: ReferenceBlock) -> Option<ReferenceBlock> {
        for existing in self.mapping.blocks.values() {
            if block.is_empty() {
                break;
            }
            if !existing.overlaps(&block) {
                continue;
            }
            if existing.start <= block.start {
                block.start = existing.end + 1;
            } else {
                block.end = existing.start - 1;
            }
        }
        (!block.is_empty()).then_some(block)
    }
}

/// Longest subsequence of `pairs` (sorted by proposed line) whose original
/// lines strictly increase.
fn longest_increasing_run(pairs: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; pairs.len()];
    for (i, &(_, o)) in pairs.iter().enumerate() {
        let pos = tails.partition_point(|&t| pairs[t].1 < o);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        run.push(pairs[i]);
        cursor = prev[i];
    }
    run.reverse();
    run
}
