//! Tree-sitter assisted applier.
//!
//! Used only when the line walk gave up with an ambiguous location. It walks
//! the proposal like the generic applier, with two structural aids:
//!
//! - an anchor on a line that opens a multi-line node (a function header,
//!   say) records where that node closes in the original; reaching the
//!   matching closing line in the proposal jumps the cursor there;
//! - when several references are pending at a flush, the original span is
//!   split between them along the children of their shared parent node.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use tree_sitter::Node;

use crate::anchors::AnchorMapping;
use crate::cancel::CancellationFlag;
use crate::comments::CommentSymbols;
use crate::error::ParseError;
use crate::generic::MergeOutput;
use crate::markers::ScannedProposal;
use crate::parser::{parse_preferring_clean, parse_with_deadline, SyntaxParser};
use crate::sections::{get_sections, last_row, NodeIndex};
use crate::types::VerifyReason;

/// Replace stripped marker lines with a real comment in the target language
/// so the proposal still parses, e.g. `    // ref`.
pub(crate) fn normalize_markers(scanned: &ScannedProposal, symbols: CommentSymbols) -> Vec<String> {
    let Some(comment) = symbols.ref_comment() else {
        return scanned.lines.clone();
    };
    scanned
        .lines
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            if scanned.is_marker(idx + 1) {
                let indent = &line[..line.len() - line.trim_start().len()];
                format!("{indent}{comment}")
            } else {
                line.clone()
            }
        })
        .collect()
}

pub(crate) struct StructuralInput<'a> {
    pub original: &'a str,
    /// Proposal with markers normalized to comments.
    pub proposed: &'a [String],
    pub references: &'a BTreeSet<usize>,
    pub removals: &'a BTreeSet<usize>,
    pub mapping: &'a AnchorMapping,
}

pub(crate) fn apply_structural(
    input: &StructuralInput<'_>,
    parser: &SyntaxParser,
    deadline: Instant,
    cancel: &CancellationFlag,
) -> Result<MergeOutput, ParseError> {
    let original_lines: Vec<&str> = input.original.split('\n').collect();
    let proposed_lines: Vec<&str> = input.proposed.iter().map(String::as_str).collect();
    let proposed_text = proposed_lines.join("\n");

    let parsed = parse_preferring_clean(parser, input.original, deadline, cancel)?;
    let proposed_tree = parse_with_deadline(&parsed.parser, proposed_text.as_bytes(), deadline, cancel)?;

    let original_index = NodeIndex::build(&parsed.tree, original_lines.len());
    let proposed_index = NodeIndex::build(&proposed_tree, proposed_lines.len());

    let mut walk = StructuralWalk {
        input,
        original: &original_lines,
        proposed: &proposed_lines,
        source: input.original.as_bytes(),
        original_index: &original_index,
        proposed_index: &proposed_index,
        out: Vec::with_capacity(original_lines.len() + proposed_lines.len()),
        o_line: 0,
        ref_start: None,
        ref_parent: None,
        buffers: Vec::new(),
        closing_anchors: HashMap::new(),
        hold_until_close: None,
        depth: 0,
        found_any_anchor: false,
        open_node: None,
    };
    let reasons = match walk.run() {
        Ok(()) => Vec::new(),
        Err(reason) => vec![reason],
    };
    Ok(MergeOutput {
        new_file: walk.out.join("\n"),
        reasons,
    })
}

/// The multi-line proposed node the walk is currently inside.
struct OpenNode {
    ends_at: usize,
    matches: bool,
}

struct StructuralWalk<'w, 'a, 't> {
    input: &'w StructuralInput<'w>,
    original: &'w [&'a str],
    proposed: &'w [&'a str],
    source: &'w [u8],
    original_index: &'w NodeIndex<'t>,
    proposed_index: &'w NodeIndex<'t>,
    out: Vec<&'a str>,
    o_line: usize,
    ref_start: Option<usize>,
    ref_parent: Option<Node<'t>>,
    buffers: Vec<Vec<&'a str>>,
    /// Proposed closing line → original closing line.
    closing_anchors: HashMap<usize, usize>,
    /// Original closing line content; no plain anchors until it is reached.
    hold_until_close: Option<&'a str>,
    depth: usize,
    found_any_anchor: bool,
    open_node: Option<OpenNode>,
}

impl<'a, 't> StructuralWalk<'_, 'a, 't> {
    fn run(&mut self) -> Result<(), VerifyReason> {
        let mut last_line_matched = true;
        let proposed = self.proposed;

        for (idx, &line) in proposed.iter().enumerate() {
            let p_line = idx + 1;

            if self.input.removals.contains(&p_line) {
                continue;
            }

            if self.input.references.contains(&p_line) {
                if self.ref_start.is_none() {
                    self.o_line += 1;
                    self.ref_start = Some(self.o_line);
                    self.ref_parent = if self.depth > 0 {
                        self.original_index.parent(self.o_line - 1)
                    } else {
                        None
                    };
                }
                self.buffers.push(Vec::new());
                continue;
            }

            let open_node_matches = self.open_node.as_ref().is_some_and(|n| n.matches);
            if self.ref_start.is_none() && last_line_matched && !open_node_matches && line.trim().is_empty() {
                self.out.push(line);
                if self.original.get(self.o_line).is_some_and(|l| l.trim().is_empty()) {
                    self.o_line += 1;
                }
                continue;
            }

            let p_node = self.proposed_index.node(idx);
            let starts_here = p_node.is_some_and(|n| n.start_position().row == idx);
            let multiline = starts_here && p_node.is_some_and(|n| last_row(n) > idx);

            let mut matching = false;
            let closing = self.closing_anchors.get(&p_line).copied();
            if let Some(original_close) = closing {
                matching = true;
                self.o_line = original_close;
                self.hold_until_close = None;
            } else if self.hold_until_close != Some(line)
                && !self.open_node.as_ref().is_some_and(|n| !n.matches)
            {
                if let Some((open, close)) = self.find_next_anchor(p_line, line) {
                    self.found_any_anchor = true;
                    matching = true;
                    self.o_line = open;
                    if multiline {
                        if let Some(node) = self.open_node.as_mut() {
                            node.matches = true;
                        }
                    }
                    if close != open && multiline {
                        self.register_closing(idx, close, p_node);
                    }
                }
            }

            if multiline && self.open_node.as_ref().is_none_or(|n| n.matches != matching) {
                self.open_node = p_node.map(|n| OpenNode {
                    ends_at: last_row(n),
                    matches: matching,
                });
            }

            let mut wrote_refs = false;
            if matching {
                if let Some(start) = self.ref_start.take() {
                    self.flush(start, false)?;
                    self.out.push(line);
                    wrote_refs = true;
                }
            }

            last_line_matched = matching;
            if self.open_node.as_ref().is_some_and(|n| n.ends_at == idx) {
                self.open_node = None;
            }
            if closing.is_some() {
                self.depth = self.depth.saturating_sub(1);
            }

            if wrote_refs {
                self.buffers.clear();
            } else if self.ref_start.is_some() {
                if let Some(buffer) = self.buffers.last_mut() {
                    buffer.push(line);
                }
            } else {
                self.out.push(line);
            }
        }

        if let Some(start) = self.ref_start.take() {
            self.flush(start, true)?;
        }
        Ok(())
    }

    /// `(open, close)` original lines for `line`: the anchor map first, then
    /// the next identical non-blank original line not yet consumed.
    fn find_next_anchor(&self, p_line: usize, line: &str) -> Option<(usize, usize)> {
        // An open reference has not consumed `o_line` yet.
        let floor = if self.ref_start.is_some() {
            self.o_line.max(1)
        } else {
            self.o_line + 1
        };
        let open = self
            .input
            .mapping
            .anchor(p_line)
            .filter(|&o| o >= floor)
            .or_else(|| {
                if line.trim().is_empty() {
                    return None;
                }
                self.original
                    .iter()
                    .enumerate()
                    .skip(floor - 1)
                    .find(|(_, candidate)| **candidate == line)
                    .map(|(i, _)| i + 1)
            })?;

        let close = self
            .original_index
            .node(open - 1)
            .filter(|n| n.start_position().row == open - 1)
            .map(|n| last_row(n) + 1)
            .unwrap_or(open);
        Some((open, close))
    }

    fn register_closing(&mut self, idx: usize, original_close: usize, p_node: Option<Node<'t>>) {
        let Some(p_node) = p_node else { return };
        let Some(&closing_line) = self.original.get(original_close - 1) else {
            return;
        };
        if !self.proposed[idx + 1..].iter().any(|l| *l == closing_line) {
            return;
        }
        let proposed_close = last_row(p_node) + 1;
        tracing::trace!(proposed_close, original_close, "closing anchor");
        self.closing_anchors.insert(proposed_close, original_close);
        self.hold_until_close = Some(closing_line);
        self.depth += 1;
    }

    fn flush(&mut self, start: usize, at_eof: bool) -> Result<(), VerifyReason> {
        let end = if at_eof {
            self.original.len()
        } else {
            self.o_line.saturating_sub(1)
        };
        if end + 1 < start {
            tracing::debug!(start, end, "inverted reference span");
            return Err(VerifyReason::AmbiguousLocation);
        }

        if self.buffers.len() <= 1 {
            self.out.extend_from_slice(&self.original[start - 1..end]);
            if let Some(buffer) = self.buffers.pop() {
                if buffer.iter().any(|l| !l.trim().is_empty()) {
                    self.out.extend(buffer);
                }
            }
            return Ok(());
        }

        let parent = self.ref_parent.unwrap_or_else(|| self.original_index.root());
        let count = self.buffers.len();
        let Some(sections) = get_sections(parent, count, start, end, self.found_any_anchor) else {
            return Err(VerifyReason::AmbiguousLocation);
        };
        tracing::debug!(sections = count, parent = parent.kind(), "splitting references along syntax nodes");

        let buffers = std::mem::take(&mut self.buffers);
        for (section, buffer) in sections.iter().zip(buffers) {
            self.out.extend(section.lines(parent, self.original, self.source));
            self.out.extend(buffer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::build_anchor_map;
    use crate::comments::comment_symbols;
    use crate::markers::scan_markers;
    use crate::parser::DEFAULT_PARSE_TIMEOUT;
    use crate::types::Language;

    fn run_rust(original: &str, proposed: &str) -> MergeOutput {
        let scanned = scan_markers(proposed, false);
        let original_lines: Vec<&str> = original.split('\n').collect();
        let proposed_lines: Vec<&str> = scanned.lines.iter().map(String::as_str).collect();
        let markers = scanned.references.union(&scanned.removals).copied().collect();
        let mapping = build_anchor_map(&original_lines, &proposed_lines, &markers);
        let normalized = normalize_markers(&scanned, comment_symbols(Language::Rust));
        let parser = SyntaxParser::for_language(Language::Rust).unwrap();
        apply_structural(
            &StructuralInput {
                original,
                proposed: &normalized,
                references: &scanned.references,
                removals: &scanned.removals,
                mapping: &mapping,
            },
            &parser,
            Instant::now() + DEFAULT_PARSE_TIMEOUT,
            &CancellationFlag::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_keeps_indentation() {
        let scanned = scan_markers("fn f() {\n    // ... existing code ...\n}", false);
        let normalized = normalize_markers(&scanned, comment_symbols(Language::Rust));
        assert_eq!(normalized, vec!["fn f() {", "    // ref", "}"]);

        let untouched = normalize_markers(&scanned, comment_symbols(Language::Json));
        assert_eq!(untouched, scanned.lines);
    }

    #[test]
    fn test_new_function_between_top_level_siblings() {
        let original = "fn alpha() {\n    one();\n}\n\nfn beta() {\n    two();\n}\n";
        let proposed = "// ... existing code ...\n\nfn gamma() {\n    three();\n}\n\n// ... existing code ...\n";
        let out = run_rust(original, proposed);
        assert!(out.reasons.is_empty(), "{:?}", out.reasons);
        assert_eq!(
            out.new_file,
            "fn alpha() {\n    one();\n}\n\nfn gamma() {\n    three();\n}\n\nfn beta() {\n    two();\n}\n"
        );
    }

    #[test]
    fn test_two_references_inside_a_block() {
        let original = "fn main() {\n    alpha();\n    beta();\n}\n";
        let proposed = "fn main() {\n    // ... existing code ...\n    inserted();\n    // ... existing code ...\n}\n";
        let out = run_rust(original, proposed);
        assert!(out.reasons.is_empty(), "{:?}", out.reasons);
        assert_eq!(out.new_file, "fn main() {\n    alpha();\n    inserted();\n    beta();\n}\n");
    }

    #[test]
    fn test_more_references_than_siblings_is_ambiguous() {
        let original = "fn main() {\n    alpha();\n}\n";
        let proposed = "fn main() {\n    // ... existing code ...\n    x();\n    // ... existing code ...\n    y();\n    // ... existing code ...\n}\n";
        let out = run_rust(original, proposed);
        assert_eq!(out.reasons, vec![VerifyReason::AmbiguousLocation]);
    }
}
