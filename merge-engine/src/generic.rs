//! Line-based applier driven by the anchor map.
//!
//! The walk keeps a cursor into the original (`o_line`, the last original
//! line accounted for) and, while a reference is open, a stack of buffers
//! collecting the proposed lines that follow each reference. When the next
//! anchor is reached the referenced original span is written, then the
//! buffer. Two or more buffers at that point means several references share
//! one gap and there is no textual way to split it.

use std::collections::BTreeSet;

use crate::anchors::AnchorMapping;
use crate::types::{ChangeKind, LineRange, VerifyReason};

pub(crate) struct GenericInput<'a> {
    pub original: &'a [&'a str],
    pub proposed: &'a [&'a str],
    pub references: &'a BTreeSet<usize>,
    pub removals: &'a BTreeSet<usize>,
    pub mapping: &'a AnchorMapping,
    pub kind: ChangeKind,
    /// Original ranges the edit declared as replaced or removed.
    pub declared: &'a [LineRange],
    pub insert_safety_valve: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MergeOutput {
    pub new_file: String,
    pub reasons: Vec<VerifyReason>,
}

pub(crate) fn apply_generic(input: &GenericInput<'_>) -> MergeOutput {
    let mut walk = GenericWalk {
        input,
        out: Vec::with_capacity(input.original.len() + input.proposed.len()),
        o_line: 0,
        ref_start: None,
        buffers: Vec::new(),
    };

    let reasons = match walk.run() {
        Ok(()) => Vec::new(),
        Err(reason) => vec![reason],
    };
    MergeOutput {
        new_file: walk.out.join("\n"),
        reasons,
    }
}

struct GenericWalk<'i, 'a> {
    input: &'i GenericInput<'a>,
    out: Vec<&'a str>,
    o_line: usize,
    ref_start: Option<usize>,
    buffers: Vec<Vec<&'a str>>,
}

impl<'a> GenericWalk<'_, 'a> {
    fn run(&mut self) -> Result<(), VerifyReason> {
        let input = self.input;
        for (idx, &line) in input.proposed.iter().enumerate() {
            let p_line = idx + 1;

            if input.removals.contains(&p_line) {
                continue;
            }

            if input.references.contains(&p_line) {
                if self.ref_start.is_none() {
                    self.ref_start = Some(self.o_line + 1);
                }
                self.buffers.push(Vec::new());
                continue;
            }

            if let Some(anchor) = input.mapping.anchor(p_line) {
                if let Some(start) = self.ref_start.take() {
                    self.flush(start, anchor - 1, p_line)?;
                } else if anchor > self.o_line + 1 {
                    self.skipped(self.o_line + 1, anchor - 1);
                }
                self.out.push(line);
                self.o_line = anchor;
                continue;
            }

            if self.ref_start.is_none() && line.trim().is_empty() {
                let next_is_ref = input.references.contains(&(p_line + 1));
                let next_original_blank = input
                    .original
                    .get(self.o_line)
                    .is_some_and(|l| l.trim().is_empty());
                if !next_is_ref || next_original_blank {
                    self.out.push(line);
                }
                if next_original_blank {
                    self.o_line += 1;
                }
                continue;
            }

            match self.buffers.last_mut() {
                Some(buffer) if self.ref_start.is_some() => buffer.push(line),
                _ => self.out.push(line),
            }
        }

        if let Some(start) = self.ref_start.take() {
            self.flush(start, input.original.len(), input.proposed.len())?;
        }
        Ok(())
    }

    /// Write original `start..=end` followed by the pending buffer.
    fn flush(&mut self, start: usize, end: usize, p_line: usize) -> Result<(), VerifyReason> {
        if self.buffers.len() > 1 {
            tracing::debug!(
                proposed_line = p_line,
                references = self.buffers.len(),
                "consecutive references share one gap"
            );
            return Err(VerifyReason::AmbiguousLocation);
        }
        if end + 1 < start {
            tracing::debug!(proposed_line = p_line, start, end, "inverted reference span");
            return Err(VerifyReason::AmbiguousLocation);
        }

        self.out.extend_from_slice(&self.input.original[start - 1..end]);
        if let Some(buffer) = self.buffers.pop() {
            if buffer.iter().any(|l| !l.trim().is_empty()) {
                self.out.extend(buffer);
            }
        }
        Ok(())
    }

    /// The walk jumped over original `from..=to` without a reference.
    fn skipped(&mut self, from: usize, to: usize) {
        let input = self.input;
        let span = LineRange::new(from, to);
        if input.kind.is_insert() {
            if !input.insert_safety_valve {
                return;
            }
            tracing::debug!(from, to, "re-emitting lines skipped by an insert");
            for line in from..=to {
                if !input.declared.iter().any(|r| r.contains(line)) {
                    self.out.push(input.original[line - 1]);
                }
            }
        } else if !input.declared.is_empty() && !input.declared.iter().any(|r| r.overlaps(&span)) {
            tracing::debug!(from, to, "re-emitting skipped lines outside declared ranges");
            self.out.extend_from_slice(&input.original[from - 1..to]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::build_anchor_map;
    use crate::markers::scan_markers;

    fn run(original: &str, proposed: &str, kind: ChangeKind, declared: &[LineRange], valve: bool) -> MergeOutput {
        let scanned = scan_markers(proposed, false);
        let original_lines: Vec<&str> = original.split('\n').collect();
        let proposed_lines: Vec<&str> = scanned.lines.iter().map(String::as_str).collect();
        let markers = scanned.references.union(&scanned.removals).copied().collect();
        let mapping = build_anchor_map(&original_lines, &proposed_lines, &markers);
        let mut declared = declared.to_vec();
        declared.extend(scanned.removals.iter().filter_map(|r| mapping.blocks.get(r)).copied());
        apply_generic(&GenericInput {
            original: &original_lines,
            proposed: &proposed_lines,
            references: &scanned.references,
            removals: &scanned.removals,
            mapping: &mapping,
            kind,
            declared: &declared,
            insert_safety_valve: valve,
        })
    }

    #[test]
    fn test_reference_expands_to_original_span() {
        let out = run(
            "func F() {\n  a()\n  b()\n  c()\n  return\n}\n",
            "func F() {\n  // ... existing code ...\n  log()\n  return\n}\n",
            ChangeKind::Add,
            &[],
            true,
        );
        assert!(out.reasons.is_empty());
        assert_eq!(out.new_file, "func F() {\n  a()\n  b()\n  c()\n  log()\n  return\n}\n");
    }

    #[test]
    fn test_removal_marker_drops_span() {
        let out = run("A\nB\nC\nD\n", "A\n// Plandex: removed code\nC\nD\n", ChangeKind::Remove, &[], true);
        assert!(out.reasons.is_empty());
        assert_eq!(out.new_file, "A\nC\nD\n");
    }

    #[test]
    fn test_reference_at_end_of_file() {
        let out = run(
            "use a;\nuse b;\n\nfn main() {}\n",
            "use a;\nuse c;\n// ... existing code ...\n",
            ChangeKind::Add,
            &[],
            true,
        );
        assert!(out.reasons.is_empty());
        assert_eq!(out.new_file, "use a;\nuse c;\nuse b;\n\nfn main() {}\n");
    }

    #[test]
    fn test_two_references_in_one_gap_are_ambiguous() {
        let out = run(
            "x\ny\nz\n",
            "// ... existing code ...\ny2\n// ... existing code ...\n",
            ChangeKind::Replace,
            &[],
            true,
        );
        assert_eq!(out.reasons, vec![VerifyReason::AmbiguousLocation]);
    }

    #[test]
    fn test_safety_valve_for_inserts() {
        let on = run("X\nY\nZ\n", "X\nZ\n", ChangeKind::Add, &[], true);
        assert_eq!(on.new_file, "X\nY\nZ\n");
        let off = run("X\nY\nZ\n", "X\nZ\n", ChangeKind::Add, &[], false);
        assert_eq!(off.new_file, "X\nZ\n");
    }

    #[test]
    fn test_skip_outside_declared_range_is_restored() {
        let out = run(
            "a\nb\nc\nd\ne\n",
            "a\nc\nd2\ne\n",
            ChangeKind::Replace,
            &[LineRange::new(4, 4)],
            true,
        );
        assert_eq!(out.new_file, "a\nb\nc\nd2\ne\n");
    }

    #[test]
    fn test_skip_without_declared_ranges_is_dropped() {
        let out = run("a\nb\nc\n", "a\nc\n", ChangeKind::Replace, &[], true);
        assert_eq!(out.new_file, "a\nc\n");
    }
}
