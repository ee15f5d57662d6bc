//! Recognizers for reference comments, removal markers and the change
//! description that accompanies a proposed update.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ChangeKind, LineRange};

const CANONICAL_REFERENCE: &str = "... existing code ...";
const REMOVAL_MARKER: &str = "plandex: removed";

// Also matches prose ending in "existing ... ...".
// `strict` mode turns this off.
static LOOSE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\.\.\.)?.*?existing.*?\.\.\.$").unwrap());

static CHANGE_KIND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\btype:\s*(overwrite|replace|remove|add|prepend|append)\b").unwrap()
});

static RANGE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:replaces?|removes?)\b.*?(\d+)\s*-\s*(\d+)").unwrap());

static RANGE_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:replaces?|removes?)\b.*?(\d+)").unwrap());

/// `line` must already be trimmed.
pub fn is_reference(line: &str, strict: bool) -> bool {
    let lower = line.to_lowercase();
    if lower.contains(CANONICAL_REFERENCE) {
        return true;
    }
    !strict && LOOSE_REFERENCE.is_match(&lower)
}

/// `line` must already be trimmed.
pub fn is_removal(line: &str) -> bool {
    line.to_lowercase().contains(REMOVAL_MARKER)
}

/// Proposed lines with marker text stripped, plus where the markers were.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedProposal {
    pub lines: Vec<String>,
    pub references: BTreeSet<usize>,
    pub removals: BTreeSet<usize>,
}

impl ScannedProposal {
    pub fn is_marker(&self, line: usize) -> bool {
        self.references.contains(&line) || self.removals.contains(&line)
    }

    pub fn has_markers(&self) -> bool {
        !self.references.is_empty() || !self.removals.is_empty()
    }

    fn first_significant_is_marker(&self, mut lines: impl Iterator<Item = usize>) -> bool {
        lines
            .find(|&n| self.is_marker(n) || !self.lines[n - 1].trim().is_empty())
            .is_some_and(|n| self.is_marker(n))
    }

    /// Whether the first non-blank line is a marker.
    pub fn begins_with_marker(&self) -> bool {
        self.first_significant_is_marker(1..=self.lines.len())
    }

    /// Whether the last non-blank line is a marker.
    pub fn ends_with_marker(&self) -> bool {
        self.first_significant_is_marker((1..=self.lines.len()).rev())
    }

    /// Insert an empty reference line at the top, shifting every marker down.
    pub fn prepend_reference(&mut self) {
        self.lines.insert(0, String::new());
        self.references = self.references.iter().map(|n| n + 1).collect();
        self.removals = self.removals.iter().map(|n| n + 1).collect();
        self.references.insert(1);
    }

    pub fn append_reference(&mut self) {
        self.lines.push(String::new());
        self.references.insert(self.lines.len());
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Split the proposal into lines and strip reference/removal marker text,
/// keeping the surrounding whitespace so indentation survives.
pub fn scan_markers(proposed: &str, strict: bool) -> ScannedProposal {
    let mut scanned = ScannedProposal::default();
    for (idx, line) in proposed.split('\n').enumerate() {
        let trimmed = line.trim();
        let number = idx + 1;
        if !trimmed.is_empty() && is_reference(trimmed, strict) {
            scanned.references.insert(number);
            scanned.lines.push(line.replacen(trimmed, "", 1));
        } else if !trimmed.is_empty() && is_removal(trimmed) {
            scanned.removals.insert(number);
            scanned.lines.push(line.replacen(trimmed, "", 1));
        } else {
            scanned.lines.push(line.to_string());
        }
    }
    scanned
}

/// What the free-text change description tells us about the edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeDescription {
    pub kind: ChangeKind,
    /// Original line ranges the description says are replaced or removed.
    pub ranges: Vec<LineRange>,
    pub touches_start: bool,
    pub touches_end: bool,
}

impl ChangeDescription {
    pub fn parse(description: &str) -> Self {
        let normalized = normalize_description(description);
        Self {
            kind: parse_change_kind_normalized(&normalized),
            ranges: declared_ranges_normalized(&normalized),
            touches_start: normalized.contains("start of the file"),
            touches_end: normalized.contains("end of the file"),
        }
    }

    /// Replace/remove edits that claim the file start may not get a
    /// synthesized leading reference.
    pub fn claims_start(&self) -> bool {
        self.touches_start && matches!(self.kind, ChangeKind::Replace | ChangeKind::Remove)
    }

    pub fn claims_end(&self) -> bool {
        self.touches_end && matches!(self.kind, ChangeKind::Replace | ChangeKind::Remove)
    }
}

fn normalize_description(description: &str) -> String {
    description
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '`' | '\'' | '"' | '*'))
        .collect()
}

pub fn parse_change_kind(description: &str) -> ChangeKind {
    parse_change_kind_normalized(&normalize_description(description))
}

fn parse_change_kind_normalized(normalized: &str) -> ChangeKind {
    let Some(caps) = CHANGE_KIND.captures(normalized) else {
        return ChangeKind::Unspecified;
    };
    match &caps[1] {
        "overwrite" => ChangeKind::Overwrite,
        "replace" => ChangeKind::Replace,
        "remove" => ChangeKind::Remove,
        "add" => ChangeKind::Add,
        "prepend" => ChangeKind::Prepend,
        "append" => ChangeKind::Append,
        _ => ChangeKind::Unspecified,
    }
}

fn declared_ranges_normalized(normalized: &str) -> Vec<LineRange> {
    let mut ranges = Vec::new();
    for line in normalized.lines() {
        let bounds = if let Some(caps) = RANGE_SPAN.captures(line) {
            caps[1].parse::<usize>().ok().zip(caps[2].parse::<usize>().ok())
        } else if let Some(caps) = RANGE_SINGLE.captures(line) {
            caps[1].parse::<usize>().ok().map(|n| (n, n))
        } else {
            None
        };
        if let Some((start, end)) = bounds {
            if start >= 1 && start <= end {
                ranges.push(LineRange::new(start, end));
            }
        }
    }
    ranges
}
