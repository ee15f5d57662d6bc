//! Post-merge checks that flag lost or duplicated original code.

use std::collections::{HashMap, HashSet};

use crate::types::{ChangeKind, LineRange, VerifyReason};

pub const DEFAULT_DUPLICATION_THRESHOLD: usize = 20;

pub(crate) struct AuditInput<'a> {
    pub original: &'a str,
    pub proposed: &'a [&'a str],
    pub new_file: &'a str,
    pub kind: ChangeKind,
    pub declared: &'a [LineRange],
    pub duplication_threshold: usize,
}

pub(crate) fn audit(input: &AuditInput<'_>) -> Vec<VerifyReason> {
    let mut reasons = Vec::new();
    if has_removed_code(input) {
        reasons.push(VerifyReason::CodeRemoved);
    }
    if input.kind == ChangeKind::Replace && has_duplicated_code(input) {
        reasons.push(VerifyReason::CodeDuplicated);
    }
    reasons
}

fn has_removed_code(input: &AuditInput<'_>) -> bool {
    let merged: HashSet<&str> = input.new_file.split('\n').map(str::trim).collect();
    for (idx, line) in input.original.split('\n').enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || merged.contains(trimmed) {
            continue;
        }
        let number = idx + 1;
        if input.declared.iter().any(|r| r.contains(number)) {
            continue;
        }
        tracing::debug!(line = number, content = trimmed, "original line missing from merge");
        return true;
    }
    false
}

/// A long proposed line counts as duplicated when the merge holds more
/// copies than both the original and the proposal. A line the original
/// already had is also duplicated when the merge repeats it as often as the
/// proposal does, since the proposal's copies then sit on top of the
/// original one.
fn has_duplicated_code(input: &AuditInput<'_>) -> bool {
    let threshold = input.duplication_threshold;
    let original = long_line_counts(input.original.split('\n'), threshold);
    let proposed = long_line_counts(input.proposed.iter().copied(), threshold);
    let merged = long_line_counts(input.new_file.split('\n'), threshold);

    proposed.iter().any(|(line, &in_proposed)| {
        let in_merged = merged.get(line).copied().unwrap_or(0);
        let in_original = original.get(line).copied().unwrap_or(0);
        let duplicated = in_merged > in_original
            && (in_merged > in_proposed || (in_original > 0 && in_merged > 1 && in_merged >= in_proposed));
        if duplicated {
            tracing::debug!(content = *line, in_original, in_proposed, in_merged, "line duplicated by merge");
        }
        duplicated
    })
}

fn long_line_counts<'a>(lines: impl Iterator<Item = &'a str>, threshold: usize) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for line in lines.map(str::trim).filter(|l| l.chars().count() > threshold) {
        *counts.entry(line).or_default() += 1;
    }
    counts
}
