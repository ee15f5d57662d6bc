//! Unified diffs between the original file and the merge result.

use similar::{ChangeTag, TextDiff};

/// Render a unified diff with three lines of context. Empty when the texts
/// are equal.
pub fn unified_diff(original: &str, merged: &str, path: &str) -> String {
    if original == merged {
        return String::new();
    }
    TextDiff::from_lines(original, merged)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Lines inserted and deleted by the merge.
pub fn change_counts(original: &str, merged: &str) -> (usize, usize) {
    let diff = TextDiff::from_lines(original, merged);
    let mut inserted = 0;
    let mut deleted = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => inserted += 1,
            ChangeTag::Delete => deleted += 1,
            ChangeTag::Equal => {}
        }
    }
    (inserted, deleted)
}
