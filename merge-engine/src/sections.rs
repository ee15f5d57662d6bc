//! Syntax-node helpers for the structural applier: a per-line node index and
//! the splitting of a parent node's children into consecutive sections.

use tree_sitter::{Node, Tree};

/// Nodes keyed by 0-based row.
pub(crate) struct NodeIndex<'t> {
    root: Node<'t>,
    nodes: Vec<Option<Node<'t>>>,
    parents: Vec<Option<Node<'t>>>,
}

impl<'t> NodeIndex<'t> {
    /// For each row, the node starting there with the least column (ties go
    /// to the shallower node) and its parent. Rows where nothing starts get
    /// the deepest node enclosing them, which is also recorded as the parent.
    pub(crate) fn build(tree: &'t Tree, line_count: usize) -> Self {
        let root = tree.root_node();
        let mut best: Vec<Option<(Node<'t>, usize)>> = vec![None; line_count];

        let mut stack = vec![(root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            if node.id() != root.id() {
                let start = node.start_position();
                if let Some(slot) = best.get_mut(start.row) {
                    let better = match slot {
                        None => true,
                        Some((current, current_depth)) => {
                            let column = current.start_position().column;
                            start.column < column || (start.column == column && depth < *current_depth)
                        }
                    };
                    if better {
                        *slot = Some((node, depth));
                    }
                }
            }
            for i in (0..node.child_count()).rev() {
                if let Some(child) = node.child(i) {
                    stack.push((child, depth + 1));
                }
            }
        }

        let mut nodes = Vec::with_capacity(line_count);
        let mut parents = Vec::with_capacity(line_count);
        for (row, entry) in best.into_iter().enumerate() {
            match entry {
                Some((node, _)) => {
                    nodes.push(Some(node));
                    parents.push(node.parent());
                }
                None => {
                    let enclosing = deepest_enclosing(root, row);
                    nodes.push(enclosing);
                    parents.push(enclosing);
                }
            }
        }

        Self { root, nodes, parents }
    }

    pub(crate) fn root(&self) -> Node<'t> {
        self.root
    }

    pub(crate) fn node(&self, row: usize) -> Option<Node<'t>> {
        self.nodes.get(row).copied().flatten()
    }

    pub(crate) fn parent(&self, row: usize) -> Option<Node<'t>> {
        self.parents.get(row).copied().flatten()
    }
}

fn deepest_enclosing(root: Node<'_>, row: usize) -> Option<Node<'_>> {
    if row < root.start_position().row || row > root.end_position().row {
        return None;
    }
    let mut node = root;
    'descend: loop {
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                if child.start_position().row <= row && row <= child.end_position().row {
                    node = child;
                    continue 'descend;
                }
            }
        }
        return Some(node);
    }
}

/// Last row holding content of `node`. A node that swallows its trailing
/// newline ends at column 0 of the following row.
pub(crate) fn last_row(node: Node<'_>) -> usize {
    let start = node.start_position();
    let end = node.end_position();
    if end.column == 0 && end.row > start.row {
        end.row - 1
    } else {
        end.row
    }
}

/// Comments and layout tokens never start a section.
pub(crate) fn is_structural_node(node: Node<'_>) -> bool {
    let kind = node.kind();
    if kind.contains("comment")
        || kind.ends_with("space")
        || matches!(kind, "ws" | "newline" | "indent" | "dedent")
    {
        return false;
    }
    node.is_named() || node.child_count() > 0
}

/// A run of sibling nodes starting with a structural one (except possibly
/// the first section, which also carries any leading comments).
pub(crate) struct Section<'t> {
    nodes: Vec<Node<'t>>,
}

impl<'t> Section<'t> {
    /// The original lines covered by this section.
    pub(crate) fn lines<'s>(&self, parent: Node<'t>, original: &[&'s str], source: &[u8]) -> Vec<&'s str> {
        let Some(first) = self.nodes.first() else {
            return Vec::new();
        };
        let start_row = first.start_position().row;
        let mut end_row = self.nodes.iter().map(|n| last_row(*n)).max().unwrap_or(start_row);

        // The parent's closing delimiter can share the section's last row.
        if end_row > start_row && end_row == last_row(parent) {
            let closing = parent
                .child(parent.child_count().saturating_sub(1))
                .and_then(|c| c.utf8_text(source).ok())
                .map(str::trim);
            if closing.is_some_and(|c| original.get(end_row).is_some_and(|l| l.trim() == c)) {
                end_row -= 1;
            }
        }

        let end = (end_row + 1).min(original.len());
        original.get(start_row..end).map(|rows| rows.to_vec()).unwrap_or_default()
    }
}

/// Split the children of `parent` lying on original lines
/// `from_line..=up_to_line` into `n` consecutive sections of nearly equal
/// size. Returns `None` when there are fewer than `n` structural groups.
pub(crate) fn get_sections<'t>(
    parent: Node<'t>,
    n: usize,
    from_line: usize,
    up_to_line: usize,
    skip_parent_first_line: bool,
) -> Option<Vec<Section<'t>>> {
    if n == 0 {
        return None;
    }
    let parent_first_line = parent.start_position().row + 1;
    let parent_last_line = last_row(parent) + 1;

    let mut groups: Vec<Vec<Node<'t>>> = Vec::new();
    let mut leading: Vec<Node<'t>> = Vec::new();
    for i in 0..parent.child_count() {
        let Some(child) = parent.child(i) else { continue };
        let start = child.start_position().row + 1;
        let end = last_row(child) + 1;

        if start < from_line {
            continue;
        }
        if skip_parent_first_line && start == parent_first_line {
            continue;
        }
        if end > up_to_line {
            break;
        }
        let structural = is_structural_node(child);
        if end == parent_last_line && !structural {
            break;
        }

        if structural {
            let mut group = std::mem::take(&mut leading);
            group.push(child);
            groups.push(group);
        } else if let Some(group) = groups.last_mut() {
            group.push(child);
        } else {
            leading.push(child);
        }
    }

    if groups.len() < n {
        tracing::debug!(groups = groups.len(), wanted = n, "not enough structural sections");
        return None;
    }

    let base = groups.len() / n;
    let remainder = groups.len() % n;
    let mut groups = groups.into_iter();
    let sections = (0..n)
        .map(|i| {
            let size = base + usize::from(i < remainder);
            Section {
                nodes: groups.by_ref().take(size).flatten().collect(),
            }
        })
        .collect();
    Some(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationFlag;
    use crate::parser::{DEFAULT_PARSE_TIMEOUT, SyntaxParser};
    use crate::types::Language;

    const THREE_FNS: &str = "fn one() {\n    a();\n}\n\nfn two() {\n    b();\n}\n\nfn three() {\n    c();\n}\n";

    fn parse(source: &str) -> Tree {
        SyntaxParser::for_language(Language::Rust)
            .unwrap()
            .parse(source, DEFAULT_PARSE_TIMEOUT, &CancellationFlag::new())
            .unwrap()
    }

    #[test]
    fn test_node_index_prefers_outermost_node_on_a_line() {
        let tree = parse(THREE_FNS);
        let lines: Vec<&str> = THREE_FNS.split('\n').collect();
        let index = NodeIndex::build(&tree, lines.len());
        assert_eq!(index.node(0).unwrap().kind(), "function_item");
        assert_eq!(index.node(1).unwrap().kind(), "expression_statement");
        assert_eq!(index.parent(1).unwrap().kind(), "block");
        assert_eq!(index.parent(0).unwrap().kind(), "source_file");
    }

    #[test]
    fn test_blank_line_maps_to_enclosing_node() {
        let tree = parse(THREE_FNS);
        let lines: Vec<&str> = THREE_FNS.split('\n').collect();
        let index = NodeIndex::build(&tree, lines.len());
        assert_eq!(index.node(3).unwrap().kind(), "source_file");
    }

    #[test]
    fn test_sections_split_top_level_functions() {
        let tree = parse(THREE_FNS);
        let lines: Vec<&str> = THREE_FNS.split('\n').collect();
        let root = tree.root_node();

        let sections = get_sections(root, 2, 1, lines.len(), false).unwrap();
        assert_eq!(sections.len(), 2);
        let first = sections[0].lines(root, &lines, THREE_FNS.as_bytes());
        let second = sections[1].lines(root, &lines, THREE_FNS.as_bytes());
        assert_eq!(first, vec!["fn one() {", "    a();", "}", "", "fn two() {", "    b();", "}"]);
        assert_eq!(second, vec!["fn three() {", "    c();", "}"]);
    }

    #[test]
    fn test_too_few_sections() {
        let tree = parse(THREE_FNS);
        let lines: Vec<&str> = THREE_FNS.split('\n').collect();
        assert!(get_sections(tree.root_node(), 4, 1, lines.len(), false).is_none());
    }

    #[test]
    fn test_comments_are_not_structural() {
        let source = "// lead\nfn f() {}\n";
        let tree = parse(source);
        let root = tree.root_node();
        let comment = root.child(0).unwrap();
        assert!(!is_structural_node(comment));
        assert!(is_structural_node(root.child(1).unwrap()));
    }
}
