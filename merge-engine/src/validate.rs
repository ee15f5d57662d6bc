//! Syntax validation of whole files, used to sanity-check merge output.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tree_sitter::Node;

use crate::cancel::CancellationFlag;
use crate::error::ParseError;
use crate::parser::{get_parser_for_path, parse_with_deadline};
use crate::types::Language;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub ext: String,
    pub language: Option<Language>,
    pub has_parser: bool,
    pub timed_out: bool,
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Parse `source` with the grammar registered for `path`.
///
/// A file with syntax errors is retried with the fallback grammar (TSX for
/// JavaScript and TypeScript) and reported valid under that language when
/// the retry is clean. A parse that runs past `timeout` is reported through
/// [`ValidationResult::timed_out`]; only cancellation and hard parser
/// failures are errors.
pub fn validate(
    path: &Path,
    source: &str,
    timeout: Duration,
    cancel: &CancellationFlag,
) -> Result<ValidationResult, ParseError> {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let lookup = get_parser_for_path(path);
    let mut result = ValidationResult {
        ext,
        language: lookup.language,
        ..Default::default()
    };
    let Some(parser) = lookup.parser else {
        return Ok(result);
    };
    result.has_parser = true;

    let deadline = Instant::now() + timeout;
    let tree = match parse_with_deadline(&parser, source.as_bytes(), deadline, cancel) {
        Ok(tree) => tree,
        Err(ParseError::TimedOut) => {
            result.timed_out = true;
            return Ok(result);
        }
        Err(e) => return Err(e),
    };

    let root = tree.root_node();
    if !root.has_error() {
        result.valid = true;
        return Ok(result);
    }

    if let Some(fallback) = lookup.fallback {
        match parse_with_deadline(&fallback, source.as_bytes(), deadline, cancel) {
            Ok(retry) if !retry.root_node().has_error() => {
                result.language = Some(fallback.language());
                result.valid = true;
                return Ok(result);
            }
            Ok(_) => {}
            Err(ParseError::TimedOut) => {
                result.timed_out = true;
                return Ok(result);
            }
            Err(e) => return Err(e),
        }
    }

    result.errors = error_messages(root);
    tracing::debug!(path = %path.display(), errors = result.errors.len(), "syntax errors found");
    Ok(result)
}

/// One message per innermost error span, ordered by line.
fn error_messages(root: Node<'_>) -> Vec<String> {
    let mut spans = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let mut child_has_error = false;
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                child_has_error |= child.has_error();
                stack.push(child);
            }
        }
        if node.has_error() && !child_has_error {
            spans.insert((node.start_position().row + 1, node.end_position().row + 1));
        }
    }

    spans
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                format!("Invalid syntax on line {start}")
            } else {
                format!("Invalid syntax on lines {start} to {end}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DEFAULT_PARSE_TIMEOUT;

    fn check(path: &str, source: &str) -> ValidationResult {
        validate(Path::new(path), source, DEFAULT_PARSE_TIMEOUT, &CancellationFlag::new()).unwrap()
    }

    #[test]
    fn test_valid_rust() {
        let result = check("src/main.rs", "fn main() {\n    println!(\"hi\");\n}\n");
        assert_eq!(result.ext, ".rs");
        assert_eq!(result.language, Some(Language::Rust));
        assert!(result.has_parser);
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_invalid_rust_reports_lines() {
        let result = check("lib.rs", "fn main() {\n    let x = ;\n}\n\nfn other( {\n");
        assert!(result.has_parser);
        assert!(!result.valid);
        assert!(!result.errors.is_empty());
        assert!(result.errors.iter().all(|e| e.starts_with("Invalid syntax on line")));
    }

    #[test]
    fn test_unsupported_language_has_no_parser() {
        let result = check("init.lua", "print('hi')");
        assert_eq!(result.language, Some(Language::Lua));
        assert!(!result.has_parser);
        assert!(!result.valid);
    }

    #[test]
    fn test_typescript_with_jsx_falls_back_to_tsx() {
        let result = check("view.ts", "const el = <div className=\"a\">hi</div>;\n");
        assert!(result.valid);
        assert_eq!(result.language, Some(Language::Tsx));
    }

    #[test]
    fn test_expired_timeout_is_reported() {
        let result = validate(Path::new("a.rs"), "fn main() {}", Duration::ZERO, &CancellationFlag::new()).unwrap();
        assert!(result.timed_out);
        assert!(!result.valid);
    }

    #[test]
    fn test_cancellation_is_an_error() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = validate(Path::new("a.rs"), "fn main() {}", DEFAULT_PARSE_TIMEOUT, &cancel).unwrap_err();
        assert_eq!(err, ParseError::Cancelled);
    }
}
