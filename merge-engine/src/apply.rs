//! Merge pipeline.
//!
//! Steps, in order:
//!
//! 1. scan the proposal for reference comments and removal markers;
//! 2. read the change kind and any declared line ranges from the description;
//! 3. add references at the file edges the proposal leaves open;
//! 4. build the anchor map and run the line applier;
//! 5. if that stopped on an ambiguous location, retry with the tree-sitter
//!    applier when a grammar is available;
//! 6. audit the result for lost or duplicated original code.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::anchors::build_anchor_map;
use crate::audit::{audit, AuditInput, DEFAULT_DUPLICATION_THRESHOLD};
use crate::cancel::CancellationFlag;
use crate::comments::comment_symbols;
use crate::error::{MergeError, ParseError};
use crate::generic::{apply_generic, GenericInput};
use crate::markers::{scan_markers, ChangeDescription};
use crate::parser::{SyntaxParser, DEFAULT_PARSE_TIMEOUT};
use crate::structural::{apply_structural, normalize_markers, StructuralInput};
use crate::types::{ChangeKind, Language, MergeResult, VerifyReason};

/// Configuration for the merge pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Budget for each tree-sitter parse.
    pub parse_timeout: Duration,
    /// Only accept the canonical `... existing code ...` reference form.
    pub strict_references: bool,
    /// Re-emit original lines an insert-kind edit skipped over.
    pub insert_safety_valve: bool,
    /// Lines at or below this many trimmed characters are never reported
    /// as duplicated.
    pub duplication_threshold: usize,
    /// Try the tree-sitter applier when the line applier is ambiguous.
    pub tree_sitter_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parse_timeout: DEFAULT_PARSE_TIMEOUT,
            strict_references: false,
            insert_safety_valve: true,
            duplication_threshold: DEFAULT_DUPLICATION_THRESHOLD,
            tree_sitter_fallback: true,
        }
    }
}

/// One proposed update to apply.
#[derive(Debug, Clone)]
pub struct ApplyRequest<'a> {
    pub original: &'a str,
    pub proposed: &'a str,
    pub description: &'a str,
    pub synthesize_edge_refs: bool,
    /// Drives marker normalization; also selects a parser when none is given.
    pub language: Option<Language>,
    pub parser: Option<&'a SyntaxParser>,
}

impl<'a> ApplyRequest<'a> {
    pub fn new(original: &'a str, proposed: &'a str, description: &'a str) -> Self {
        Self {
            original,
            proposed,
            description,
            synthesize_edge_refs: true,
            language: None,
            parser: None,
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_parser(mut self, parser: &'a SyntaxParser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_edge_refs(mut self, synthesize: bool) -> Self {
        self.synthesize_edge_refs = synthesize;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    config: EngineConfig,
}

impl MergeEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Merge `request.proposed` into `request.original`.
    ///
    /// Problems with the merge itself are reported through
    /// [`MergeResult::reasons`]; the only error is cancellation.
    pub fn apply_changes(
        &self,
        request: &ApplyRequest<'_>,
        cancel: &CancellationFlag,
    ) -> Result<MergeResult, MergeError> {
        if cancel.is_cancelled() {
            return Err(MergeError::Cancelled);
        }

        let description = ChangeDescription::parse(request.description);
        let mut scanned = scan_markers(request.proposed, self.config.strict_references);
        tracing::debug!(
            kind = %description.kind,
            references = scanned.references.len(),
            removals = scanned.removals.len(),
            "applying proposed update"
        );

        if description.kind == ChangeKind::Overwrite && !scanned.has_markers() {
            return Ok(MergeResult {
                new_file: request.proposed.to_string(),
                proposed: request.proposed.to_string(),
                reasons: Vec::new(),
            });
        }

        if request.synthesize_edge_refs && description.kind != ChangeKind::Overwrite {
            if !description.claims_start() && !scanned.begins_with_marker() {
                scanned.prepend_reference();
            }
            if !description.claims_end() && !scanned.ends_with_marker() {
                scanned.append_reference();
            }
        }

        let original_lines: Vec<&str> = request.original.split('\n').collect();
        let proposed_lines: Vec<&str> = scanned.lines.iter().map(String::as_str).collect();
        let markers: BTreeSet<usize> = scanned.references.union(&scanned.removals).copied().collect();
        let mapping = build_anchor_map(&original_lines, &proposed_lines, &markers);

        let mut declared = description.ranges.clone();
        declared.extend(scanned.removals.iter().filter_map(|r| mapping.blocks.get(r)).copied());

        let generic = apply_generic(&GenericInput {
            original: &original_lines,
            proposed: &proposed_lines,
            references: &scanned.references,
            removals: &scanned.removals,
            mapping: &mapping,
            kind: description.kind,
            declared: &declared,
            insert_safety_valve: self.config.insert_safety_valve,
        });
        let mut result = MergeResult {
            new_file: generic.new_file,
            proposed: scanned.text(),
            reasons: generic.reasons,
        };

        if result.reasons == [VerifyReason::AmbiguousLocation] && self.config.tree_sitter_fallback {
            let parser = request
                .parser
                .cloned()
                .or_else(|| request.language.and_then(SyntaxParser::for_language));
            if let Some(parser) = parser {
                let language = request.language.unwrap_or(parser.language());
                let normalized = normalize_markers(&scanned, comment_symbols(language));
                let structural = apply_structural(
                    &StructuralInput {
                        original: request.original,
                        proposed: &normalized,
                        references: &scanned.references,
                        removals: &scanned.removals,
                        mapping: &mapping,
                    },
                    &parser,
                    Instant::now() + self.config.parse_timeout,
                    cancel,
                );
                match structural {
                    Ok(out) if out.reasons.is_empty() => {
                        tracing::debug!(%language, "structural merge resolved ambiguous location");
                        result = MergeResult {
                            new_file: out.new_file,
                            proposed: normalized.join("\n"),
                            reasons: Vec::new(),
                        };
                    }
                    Ok(out) => {
                        tracing::debug!(reasons = ?out.reasons, "structural merge did not resolve; keeping line merge");
                    }
                    Err(ParseError::Cancelled) => return Err(MergeError::Cancelled),
                    Err(e) => {
                        tracing::debug!(error = %e, "structural merge unavailable");
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(MergeError::Cancelled);
        }

        if !result.reasons.contains(&VerifyReason::AmbiguousLocation) {
            let found = audit(&AuditInput {
                original: request.original,
                proposed: &proposed_lines,
                new_file: &result.new_file,
                kind: description.kind,
                declared: &declared,
                duplication_threshold: self.config.duplication_threshold,
            });
            for reason in found {
                result.push_reason(reason);
            }
        }

        if result.needs_verification() {
            tracing::debug!(reasons = ?result.reasons, "merge needs verification");
        }
        Ok(result)
    }
}

/// Merge with the default configuration and no cancellation.
pub fn apply_changes(request: &ApplyRequest<'_>) -> Result<MergeResult, MergeError> {
    MergeEngine::default().apply_changes(request, &CancellationFlag::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn merge(original: &str, proposed: &str, description: &str) -> MergeResult {
        apply_changes(&ApplyRequest::new(original, proposed, description)).unwrap()
    }

    #[test]
    fn test_single_body_reference() {
        let original = "func F() {\n  a()\n  b()\n  c()\n  return\n}\n";
        let proposed = "func F() {\n  // ... existing code ...\n  log()\n  return\n}\n";
        let expected = "func F() {\n  a()\n  b()\n  c()\n  log()\n  return\n}\n";
        for synthesize in [false, true] {
            let request = ApplyRequest::new(original, proposed, "type: add").with_edge_refs(synthesize);
            let result = apply_changes(&request).unwrap();
            assert_eq!(result.new_file, expected, "synthesize = {synthesize}");
            assert!(result.reasons.is_empty());
        }
    }

    #[test]
    fn test_removal_marker() {
        let result = merge("A\nB\nC\nD\n", "A\n// Plandex: removed code\nC\nD\n", "type: remove");
        assert_eq!(result.new_file, "A\nC\nD\n");
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_edge_synthesis_without_anchors_is_ambiguous() {
        let result = merge("x\ny\nz\n", "y2\n", "type: replace");
        assert_eq!(result.reasons, vec![VerifyReason::AmbiguousLocation]);
    }

    #[test]
    fn test_edge_synthesis_with_anchors() {
        let result = merge("x\ny\nz\n", "x\ny2\nz\n", "type: replace\nReplace: line 2");
        assert_eq!(result.new_file, "x\ny2\nz\n");
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_multi_reference_split_needs_parser() {
        let original = "fn alpha() {\n    one();\n}\n\nfn beta() {\n    two();\n}\n";
        let proposed = "// ... existing code ...\n\nfn gamma() {\n    three();\n}\n\n// ... existing code ...\n";

        let without = merge(original, proposed, "type: add");
        assert_eq!(without.reasons, vec![VerifyReason::AmbiguousLocation]);

        let request = ApplyRequest::new(original, proposed, "type: add").with_language(Language::Rust);
        let with = apply_changes(&request).unwrap();
        assert!(with.reasons.is_empty(), "{:?}", with.reasons);
        assert_eq!(
            with.new_file,
            "fn alpha() {\n    one();\n}\n\nfn gamma() {\n    three();\n}\n\nfn beta() {\n    two();\n}\n"
        );
        assert!(with.proposed.starts_with("// ref\n"));
    }

    #[test]
    fn test_changed_function_between_two_references() {
        let original = "fn first() {\n    one();\n}\n\nfn second() {\n    two();\n}\n\nfn third() {\n    three();\n}\n";
        let proposed =
            "// ... existing code ...\n\nfn second_replaced() {\n    two_replaced();\n}\n\n// ... existing code ...\n";

        let without = merge(original, proposed, "type: add");
        assert_eq!(without.reasons, vec![VerifyReason::AmbiguousLocation]);

        let request = ApplyRequest::new(original, proposed, "type: add").with_language(Language::Rust);
        let with = apply_changes(&request).unwrap();
        assert!(with.reasons.is_empty(), "{:?}", with.reasons);
        assert_eq!(
            with.new_file,
            "fn first() {\n    one();\n}\n\nfn second() {\n    two();\n}\n\n\
             fn second_replaced() {\n    two_replaced();\n}\n\nfn third() {\n    three();\n}\n"
        );
    }

    #[test]
    fn test_insert_safety_valve_modes() {
        let result = merge("X\nY\nZ\n", "X\nZ\n", "type: add");
        assert_eq!(result.new_file, "X\nY\nZ\n");
        assert!(result.reasons.is_empty());

        let strict = MergeEngine::new(EngineConfig {
            insert_safety_valve: false,
            ..Default::default()
        });
        let result = strict
            .apply_changes(&ApplyRequest::new("X\nY\nZ\n", "X\nZ\n", "type: add"), &CancellationFlag::new())
            .unwrap();
        assert_eq!(result.new_file, "X\nZ\n");
        assert_eq!(result.reasons, vec![VerifyReason::CodeRemoved]);
    }

    #[test]
    fn test_duplication_detection() {
        let long = "longline_XXXXXXXXXXXXXXXXXXXX";
        let result = merge(&format!("{long}\n"), &format!("{long}\n{long}\n"), "type: replace");
        assert_eq!(result.new_file, format!("{long}\n{long}\n"));
        assert_eq!(result.reasons, vec![VerifyReason::CodeDuplicated]);
    }

    #[test]
    fn test_overwrite_shortcut_is_verbatim() {
        let proposed = "entirely\nnew\ncontent";
        let result = merge("old\nfile\n", proposed, "**Type:** `overwrite`");
        assert_eq!(result.new_file, proposed);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_identity_edit_is_idempotent() {
        let originals = [
            "fn a() {\n    x();\n}\n\nfn b() {\n    x();\n}\n",
            "one\n\n\ntwo\n",
            "}\n}\n}\n",
        ];
        for original in originals {
            let result = merge(original, original, "");
            assert_eq!(result.new_file, original);
            assert!(result.reasons.is_empty(), "{original:?}: {:?}", result.reasons);
        }
    }

    #[test]
    fn test_strict_mode_leaves_loose_markers_as_code() {
        let original = "a\nb\n";
        let proposed = "a\n// ... existing lines ...\n";
        let loose = merge(original, proposed, "type: add");
        assert_eq!(loose.new_file, "a\nb\n");

        let strict = MergeEngine::new(EngineConfig {
            strict_references: true,
            ..Default::default()
        });
        let result = strict
            .apply_changes(&ApplyRequest::new(original, proposed, "type: add"), &CancellationFlag::new())
            .unwrap();
        assert!(result.new_file.contains("// ... existing lines ..."));
    }

    #[test]
    fn test_cancelled_request_returns_error() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = MergeEngine::default()
            .apply_changes(&ApplyRequest::new("a\n", "a\n", "type: add"), &cancel)
            .unwrap_err();
        assert_eq!(err, MergeError::Cancelled);
    }

    #[test]
    fn test_conservation_for_additions() {
        let original = "use std::fmt;\n\nstruct A;\n\nimpl A {\n    fn new() -> Self { A }\n}\n";
        let proposed = "use std::fmt;\nuse std::io;\n\n// ... existing code ...\n\nimpl A {\n    fn new() -> Self { A }\n\n    fn extra(&self) {}\n}\n";
        let result = merge(original, proposed, "type: add");
        for line in original.lines().filter(|l| !l.trim().is_empty()) {
            assert!(result.new_file.contains(line), "missing {line:?}");
        }
        assert!(result.new_file.contains("use std::io;"));
        assert!(result.new_file.contains("fn extra(&self) {}"));
        assert!(result.reasons.is_empty(), "{:?}", result.reasons);
    }

    const REFERENCE: &str = "// ... existing code ...";

    const CODE: &[&str] = &[
        "",
        "{",
        "}",
        "x();",
        "    return;",
        "let total = items.iter().sum::<u32>();",
        "    tracing::debug!(count, \"loaded\");",
        "    self.cache.insert(key, value);",
    ];

    fn arb_code() -> impl Strategy<Value = Vec<&'static str>> {
        prop::collection::vec(prop::sample::select(CODE), 0..12)
    }

    fn arb_proposal() -> impl Strategy<Value = Vec<&'static str>> {
        prop::collection::vec(
            prop_oneof![4 => prop::sample::select(CODE), 1 => Just(REFERENCE)],
            0..12,
        )
    }

    /// Original of `n` distinct lines, plus a proposal that hides lines
    /// `lo + 1..=hi` behind one reference and adds new lines in front of
    /// some kept lines. Returns (original, proposed, expected merge).
    fn arb_addition() -> impl Strategy<Value = (String, String, String)> {
        (1usize..10)
            .prop_flat_map(|n| (Just(n), 0..=n, 0..=n, prop::collection::vec(1..=n, 0..4)))
            .prop_map(|(n, x, y, inserts)| {
                let (lo, hi) = (x.min(y), x.max(y));
                let mut original = Vec::new();
                let mut proposed = Vec::new();
                let mut expected = Vec::new();
                for i in 1..=n + 1 {
                    if i == lo + 1 {
                        proposed.push(REFERENCE.to_string());
                    }
                    if i > n {
                        break;
                    }
                    let line = format!("line_{i}();");
                    original.push(line.clone());
                    if i > lo && i <= hi {
                        expected.push(line);
                        continue;
                    }
                    for (k, _) in inserts.iter().enumerate().filter(|&(_, &at)| at == i) {
                        let added = format!("added_{i}_{k}();");
                        proposed.push(added.clone());
                        expected.push(added);
                    }
                    proposed.push(line.clone());
                    expected.push(line);
                }
                for lines in [&mut original, &mut proposed, &mut expected] {
                    lines.push(String::new());
                }
                (original.join("\n"), proposed.join("\n"), expected.join("\n"))
            })
    }

    fn long_line_count(text: &str, line: &str) -> usize {
        text.split('\n').filter(|l| l.trim() == line).count()
    }

    proptest! {
        #[test]
        fn prop_identity_edit_is_unchanged(
            lines in arb_code().prop_filter("needs code", |lines| lines.iter().any(|l| !l.trim().is_empty()))
        ) {
            let original = lines.join("\n");
            let result = merge(&original, &original, "");
            prop_assert_eq!(&result.new_file, &original);
            prop_assert!(result.reasons.is_empty(), "{:?}", result.reasons);
        }

        #[test]
        fn prop_additions_keep_original_lines((original, proposed, expected) in arb_addition()) {
            let result = merge(&original, &proposed, "type: add");
            prop_assert!(result.reasons.is_empty(), "{:?}", result.reasons);
            prop_assert_eq!(&result.new_file, &expected);
        }

        #[test]
        fn prop_merge_never_multiplies_long_lines(
            original in arb_code(),
            proposed in arb_proposal(),
            description in prop::sample::select(vec!["type: add", "type: replace"]),
        ) {
            let original = original.join("\n");
            let proposed = proposed.join("\n");
            let result = merge(&original, &proposed, description);

            for line in CODE.iter().map(|l| l.trim()).filter(|l| l.len() > DEFAULT_DUPLICATION_THRESHOLD) {
                let in_original = long_line_count(&original, line);
                let in_proposed = long_line_count(&proposed, line);
                let in_merged = long_line_count(&result.new_file, line);
                prop_assert!(
                    in_merged <= in_original.max(in_proposed) + in_original,
                    "{line:?}: {in_merged} merged, {in_original} original, {in_proposed} proposed"
                );
            }

            if description == "type: add" && result.reasons.is_empty() {
                for line in original.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
                    prop_assert!(result.new_file.split('\n').any(|l| l.trim() == line), "lost {:?}", line);
                }
            }
        }
    }
}
