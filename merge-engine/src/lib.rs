//! # refmerge-engine
//!
//! Applies partial file rewrites to the original source. A rewrite (the
//! "proposed update") repeats only the code around an edit and stands in for
//! everything else with reference comments such as
//! `// ... existing code ...`. Deletions are spelled with a removal marker,
//! `// Plandex: removed code`.
//!
//! ## Approach
//!
//! 1. **Anchor mapping**: proposed lines are matched to original lines,
//!    unique lines first, then repeated lines paired from the outside in.
//!    Every reference is bounded by its anchored neighbours, which gives the
//!    original span it expands to.
//!
//! 2. **Line merge**: the proposal is walked top to bottom, copying the
//!    referenced spans in place of each reference. This resolves the vast
//!    majority of updates without parsing anything.
//!
//! 3. **Structural merge**: when consecutive references share one gap the
//!    line walk cannot decide how to split it. If a tree-sitter grammar is
//!    available the gap is split along sibling syntax nodes instead.
//!
//! 4. **Audit**: the result is checked for original lines that disappeared
//!    without being declared removed, and for long lines the merge repeated.
//!    Findings are returned as [`VerifyReason`]s rather than errors.
//!
//! ## Supported Languages
//!
//! Reference comments are recognized in any text. Structural merge and
//! syntax validation use tree-sitter grammars for: Rust, JavaScript,
//! TypeScript, TSX/JSX, Python, Java, Go, C, C++, C#, Kotlin, Scala, PHP,
//! Ruby, Bash, CSS, HTML, TOML, YAML.
//!
//! ## Example
//!
//! ```rust
//! use refmerge_engine::{apply_changes, ApplyRequest};
//!
//! let original = "func F() {\n  a()\n  b()\n  return\n}\n";
//! let proposed = "func F() {\n  // ... existing code ...\n  log()\n  return\n}\n";
//!
//! let result = apply_changes(&ApplyRequest::new(original, proposed, "type: add")).unwrap();
//! assert_eq!(result.new_file, "func F() {\n  a()\n  b()\n  log()\n  return\n}\n");
//! assert!(!result.needs_verification());
//! ```

pub mod anchors;
pub mod apply;
pub mod cancel;
pub mod comments;
pub mod error;
pub mod markers;
pub mod parser;
pub mod types;
pub mod validate;

mod audit;
mod generic;
mod sections;
mod structural;

// Re-export primary public API
pub use apply::{apply_changes, ApplyRequest, EngineConfig, MergeEngine};
pub use cancel::CancellationFlag;
pub use comments::{comment_symbols, CommentSymbols};
pub use error::{MergeError, ParseError};
pub use markers::{is_reference, is_removal, ChangeDescription};
pub use parser::{get_parser_for_path, ParserLookup, SyntaxParser, DEFAULT_PARSE_TIMEOUT};
pub use types::{ChangeKind, Language, LineRange, MergeResult, UnknownLanguage, VerifyReason};
pub use validate::{validate, ValidationResult};
