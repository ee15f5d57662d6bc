//! Core types shared by the merge pipeline.
//!
//! Line numbers are 1-based everywhere in this crate unless a variable name
//! says `idx`. Ranges are inclusive on both ends.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Proposed line number → original line number.
pub type AnchorMap = BTreeMap<usize, usize>;

/// Language tags understood by the engine.
///
/// Every tag has a comment vocabulary; only some have a compiled grammar
/// (see [`crate::parser::SyntaxParser::for_language`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    CSharp,
    Java,
    JavaScript,
    TypeScript,
    Go,
    Rust,
    Swift,
    Kotlin,
    Groovy,
    Scala,
    Php,
    Bash,
    Yaml,
    Toml,
    Python,
    Ruby,
    Elixir,
    Hcl,
    Dockerfile,
    Lua,
    Elm,
    Css,
    Html,
    OCaml,
    Json,
    Jsx,
    Tsx,
    Svelte,
}

impl Language {
    pub const ALL: [Language; 30] = [
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::Java,
        Language::JavaScript,
        Language::TypeScript,
        Language::Go,
        Language::Rust,
        Language::Swift,
        Language::Kotlin,
        Language::Groovy,
        Language::Scala,
        Language::Php,
        Language::Bash,
        Language::Yaml,
        Language::Toml,
        Language::Python,
        Language::Ruby,
        Language::Elixir,
        Language::Hcl,
        Language::Dockerfile,
        Language::Lua,
        Language::Elm,
        Language::Css,
        Language::Html,
        Language::OCaml,
        Language::Json,
        Language::Jsx,
        Language::Tsx,
        Language::Svelte,
    ];

    /// Detect language from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Language> {
        let lang = match ext.to_ascii_lowercase().as_str() {
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Language::Cpp,
            "cs" => Language::CSharp,
            "java" => Language::Java,
            "js" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "swift" => Language::Swift,
            "kt" | "kts" => Language::Kotlin,
            "groovy" | "gradle" => Language::Groovy,
            "scala" | "sc" => Language::Scala,
            "php" => Language::Php,
            "sh" | "bash" | "zsh" => Language::Bash,
            "yaml" | "yml" => Language::Yaml,
            "toml" => Language::Toml,
            "py" | "pyw" => Language::Python,
            "rb" | "rake" | "gemspec" => Language::Ruby,
            "ex" | "exs" => Language::Elixir,
            "hcl" | "tf" => Language::Hcl,
            "dockerfile" => Language::Dockerfile,
            "lua" => Language::Lua,
            "elm" => Language::Elm,
            "css" => Language::Css,
            "html" | "htm" => Language::Html,
            "ml" | "mli" => Language::OCaml,
            "json" => Language::Json,
            "jsx" => Language::Jsx,
            "tsx" => Language::Tsx,
            "svelte" => Language::Svelte,
            _ => return None,
        };
        Some(lang)
    }

    /// Detect language from a path, recognizing well-known extensionless
    /// file names before falling back to the extension.
    pub fn from_path(path: &Path) -> Option<Language> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name == "dockerfile" || name.starts_with("dockerfile.") {
            return Some(Language::Dockerfile);
        }
        if matches!(name.as_str(), "rakefile" | "gemfile" | "guardfile") {
            return Some(Language::Ruby);
        }
        let ext = path.extension()?.to_str()?;
        Language::from_extension(ext)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Groovy => "groovy",
            Language::Scala => "scala",
            Language::Php => "php",
            Language::Bash => "bash",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Python => "python",
            Language::Ruby => "ruby",
            Language::Elixir => "elixir",
            Language::Hcl => "hcl",
            Language::Dockerfile => "dockerfile",
            Language::Lua => "lua",
            Language::Elm => "elm",
            Language::Css => "css",
            Language::Html => "html",
            Language::OCaml => "ocaml",
            Language::Json => "json",
            Language::Jsx => "jsx",
            Language::Tsx => "tsx",
            Language::Svelte => "svelte",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown language tag: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::ALL
            .iter()
            .copied()
            .find(|lang| lang.as_str() == wanted)
            .or_else(|| Language::from_extension(&wanted))
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

/// A machine-readable signal that the merged file must be checked before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyReason {
    CodeRemoved,
    CodeDuplicated,
    AmbiguousLocation,
}

impl VerifyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyReason::CodeRemoved => "code_removed",
            VerifyReason::CodeDuplicated => "code_duplicated",
            VerifyReason::AmbiguousLocation => "ambiguous_location",
        }
    }
}

impl fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the change description says the edit does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Overwrite,
    Replace,
    Remove,
    Add,
    Prepend,
    Append,
    #[default]
    Unspecified,
}

impl ChangeKind {
    /// Additive edits: missing context is forgiven rather than deleted.
    pub fn is_insert(&self) -> bool {
        matches!(self, ChangeKind::Add | ChangeKind::Prepend | ChangeKind::Append)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Overwrite => "overwrite",
            ChangeKind::Replace => "replace",
            ChangeKind::Remove => "remove",
            ChangeKind::Add => "add",
            ChangeKind::Prepend => "prepend",
            ChangeKind::Append => "append",
            ChangeKind::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of original line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }

    pub fn overlaps(&self, other: &LineRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// The original-side span a reference or removal marker stands for.
pub type ReferenceBlock = LineRange;

/// Outcome of one merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    /// Merged file. Best effort when `reasons` is non-empty.
    pub new_file: String,
    /// The proposal as the engine saw it, after marker normalization.
    pub proposed: String,
    #[serde(rename = "needsVerifyReasons")]
    pub reasons: Vec<VerifyReason>,
}

impl MergeResult {
    pub fn needs_verification(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub(crate) fn push_reason(&mut self, reason: VerifyReason) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }
}
