//! Line-comment delimiters per language.

use crate::types::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentSymbols {
    pub open: &'static str,
    pub close: &'static str,
}

impl CommentSymbols {
    pub const NONE: CommentSymbols = CommentSymbols { open: "", close: "" };

    const fn new(open: &'static str, close: &'static str) -> Self {
        Self { open, close }
    }

    /// Languages without a line comment (JSON, JSX, ...) cannot carry a
    /// normalized marker.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// The canonical marker line the structural applier feeds to parsers,
    /// e.g. `// ref` or `<!-- ref -->`.
    pub fn ref_comment(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        if self.close.is_empty() {
            Some(format!("{} ref", self.open))
        } else {
            Some(format!("{} ref {}", self.open, self.close))
        }
    }
}

pub fn comment_symbols(lang: Language) -> CommentSymbols {
    match lang {
        Language::C
        | Language::Cpp
        | Language::CSharp
        | Language::Java
        | Language::JavaScript
        | Language::TypeScript
        | Language::Go
        | Language::Rust
        | Language::Swift
        | Language::Kotlin
        | Language::Groovy
        | Language::Scala
        | Language::Php => CommentSymbols::new("//", ""),
        Language::Bash
        | Language::Yaml
        | Language::Toml
        | Language::Python
        | Language::Ruby
        | Language::Elixir
        | Language::Hcl
        | Language::Dockerfile => CommentSymbols::new("#", ""),
        Language::Lua | Language::Elm => CommentSymbols::new("--", ""),
        Language::Css => CommentSymbols::new("/*", "*/"),
        Language::Html => CommentSymbols::new("<!--", "-->"),
        Language::OCaml => CommentSymbols::new("(*", "*)"),
        Language::Json | Language::Jsx | Language::Tsx | Language::Svelte => CommentSymbols::NONE,
    }
}
