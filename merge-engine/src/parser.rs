//! Tree-sitter grammar registry and deadline-bounded parsing.
//!
//! Grammars are plain immutable values; a fresh `tree_sitter::Parser` is built
//! for every parse so callers on different threads never share parser state.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use tree_sitter::{ParseOptions, ParseState, Point, Tree};

use crate::cancel::CancellationFlag;
use crate::error::ParseError;
use crate::types::Language;

pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_millis(500);

/// A compiled grammar for one language tag.
#[derive(Clone)]
pub struct SyntaxParser {
    language: Language,
    grammar: tree_sitter::Language,
}

impl fmt::Debug for SyntaxParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntaxParser").field("language", &self.language).finish()
    }
}

impl SyntaxParser {
    /// `None` when no grammar is compiled in for `lang`.
    pub fn for_language(lang: Language) -> Option<Self> {
        let grammar = get_tree_sitter_language(lang)?;
        Some(Self { language: lang, grammar })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// The grammar to retry with when this one reports syntax errors.
    pub fn fallback(&self) -> Option<SyntaxParser> {
        match self.language {
            Language::JavaScript | Language::TypeScript => SyntaxParser::for_language(Language::Tsx),
            _ => None,
        }
    }

    pub fn parse(
        &self,
        source: &str,
        timeout: Duration,
        cancel: &CancellationFlag,
    ) -> Result<Tree, ParseError> {
        parse_with_deadline(self, source.as_bytes(), Instant::now() + timeout, cancel)
    }
}

/// Result of looking up parsers for a file path.
#[derive(Debug, Clone, Default)]
pub struct ParserLookup {
    pub language: Option<Language>,
    pub parser: Option<SyntaxParser>,
    pub fallback: Option<SyntaxParser>,
}

impl ParserLookup {
    pub fn for_language(lang: Language) -> Self {
        let parser = SyntaxParser::for_language(lang);
        let fallback = parser.as_ref().and_then(SyntaxParser::fallback);
        Self {
            language: Some(lang),
            parser,
            fallback,
        }
    }

    pub fn fallback_language(&self) -> Option<Language> {
        self.fallback.as_ref().map(SyntaxParser::language)
    }
}

pub fn get_parser_for_path(path: &Path) -> ParserLookup {
    match Language::from_path(path) {
        Some(lang) => ParserLookup::for_language(lang),
        None => ParserLookup::default(),
    }
}

/// Get the tree-sitter Language object for a given language tag.
fn get_tree_sitter_language(lang: Language) -> Option<tree_sitter::Language> {
    let lang_ref = match lang {
        Language::Rust => tree_sitter_rust::LANGUAGE,
        // JSON with reference lines is rarely valid JSON; the JS grammar copes.
        Language::JavaScript | Language::Json => tree_sitter_javascript::LANGUAGE,
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
        Language::Tsx | Language::Jsx => tree_sitter_typescript::LANGUAGE_TSX,
        Language::Python => tree_sitter_python::LANGUAGE,
        Language::Java => tree_sitter_java::LANGUAGE,
        Language::Go => tree_sitter_go::LANGUAGE,
        Language::C => tree_sitter_c::LANGUAGE,
        Language::Cpp => tree_sitter_cpp::LANGUAGE,
        Language::CSharp => tree_sitter_c_sharp::LANGUAGE,
        Language::Kotlin => tree_sitter_kotlin_ng::LANGUAGE,
        Language::Scala => tree_sitter_scala::LANGUAGE,
        Language::Php => tree_sitter_php::LANGUAGE_PHP,
        Language::Ruby => tree_sitter_ruby::LANGUAGE,
        Language::Bash => tree_sitter_bash::LANGUAGE,
        Language::Css => tree_sitter_css::LANGUAGE,
        Language::Html => tree_sitter_html::LANGUAGE,
        Language::Toml => tree_sitter_toml_ng::LANGUAGE,
        Language::Yaml => tree_sitter_yaml::LANGUAGE,
        _ => return None,
    };
    Some(lang_ref.into())
}

/// Parse `source`, giving up once `deadline` passes or `cancel` is set.
///
/// Both conditions are checked before parsing starts and again from
/// tree-sitter's progress callback, so an already-expired deadline always
/// yields [`ParseError::TimedOut`].
pub fn parse_with_deadline(
    parser: &SyntaxParser,
    source: &[u8],
    deadline: Instant,
    cancel: &CancellationFlag,
) -> Result<Tree, ParseError> {
    if cancel.is_cancelled() {
        return Err(ParseError::Cancelled);
    }
    if Instant::now() >= deadline {
        return Err(ParseError::TimedOut);
    }

    let mut ts_parser = tree_sitter::Parser::new();
    ts_parser
        .set_language(&parser.grammar)
        .map_err(|e| ParseError::LanguageError(e.to_string()))?;

    let mut read = move |offset: usize, _: Point| source.get(offset..).unwrap_or_default();
    let mut progress = |_: &ParseState| cancel.is_cancelled() || Instant::now() >= deadline;
    let options = ParseOptions::new().progress_callback(&mut progress);

    match ts_parser.parse_with_options(&mut read, None, Some(options)) {
        Some(tree) => Ok(tree),
        None if cancel.is_cancelled() => Err(ParseError::Cancelled),
        None if Instant::now() >= deadline => {
            tracing::warn!(language = %parser.language, "parse exceeded deadline");
            Err(ParseError::TimedOut)
        }
        None => Err(ParseError::ParseFailed),
    }
}

/// A parse tree and the grammar that produced it.
pub struct ParsedSource {
    pub tree: Tree,
    pub parser: SyntaxParser,
}

/// Parse with `parser`, retrying with its fallback grammar when the primary
/// tree has syntax errors. The fallback tree is used only if it is clean.
pub fn parse_preferring_clean(
    parser: &SyntaxParser,
    source: &str,
    deadline: Instant,
    cancel: &CancellationFlag,
) -> Result<ParsedSource, ParseError> {
    let tree = parse_with_deadline(parser, source.as_bytes(), deadline, cancel)?;
    if !tree.root_node().has_error() {
        return Ok(ParsedSource { tree, parser: parser.clone() });
    }
    if let Some(fallback) = parser.fallback() {
        match parse_with_deadline(&fallback, source.as_bytes(), deadline, cancel) {
            Ok(retry) if !retry.root_node().has_error() => {
                tracing::debug!(
                    primary = %parser.language,
                    fallback = %fallback.language,
                    "using fallback grammar"
                );
                return Ok(ParsedSource { tree: retry, parser: fallback });
            }
            Err(ParseError::Cancelled) => return Err(ParseError::Cancelled),
            _ => {}
        }
    }
    Ok(ParsedSource { tree, parser: parser.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rust() -> SyntaxParser {
        SyntaxParser::for_language(Language::Rust).unwrap()
    }

    #[test]
    fn test_parse_rust() {
        let tree = rust()
            .parse("fn main() { let x = 1; }", DEFAULT_PARSE_TIMEOUT, &CancellationFlag::new())
            .unwrap();
        assert_eq!(tree.root_node().kind(), "source_file");
        assert!(!tree.root_node().has_error());
    }

    #[test]
    fn test_parse_javascript() {
        let parser = SyntaxParser::for_language(Language::JavaScript).unwrap();
        let tree = parser
            .parse("function foo() { return 42; }", DEFAULT_PARSE_TIMEOUT, &CancellationFlag::new())
            .unwrap();
        assert_eq!(tree.root_node().kind(), "program");
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let result = rust().parse("fn main() {}", Duration::ZERO, &CancellationFlag::new());
        assert_eq!(result.err(), Some(ParseError::TimedOut));
    }

    #[test]
    fn test_cancelled_before_parse() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = rust().parse("fn main() {}", DEFAULT_PARSE_TIMEOUT, &cancel);
        assert_eq!(result.err(), Some(ParseError::Cancelled));
    }

    #[test]
    fn test_lookup_by_path() {
        let lookup = get_parser_for_path(Path::new("web/app.ts"));
        assert_eq!(lookup.language, Some(Language::TypeScript));
        assert!(lookup.parser.is_some());
        assert_eq!(lookup.fallback_language(), Some(Language::Tsx));

        let lua = get_parser_for_path(Path::new("init.lua"));
        assert_eq!(lua.language, Some(Language::Lua));
        assert!(lua.parser.is_none());

        assert!(get_parser_for_path(Path::new("notes.unknown")).language.is_none());
    }

    #[test]
    fn test_fallback_used_when_primary_has_errors() {
        let parser = SyntaxParser::for_language(Language::TypeScript).unwrap();
        let source = "const el = <div className=\"a\">hi</div>;\n";
        let parsed = parse_preferring_clean(
            &parser,
            source,
            Instant::now() + DEFAULT_PARSE_TIMEOUT,
            &CancellationFlag::new(),
        )
        .unwrap();
        assert_eq!(parsed.parser.language(), Language::Tsx);
        assert!(!parsed.tree.root_node().has_error());
    }
}
