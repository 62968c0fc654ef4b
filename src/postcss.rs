//! Stylesheet post-processing chain.
//!
//! A [`Chain`] is an ordered list of [`Transform`]s applied left to right to
//! compiled CSS. The stylesheet is parsed once with `lightningcss`; every
//! transform is an in-place pass over that one AST, and the result is printed
//! once at the end. Because there is a single parse and a single print, the
//! emitted source map points straight back at the chain's input.
//!
//! | Transform | Pass |
//! |-----------|------|
//! | `Prefix`  | minify pass with browser targets: inserts vendor prefixes |
//! | `Minify`  | folds rules, switches the printer to minified output |
//! | `Lint`    | reports warnings on the unmodified parse, never modifies or fails |
//! | `Purge`   | drops class/id selectors absent from the markup corpus |
//!
//! Purging follows the usual content-scan approach: every word in the markup
//! (`[A-Za-z0-9_-]+`) counts as used. Class and id names that appear in the
//! stylesheet but not in that word set are handed to `lightningcss` as
//! `unused_symbols`. Element selectors are never purged.

use crate::paths::GlobSpec;
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use lightningcss::traits::ToCss;
use parcel_sourcemap::SourceMap;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

static MARKUP_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_-]+").expect("markup word regex must compile"));

static SELECTOR_SYMBOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.#](-?[A-Za-z_][A-Za-z0-9_-]*)").expect("selector symbol regex must compile")
});

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("invalid browser query {query:?}: {message}")]
    Browsers { query: String, message: String },
    #[error("{file}: {message}")]
    Parse { file: String, message: String },
    #[error("{file}: minify failed: {message}")]
    Minify { file: String, message: String },
    #[error("{file}: print failed: {message}")]
    Print { file: String, message: String },
    #[error("{file}: source map failed: {message}")]
    SourceMap { file: String, message: String },
    #[error("failed to read markup corpus: {0}")]
    Corpus(#[from] std::io::Error),
}

/// One stylesheet transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Prefix,
    Minify,
    Lint,
    Purge,
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transform::Prefix => "prefix",
            Transform::Minify => "minify",
            Transform::Lint => "lint",
            Transform::Purge => "purge",
        };
        f.write_str(name)
    }
}

/// A lint finding. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintWarning {
    pub file: String,
    /// 1-based line in the chain input.
    pub line: u32,
    pub rule: &'static str,
    pub message: String,
}

/// Words used anywhere in the markup corpus.
#[derive(Debug, Clone, Default)]
pub struct MarkupCorpus {
    words: HashSet<String>,
}

impl MarkupCorpus {
    /// Collect words from every file matched by `globs` under `root`.
    pub fn collect(root: &Path, globs: &[String]) -> Result<Self, ChainError> {
        let mut corpus = Self::default();
        for glob in globs {
            let spec = GlobSpec::new(root, glob).map_err(|e| {
                ChainError::Corpus(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
            })?;
            for file in spec.resolve()? {
                let bytes = std::fs::read(&file.path)?;
                corpus.add_text(&String::from_utf8_lossy(&bytes));
            }
        }
        Ok(corpus)
    }

    pub fn from_text(text: &str) -> Self {
        let mut corpus = Self::default();
        corpus.add_text(text);
        corpus
    }

    fn add_text(&mut self, text: &str) {
        self.words
            .extend(MARKUP_WORD.find_iter(text).map(|m| m.as_str().to_string()));
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }
}

/// Output of a chain run.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub code: String,
    /// Source map v3 JSON mapping `code` back to the chain input.
    pub map: String,
    pub warnings: Vec<LintWarning>,
    /// Style rules removed by the purge pass.
    pub purged: usize,
}

#[derive(Default)]
struct PassState {
    targets: Targets,
    minify: bool,
    warnings: Vec<LintWarning>,
    purged: usize,
}

/// Ordered stylesheet post-processing.
#[derive(Debug, Clone)]
pub struct Chain {
    transforms: Vec<Transform>,
    browsers: Option<Browsers>,
}

impl Chain {
    pub fn new(transforms: Vec<Transform>, browsers: Option<Browsers>) -> Self {
        Self {
            transforms,
            browsers,
        }
    }

    /// prefix → minify → lint → purge, with targets from browserslist queries.
    pub fn standard(queries: &[String]) -> Result<Self, ChainError> {
        let browsers = if queries.is_empty() {
            None
        } else {
            Browsers::from_browserslist(queries.iter()).map_err(|e| ChainError::Browsers {
                query: queries.join(", "),
                message: e.to_string(),
            })?
        };
        Ok(Self::new(
            vec![
                Transform::Prefix,
                Transform::Minify,
                Transform::Lint,
                Transform::Purge,
            ],
            browsers,
        ))
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Run all transforms over `css`. `filename` names the input in source
    /// maps and warnings.
    pub fn run(
        &self,
        css: &str,
        filename: &str,
        corpus: &MarkupCorpus,
    ) -> Result<ChainOutput, ChainError> {
        let mut sheet = StyleSheet::parse(
            css,
            ParserOptions {
                filename: filename.to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| ChainError::Parse {
            file: filename.to_string(),
            message: e.to_string(),
        })?;

        let mut state = PassState::default();
        // Lint reads the stylesheet as written; later passes drop empty rules
        // and merge duplicates.
        if self.transforms.contains(&Transform::Lint) {
            lint_rules(&sheet.rules, filename, &mut state.warnings);
        }
        for transform in &self.transforms {
            match transform {
                Transform::Prefix => {
                    state.targets = Targets {
                        browsers: self.browsers,
                        ..Targets::default()
                    };
                    minify_pass(&mut sheet, state.targets, HashSet::new(), filename)?;
                }
                Transform::Minify => {
                    minify_pass(&mut sheet, state.targets, HashSet::new(), filename)?;
                    state.minify = true;
                }
                Transform::Lint => {}
                Transform::Purge => {
                    let unused = unused_symbols(css, corpus);
                    if !unused.is_empty() {
                        let before = count_style_rules(&sheet.rules);
                        minify_pass(&mut sheet, state.targets, unused, filename)?;
                        state.purged += before.saturating_sub(count_style_rules(&sheet.rules));
                    }
                }
            }
        }

        let mut source_map = SourceMap::new("/");
        source_map.add_source(filename);
        source_map
            .set_source_content(0, css)
            .map_err(|e| ChainError::SourceMap {
                file: filename.to_string(),
                message: format!("{e:?}"),
            })?;
        let printed = sheet
            .to_css(PrinterOptions {
                minify: state.minify,
                targets: state.targets,
                source_map: Some(&mut source_map),
                ..PrinterOptions::default()
            })
            .map_err(|e| ChainError::Print {
                file: filename.to_string(),
                message: e.to_string(),
            })?;
        let map = source_map
            .to_json(None)
            .map_err(|e| ChainError::SourceMap {
                file: filename.to_string(),
                message: format!("{e:?}"),
            })?;

        Ok(ChainOutput {
            code: printed.code,
            map,
            warnings: state.warnings,
            purged: state.purged,
        })
    }
}

fn minify_pass(
    sheet: &mut StyleSheet<'_>,
    targets: Targets,
    unused_symbols: HashSet<String>,
    filename: &str,
) -> Result<(), ChainError> {
    sheet
        .minify(MinifyOptions {
            targets,
            unused_symbols,
        })
        .map_err(|e| ChainError::Minify {
            file: filename.to_string(),
            message: e.to_string(),
        })
}

/// Class and id names referenced by the stylesheet but absent from the corpus.
fn unused_symbols(css: &str, corpus: &MarkupCorpus) -> HashSet<String> {
    SELECTOR_SYMBOL
        .captures_iter(css)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|symbol| !corpus.contains(symbol))
        .map(str::to_string)
        .collect()
}

fn count_style_rules(rules: &CssRuleList<'_>) -> usize {
    rules
        .0
        .iter()
        .map(|rule| match rule {
            CssRule::Style(style) => 1 + count_style_rules(&style.rules),
            CssRule::Media(media) => count_style_rules(&media.rules),
            CssRule::Supports(supports) => count_style_rules(&supports.rules),
            _ => 0,
        })
        .sum()
}

fn lint_rules(rules: &CssRuleList<'_>, file: &str, warnings: &mut Vec<LintWarning>) {
    let mut seen = HashSet::new();
    for rule in &rules.0 {
        match rule {
            CssRule::Style(style) => {
                let selector = style
                    .selectors
                    .to_css_string(PrinterOptions::default())
                    .unwrap_or_default();
                let line = style.loc.line + 1;
                let block = &style.declarations;
                if block.declarations.is_empty()
                    && block.important_declarations.is_empty()
                    && style.rules.0.is_empty()
                {
                    warnings.push(LintWarning {
                        file: file.to_string(),
                        line,
                        rule: "block-no-empty",
                        message: format!("unexpected empty block in {selector}"),
                    });
                }
                if !block.important_declarations.is_empty() {
                    warnings.push(LintWarning {
                        file: file.to_string(),
                        line,
                        rule: "declaration-no-important",
                        message: format!(
                            "{} !important declaration(s) in {selector}",
                            block.important_declarations.len()
                        ),
                    });
                }
                if !seen.insert(selector.clone()) {
                    warnings.push(LintWarning {
                        file: file.to_string(),
                        line,
                        rule: "no-duplicate-selectors",
                        message: format!("duplicate selector {selector}"),
                    });
                }
                lint_rules(&style.rules, file, warnings);
            }
            CssRule::Media(media) => lint_rules(&media.rules, file, warnings),
            CssRule::Supports(supports) => lint_rules(&supports.rules, file, warnings),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn chain(transforms: Vec<Transform>) -> Chain {
        Chain::new(transforms, None)
    }

    // =========================================================================
    // Purge
    // =========================================================================

    #[test]
    fn purge_drops_rules_missing_from_markup() {
        let corpus = MarkupCorpus::from_text(r#"<div class="used"></div>"#);
        let out = chain(vec![Transform::Purge])
            .run(".used{color:red}.unused{color:blue}", "style.css", &corpus)
            .unwrap();
        assert!(out.code.contains(".used"));
        assert!(!out.code.contains(".unused"));
        assert_eq!(out.purged, 1);
    }

    #[test]
    fn purge_keeps_element_selectors() {
        let corpus = MarkupCorpus::default();
        let out = chain(vec![Transform::Purge])
            .run("body{margin:0}.gone{color:red}", "style.css", &corpus)
            .unwrap();
        assert!(out.code.contains("body"));
        assert!(!out.code.contains(".gone"));
    }

    #[test]
    fn purge_matches_ids() {
        let corpus = MarkupCorpus::from_text(r#"<main id="app"></main>"#);
        let out = chain(vec![Transform::Purge])
            .run("#app{color:red}#modal{color:blue}", "style.css", &corpus)
            .unwrap();
        assert!(out.code.contains("#app"));
        assert!(!out.code.contains("#modal"));
    }

    #[test]
    fn corpus_collects_from_globs() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/index.html"), r#"<p class="lead">"#).unwrap();
        fs::write(tmp.path().join("notes.txt"), "hidden").unwrap();

        let corpus = MarkupCorpus::collect(tmp.path(), &["**/*.html".to_string()]).unwrap();
        assert!(corpus.contains("lead"));
        assert!(!corpus.contains("hidden"));
    }

    // =========================================================================
    // Minify and prefix
    // =========================================================================

    #[test]
    fn minify_removes_whitespace() {
        let out = chain(vec![Transform::Minify])
            .run(".box {\n  color: red;\n}\n", "style.css", &MarkupCorpus::default())
            .unwrap();
        assert_eq!(out.code, ".box{color:red}");
    }

    #[test]
    fn output_is_idempotent() {
        let chain = Chain::standard(&["defaults".to_string()]).unwrap();
        let corpus = MarkupCorpus::from_text(r#"class="box""#);
        let css = ".box { display: flex; user-select: none; }";
        let a = chain.run(css, "style.css", &corpus).unwrap();
        let b = chain.run(css, "style.css", &corpus).unwrap();
        assert_eq!(a.code, b.code);
    }

    #[test]
    fn prefix_adds_vendor_prefixes_for_old_targets() {
        let chain = Chain::standard(&["safari 10".to_string()]).unwrap();
        let corpus = MarkupCorpus::from_text(r#"class="box""#);
        let out = chain
            .run(".box{user-select:none}", "style.css", &corpus)
            .unwrap();
        assert!(out.code.contains("-webkit-user-select"));
    }

    #[test]
    fn invalid_browser_query_is_error() {
        let result = Chain::standard(&["not a real browser 99".to_string()]);
        assert!(matches!(result, Err(ChainError::Browsers { .. })));
    }

    #[test]
    fn source_map_names_input() {
        let out = chain(vec![Transform::Minify])
            .run(".a{color:red}", "style.css", &MarkupCorpus::default())
            .unwrap();
        let map: serde_json::Value = serde_json::from_str(&out.map).unwrap();
        assert_eq!(map["version"], 3);
        assert!(out.map.contains("style.css"));
    }

    // =========================================================================
    // Lint
    // =========================================================================

    #[test]
    fn lint_reports_without_modifying() {
        let out = chain(vec![Transform::Lint])
            .run(
                ".a{}\n.b{color:red!important}\n.b{margin:0}\n",
                "style.css",
                &MarkupCorpus::default(),
            )
            .unwrap();
        let rules: Vec<&str> = out.warnings.iter().map(|w| w.rule).collect();
        assert!(rules.contains(&"block-no-empty"));
        assert!(rules.contains(&"declaration-no-important"));
        assert!(rules.contains(&"no-duplicate-selectors"));
        assert!(out.code.contains(".a"));
    }

    #[test]
    fn standard_chain_lints_before_minifying() {
        let chain = Chain::standard(&[]).unwrap();
        let corpus = MarkupCorpus::from_text(r#"class="a b c""#);
        let out = chain
            .run(
                ".a{}\n.b{color:red}\n.b{margin:0}\n.c{color:red!important}\n",
                "style.css",
                &corpus,
            )
            .unwrap();

        let found: Vec<(&str, u32)> = out.warnings.iter().map(|w| (w.rule, w.line)).collect();
        assert!(found.contains(&("block-no-empty", 1)));
        assert!(found.contains(&("no-duplicate-selectors", 3)));
        assert!(found.contains(&("declaration-no-important", 4)));
        assert!(!out.code.contains(".a{"));
    }

    #[test]
    fn lint_line_numbers_are_one_based() {
        let out = chain(vec![Transform::Lint])
            .run("\n\n.a{}", "style.css", &MarkupCorpus::default())
            .unwrap();
        assert_eq!(out.warnings[0].line, 3);
        assert_eq!(out.warnings[0].file, "style.css");
    }
}
