//! Stylesheet stages: Sass compilation and plain-CSS concatenation.
//!
//! ## Sass
//!
//! Every entry file matched by the Sass glob is compiled with `grass`.
//! Partials (`_name.scss`) are skipped; they are only reachable through
//! `@use`/`@import` from an entry file. For each entry `<rel>/<stem>.scss`:
//!
//! ```text
//! src/tmp/css/<rel>/<stem>.css        compiled, unoptimized, no map
//! docs/css/<rel>/<stem>.css           post-processed, ends with sourceMappingURL
//! docs/css/<rel>/<stem>.css.map
//! ```
//!
//! A lone entry is written under the configured stylesheet name
//! (`files.css`) in its directory instead of `<stem>.css`. The map's
//! `sources` entry is the intermediate file (or the Sass entry when there is
//! no intermediate directory), relative to the map.
//!
//! All entries are compiled and post-processed before anything is written,
//! so a syntax error in any file leaves every output untouched.
//!
//! ## Plain CSS
//!
//! Hand-written stylesheets are concatenated in glob order and run through
//! the same chain into a single file. No source map is written.

use crate::paths::{GlobSpec, SourceFile, display_rel};
use crate::postcss::{Chain, ChainError, ChainOutput, LintWarning, MarkupCorpus};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StyleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to compile {}: {message}", .path.display())]
    Compile { path: PathBuf, message: String },
    #[error(transparent)]
    PostProcess(#[from] ChainError),
    #[error("failed to rewrite source map: {0}")]
    SourceMap(#[from] serde_json::Error),
}

/// One written stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleOutput {
    /// Output path relative to the destination directory.
    pub css: String,
    pub map: Option<String>,
    pub bytes: usize,
    pub purged: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StyleReport {
    pub outputs: Vec<StyleOutput>,
    pub warnings: Vec<LintWarning>,
}

fn is_partial(file: &SourceFile) -> bool {
    file.path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}

/// Compile Sass entry files, write intermediates, post-process and write
/// the optimized stylesheets with source maps. A single entry is named
/// `file_name`.
pub fn compile_scss(
    spec: &GlobSpec,
    dest: &Path,
    tmp: Option<&Path>,
    file_name: &str,
    chain: &Chain,
    corpus: &MarkupCorpus,
) -> Result<StyleReport, StyleError> {
    let entries: Vec<SourceFile> = spec
        .resolve()?
        .into_iter()
        .filter(|f| !is_partial(f))
        .collect();

    let options = grass::Options::default().style(grass::OutputStyle::Expanded);
    let mut compiled = Vec::with_capacity(entries.len());
    for entry in &entries {
        let css = grass::from_path(&entry.path, &options).map_err(|e| StyleError::Compile {
            path: entry.path.clone(),
            message: e.to_string(),
        })?;
        debug!(source = %entry.path.display(), bytes = css.len(), "compiled");
        let rel = if entries.len() == 1 {
            entry.rel.with_file_name(file_name)
        } else {
            entry.rel.with_extension("css")
        };
        compiled.push((entry, rel, css));
    }

    let mut processed = Vec::with_capacity(compiled.len());
    for (entry, rel, css) in &compiled {
        let output = chain.run(css, &display_rel(rel), corpus)?;
        processed.push((*entry, rel, css, output));
    }

    let mut report = StyleReport::default();
    for (entry, rel, css, output) in processed {
        let source = match tmp {
            Some(tmp) => {
                let intermediate = tmp.join(rel);
                write_file(&intermediate, css.as_bytes())?;
                intermediate
            }
            None => entry.path.clone(),
        };
        report.outputs.push(write_with_map(dest, rel, &source, &output)?);
        report.warnings.extend(output.warnings);
    }
    Ok(report)
}

/// Concatenate plain stylesheets into `file_name` and post-process the result.
pub fn concat_css(
    spec: &GlobSpec,
    dest: &Path,
    file_name: &str,
    chain: &Chain,
    corpus: &MarkupCorpus,
) -> Result<StyleReport, StyleError> {
    let files = spec.resolve()?;
    if files.is_empty() {
        return Ok(StyleReport::default());
    }
    let mut bundle = String::new();
    for file in &files {
        bundle.push_str(&fs::read_to_string(&file.path)?);
        bundle.push('\n');
    }

    let output = chain.run(&bundle, file_name, corpus)?;
    write_file(&dest.join(file_name), output.code.as_bytes())?;
    Ok(StyleReport {
        outputs: vec![StyleOutput {
            css: file_name.to_string(),
            map: None,
            bytes: output.code.len(),
            purged: output.purged,
        }],
        warnings: output.warnings,
    })
}

fn write_with_map(
    dest: &Path,
    rel: &Path,
    source: &Path,
    output: &ChainOutput,
) -> Result<StyleOutput, StyleError> {
    let css_rel = display_rel(rel);
    let map_rel = format!("{css_rel}.map");
    let map_path = dest.join(&map_rel);
    let map_name = map_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| map_rel.clone());
    let source_ref = map_path
        .parent()
        .and_then(|dir| pathdiff::diff_paths(source, dir))
        .map(|p| display_rel(&p))
        .unwrap_or_else(|| display_rel(source));
    let map = with_source(&output.map, &source_ref)?;

    let code = format!("{}\n/*# sourceMappingURL={} */\n", output.code, map_name);
    write_file(&dest.join(&css_rel), code.as_bytes())?;
    write_file(&map_path, map.as_bytes())?;
    Ok(StyleOutput {
        css: css_rel,
        map: Some(map_rel),
        bytes: code.len(),
        purged: output.purged,
    })
}

/// Point a single-source map at `source`.
fn with_source(map: &str, source: &str) -> Result<String, StyleError> {
    let mut value: serde_json::Value = serde_json::from_str(map)?;
    value["sources"] = serde_json::json!([source]);
    Ok(serde_json::to_string(&value)?)
}

fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}
