//! Script bundling: concatenate, minify, emit a source map.
//!
//! All files matched by the script glob are joined in glob order (each
//! followed by a newline) into one in-memory bundle, minified with
//! `minify-js` in global top-level mode (top-level names stay intact, since
//! the inputs are classic scripts sharing one global scope), and written as
//! `<name>` plus `<name>.map`.
//!
//! The minifier does not track positions, so the map is file-granular: it
//! carries every input in `sources`/`sourcesContent` and anchors the start of
//! the output to the first input.
//!
//! Nothing is written when the bundle fails to minify.

use crate::paths::{GlobSpec, display_rel};
use minify_js::{Session, TopLevelMode, minify};
use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to minify {bundle}: {message}")]
    Minify { bundle: String, message: String },
}

/// One input file's contribution to a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePart {
    /// Path relative to the glob base, used as the source-map source name.
    pub source: String,
    pub content: String,
}

/// Concatenated, not yet minified scripts.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub parts: Vec<BundlePart>,
}

impl Bundle {
    /// Read every file matched by `spec`, in glob order.
    pub fn collect(spec: &GlobSpec) -> Result<Self, ScriptError> {
        let mut parts = Vec::new();
        for file in spec.resolve()? {
            parts.push(BundlePart {
                source: display_rel(&file.rel),
                content: fs::read_to_string(&file.path)?,
            });
        }
        Ok(Self { parts })
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The concatenated source.
    pub fn code(&self) -> String {
        let mut code = String::new();
        for part in &self.parts {
            code.push_str(&part.content);
            code.push('\n');
        }
        code
    }
}

/// Source map v3 document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapDoc<'a> {
    version: u8,
    file: &'a str,
    sources: Vec<&'a str>,
    sources_content: Vec<&'a str>,
    names: Vec<&'a str>,
    mappings: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    /// Output path relative to the destination directory; `None` when no
    /// inputs matched.
    pub output: Option<String>,
    pub inputs: usize,
    pub bytes: usize,
}

/// Minify bundled source.
pub fn minify_bundle(code: &str, bundle_name: &str) -> Result<Vec<u8>, ScriptError> {
    let session = Session::new();
    let mut out = Vec::new();
    minify(&session, TopLevelMode::Global, code.as_bytes(), &mut out).map_err(|e| {
        ScriptError::Minify {
            bundle: bundle_name.to_string(),
            message: format!("{e:?}"),
        }
    })?;
    Ok(out)
}

fn source_map(bundle: &Bundle, file_name: &str) -> Result<String, ScriptError> {
    let doc = SourceMapDoc {
        version: 3,
        file: file_name,
        sources: bundle.parts.iter().map(|p| p.source.as_str()).collect(),
        sources_content: bundle.parts.iter().map(|p| p.content.as_str()).collect(),
        names: Vec::new(),
        // Generated 0:0 → source 0, 0:0.
        mappings: if bundle.is_empty() { "" } else { "AAAA" },
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Bundle, minify and write `<dest>/<file_name>` with its map.
pub fn build_scripts(
    spec: &GlobSpec,
    dest: &Path,
    file_name: &str,
) -> Result<ScriptReport, ScriptError> {
    let bundle = Bundle::collect(spec)?;
    if bundle.is_empty() {
        return Ok(ScriptReport {
            output: None,
            inputs: 0,
            bytes: 0,
        });
    }

    let mut minified = minify_bundle(&bundle.code(), file_name)?;
    let map = source_map(&bundle, file_name)?;
    minified.extend_from_slice(format!("\n//# sourceMappingURL={file_name}.map\n").as_bytes());

    fs::create_dir_all(dest)?;
    fs::write(dest.join(file_name), &minified)?;
    fs::write(dest.join(format!("{file_name}.map")), map)?;

    Ok(ScriptReport {
        output: Some(file_name.to_string()),
        inputs: bundle.parts.len(),
        bytes: minified.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn bundle_concatenates_in_glob_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "js/b.js", "var b=2;");
        write(tmp.path(), "js/a.js", "var a=1;");
        let spec = GlobSpec::new(tmp.path(), "js/**/*.js").unwrap();

        let bundle = Bundle::collect(&spec).unwrap();

        assert_eq!(bundle.code(), "var a=1;\nvar b=2;\n");
        assert_eq!(bundle.parts[0].source, "a.js");
    }

    #[test]
    fn build_writes_minified_bundle_and_map() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "js/app.js", "function greet(name) {\n  console.log(name);\n}\n");
        let spec = GlobSpec::new(tmp.path(), "js/**/*.js").unwrap();
        let dest = tmp.path().join("out");

        let report = build_scripts(&spec, &dest, "all.js").unwrap();

        assert_eq!(report.output.as_deref(), Some("all.js"));
        assert_eq!(report.inputs, 1);
        let js = fs::read_to_string(dest.join("all.js")).unwrap();
        assert!(js.contains("greet"));
        assert!(js.ends_with("//# sourceMappingURL=all.js.map\n"));

        let map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dest.join("all.js.map")).unwrap()).unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["file"], "all.js");
        assert_eq!(map["sources"][0], "app.js");
        assert!(map["sourcesContent"][0].as_str().unwrap().contains("console.log"));
    }

    #[test]
    fn minify_failure_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "js/broken.js", "function ( {");
        let spec = GlobSpec::new(tmp.path(), "js/**/*.js").unwrap();
        let dest = tmp.path().join("out");

        let result = build_scripts(&spec, &dest, "all.js");

        assert!(matches!(result, Err(ScriptError::Minify { .. })));
        assert!(!dest.join("all.js").exists());
    }

    #[test]
    fn no_inputs_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let spec = GlobSpec::new(tmp.path(), "js/**/*.js").unwrap();
        let dest = tmp.path().join("out");

        let report = build_scripts(&spec, &dest, "all.js").unwrap();

        assert_eq!(report.output, None);
        assert!(!dest.exists());
    }
}
