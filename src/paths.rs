//! Glob resolution for source trees.
//!
//! A glob such as `scss/**/*.scss` is split into a literal *base*
//! (`scss`) and a *pattern* matched against paths relative to that base
//! (`**/*.scss`). Resolution walks the base directory in file-name order and
//! keeps regular files that match. The path relative to the base is what
//! destinations preserve: `scss/pages/home.scss` lands at
//! `<dest>/pages/home.css`.
//!
//! A base directory that does not exist resolves to no files. Wildcard globs
//! with no match are an empty input, not an error. Wildcards never match a
//! leading dot, so `.DS_Store`, `.gitkeep` and files under hidden directories
//! are left out unless the glob names them literally.

use glob::{MatchOptions, Pattern, PatternError};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// A glob split into its literal base directory and the remaining pattern.
#[derive(Debug, Clone)]
pub struct GlobSpec {
    base: PathBuf,
    pattern: Pattern,
    raw: String,
}

/// A file matched by a [`GlobSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// Path relative to the glob base.
    pub rel: PathBuf,
    pub modified: SystemTime,
}

fn has_magic(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

impl GlobSpec {
    /// Build a spec from a glob relative to `root`.
    pub fn new(root: &Path, glob: &str) -> Result<Self, PatternError> {
        let components: Vec<&str> = glob
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        let split = components
            .iter()
            .position(|c| has_magic(c))
            // A literal path: its parent is the base, the file name the pattern.
            .unwrap_or(components.len().saturating_sub(1));

        let mut base = root.to_path_buf();
        for c in &components[..split] {
            base.push(c);
        }
        let rest = components[split..].join("/");
        Ok(Self {
            base,
            pattern: Pattern::new(&rest)?,
            raw: glob.to_string(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The part of the glob below the base.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// The glob as written in the config.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `path` lies under the base and matches the pattern.
    pub fn matches(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.base) {
            Ok(rel) => self.pattern.matches_path_with(rel, MATCH_OPTIONS),
            Err(_) => false,
        }
    }

    /// Resolve all matching regular files, sorted by path.
    pub fn resolve(&self) -> io::Result<Vec<SourceFile>> {
        if !self.base.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.base).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.base) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            if !self.pattern.matches_path_with(&rel, MATCH_OPTIONS) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            files.push(SourceFile {
                path: entry.path().to_path_buf(),
                rel,
                modified,
            });
        }
        Ok(files)
    }
}

/// Render a relative path with forward slashes for display and source maps.
pub fn display_rel(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    fn rels(files: &[SourceFile]) -> Vec<String> {
        files.iter().map(|f| display_rel(&f.rel)).collect()
    }

    #[test]
    fn splits_base_at_first_wildcard() {
        let spec = GlobSpec::new(Path::new("/p/src"), "assets/img/**/*").unwrap();
        assert_eq!(spec.base(), Path::new("/p/src/assets/img"));
        assert_eq!(spec.as_str(), "assets/img/**/*");
    }

    #[test]
    fn literal_glob_uses_parent_as_base() {
        let spec = GlobSpec::new(Path::new("/p"), "js/main.js").unwrap();
        assert_eq!(spec.base(), Path::new("/p/js"));
        assert!(spec.matches(Path::new("/p/js/main.js")));
        assert!(!spec.matches(Path::new("/p/js/other.js")));
    }

    #[test]
    fn resolves_recursive_glob_in_name_order() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "js/b.js");
        touch(tmp.path(), "js/a.js");
        touch(tmp.path(), "js/lib/c.js");
        touch(tmp.path(), "js/notes.txt");

        let spec = GlobSpec::new(tmp.path(), "js/**/*.js").unwrap();
        let files = spec.resolve().unwrap();
        assert_eq!(rels(&files), vec!["a.js", "b.js", "lib/c.js"]);
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "fonts/a.woff2");
        touch(tmp.path(), "fonts/sub/b.woff2");

        let spec = GlobSpec::new(tmp.path(), "fonts/*").unwrap();
        assert_eq!(rels(&spec.resolve().unwrap()), vec!["a.woff2"]);
    }

    #[test]
    fn missing_base_resolves_to_nothing() {
        let tmp = TempDir::new().unwrap();
        let spec = GlobSpec::new(tmp.path(), "node_modules/pkg/*").unwrap();
        assert!(spec.resolve().unwrap().is_empty());
    }

    #[test]
    fn wildcards_skip_dotfiles() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "img/logo.png");
        touch(tmp.path(), "img/.DS_Store");
        touch(tmp.path(), "img/.cache/thumb.png");

        let spec = GlobSpec::new(tmp.path(), "img/**/*").unwrap();
        assert_eq!(rels(&spec.resolve().unwrap()), vec!["logo.png"]);
        assert!(!spec.matches(&tmp.path().join("img/.logo.png.swp")));
        let literal = GlobSpec::new(tmp.path(), "img/.*").unwrap();
        assert!(literal.matches(&tmp.path().join("img/.DS_Store")));
    }

    #[test]
    fn matches_rejects_paths_outside_base() {
        let spec = GlobSpec::new(Path::new("/p/src"), "scss/**/*.scss").unwrap();
        assert!(spec.matches(Path::new("/p/src/scss/style.scss")));
        assert!(spec.matches(Path::new("/p/src/scss/parts/_a.scss")));
        assert!(!spec.matches(Path::new("/p/src/css/style.scss")));
        assert!(!spec.matches(Path::new("/p/src/scss/style.css")));
    }
}
