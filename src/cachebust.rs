//! Cache-bust token rewrite.
//!
//! Markup references assets with a query token, e.g.
//! `<link href="css/style.css?cb=1700000000000">`. This stage reads every
//! markup source, replaces each `cb=<digits>` with `cb=<stamp>` and writes
//! the result to the destination tree. Sources are never modified.
//!
//! One stamp (Unix epoch milliseconds) is taken per run and applied to every
//! token in every file, so all assets of one build share a value. Running
//! again always rewrites: the stamp moves forward with the clock.

use crate::paths::{GlobSpec, display_rel};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static CB_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cb=[0-9]+").expect("cache-bust regex must compile"));

#[derive(Error, Debug)]
pub enum CacheBustError {
    #[error("failed to resolve markup: {0}")]
    Resolve(#[source] std::io::Error),
    #[error("failed to rewrite {}: {source}", .path.display())]
    Rewrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheBustReport {
    pub stamp: i64,
    pub files: Vec<String>,
    pub tokens: usize,
}

/// Current Unix time in milliseconds.
pub fn current_stamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Replace every `cb=<digits>` in `text`. Returns the new text and the
/// number of replacements.
pub fn rewrite_tokens(text: &str, stamp: i64) -> (String, usize) {
    let count = CB_TOKEN.find_iter(text).count();
    if count == 0 {
        return (text.to_string(), 0);
    }
    let replacement = format!("cb={stamp}");
    let rewritten = CB_TOKEN.replace_all(text, replacement.as_str());
    (rewritten.into_owned(), count)
}

/// Rewrite all markup matched by `spec` into `dest` using `stamp`.
pub fn cache_bust(
    spec: &GlobSpec,
    dest: &Path,
    stamp: i64,
) -> Result<CacheBustReport, CacheBustError> {
    let files = spec.resolve().map_err(CacheBustError::Resolve)?;
    let mut report = CacheBustReport {
        stamp,
        files: Vec::with_capacity(files.len()),
        tokens: 0,
    };
    for file in &files {
        let rewrite = || -> std::io::Result<usize> {
            let text = fs::read_to_string(&file.path)?;
            let (rewritten, count) = rewrite_tokens(&text, stamp);
            let target = dest.join(&file.rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, rewritten)?;
            Ok(count)
        };
        let count = rewrite().map_err(|source| CacheBustError::Rewrite {
            path: file.path.clone(),
            source,
        })?;
        report.tokens += count;
        report.files.push(display_rel(&file.rel));
    }
    Ok(report)
}
