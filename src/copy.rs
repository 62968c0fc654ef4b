//! Passthrough stages: markup, images, fonts and the icon-font copy.
//!
//! Files are copied byte-for-byte, preserving their path relative to the glob
//! base. With a marker only files modified after it are copied; the icon-font
//! copy passes no marker and always copies everything.
//!
//! There is no mirror semantics: destination files whose source disappeared
//! are left alone. A failing copy stops the stage immediately. Files copied
//! earlier in the same run stay on disk.

use crate::incremental::{CopyStats, is_changed};
use crate::paths::{GlobSpec, display_rel};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("failed to resolve {glob}: {source}")]
    Resolve {
        glob: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to copy {}: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one passthrough run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Copied files, relative to the destination directory.
    pub copied: Vec<String>,
    pub stats: CopyStats,
}

/// Copy files matched by `spec` into `dest`, skipping those not modified
/// after `since`.
pub fn copy_changed(
    spec: &GlobSpec,
    dest: &Path,
    since: Option<SystemTime>,
) -> Result<CopyReport, CopyError> {
    let files = spec.resolve().map_err(|source| CopyError::Resolve {
        glob: spec.as_str().to_string(),
        source,
    })?;

    let mut report = CopyReport::default();
    for file in &files {
        if !is_changed(file, since) {
            report.stats.skip();
            continue;
        }
        let target = dest.join(&file.rel);
        copy_file(&file.path, &target).map_err(|source| CopyError::Copy {
            path: file.path.clone(),
            source,
        })?;
        debug!(from = %file.path.display(), to = %target.display(), "copied");
        report.copied.push(display_rel(&file.rel));
        report.stats.copy();
    }
    Ok(report)
}

fn copy_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    Ok(())
}
