//! Shared test utilities for the sitepipe test suite.
//!
//! [`Project`] is a throwaway project directory with the stock layout
//! (`src/` sources, `docs/` output) and helpers to write, read and age files.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::Project;
//!
//! let project = Project::new();
//! project.write("src/index.html", "<p>hi</p>");
//! let pipeline = project.pipeline();
//! pipeline.run_stage(StageId::Html).unwrap();
//! assert_eq!(project.read("docs/index.html"), "<p>hi</p>");
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;

use crate::config::PipelineConfig;
use crate::pipeline::Pipeline;

// =========================================================================
// Project fixture
// =========================================================================

pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write `content` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel))
            .unwrap_or_else(|e| panic!("failed to read {rel}: {e}"))
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    pub fn mkdir(&self, rel: &str) {
        fs::create_dir_all(self.path(rel)).unwrap();
    }

    pub fn remove_dir(&self, rel: &str) {
        fs::remove_dir_all(self.path(rel)).unwrap();
    }

    /// Force a file's modification time.
    pub fn set_mtime(&self, rel: &str, time: SystemTime) {
        let file = fs::File::options().write(true).open(self.path(rel)).unwrap();
        file.set_modified(time).unwrap();
    }

    /// A pipeline over this project with the stock configuration.
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(PipelineConfig::default())
    }

    pub fn pipeline_with(&self, config: PipelineConfig) -> Pipeline {
        Pipeline::new(self.root(), config).unwrap()
    }
}
