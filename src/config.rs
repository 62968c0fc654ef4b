//! Pipeline configuration.
//!
//! Handles loading, validating, and merging `sitepipe.toml`. The file is
//! optional and sparse: stock defaults are overridden key-by-key by whatever
//! the project file specifies.
//!
//! ## Path Resolution
//!
//! Every asset class is described by a [`PathMapping`]:
//!
//! - `src` is a glob relative to `source_root`
//! - `dest` is a directory relative to `output_root`
//! - `tmp` (style compilation only) is a directory relative to `source_root`
//!
//! The icon-font copy is the exception: its `src` is relative to the project
//! root, since it reads from installed third-party packages.
//!
//! ## Configuration Options
//!
//! ```toml
//! source_root = "src"
//! output_root = "docs"
//!
//! [paths.html]
//! src = "**/*.html"
//! dest = ""
//!
//! [paths.scss]
//! src = "scss/**/*.scss"
//! dest = "css"
//! tmp = "tmp/css"
//!
//! [files]
//! css = "style.css"
//! js = "all.js"
//! plain_css = "styles.css"
//!
//! [styles]
//! browsers = ["defaults"]
//! purge_content = ["**/*.html"]
//!
//! [watch]
//! interval_ms = 1000
//! poll = true
//!
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = "sitepipe.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Pipeline configuration loaded from `sitepipe.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory holding hand-edited sources, relative to the project root.
    pub source_root: String,
    /// Directory the build writes to and the dev server serves.
    pub output_root: String,
    /// Source glob → destination bindings per asset class.
    pub paths: PathsConfig,
    /// Fixed names for merged outputs.
    pub files: FileNames,
    /// Stylesheet post-processing settings.
    pub styles: StylesConfig,
    /// Change watcher settings.
    pub watch: WatchConfig,
    /// Development server settings.
    pub server: ServerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_root: "src".to_string(),
            output_root: "docs".to_string(),
            paths: PathsConfig::default(),
            files: FileNames::default(),
            styles: StylesConfig::default(),
            watch: WatchConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "watch.interval_ms must be greater than zero".into(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port must be non-zero".into(),
            ));
        }
        for (key, name) in [
            ("files.css", &self.files.css),
            ("files.js", &self.files.js),
            ("files.plain_css", &self.files.plain_css),
        ] {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(ConfigError::Validation(format!(
                    "{key} must be a plain file name, got {name:?}"
                )));
            }
        }
        let mut globs: Vec<(String, &str)> = self
            .paths
            .mappings()
            .into_iter()
            .map(|(key, m)| (format!("paths.{key}.src"), m.src.as_str()))
            .collect();
        globs.push(("paths.icon_fonts.src".into(), self.paths.icon_fonts.src.as_str()));
        for pattern in &self.styles.purge_content {
            globs.push(("styles.purge_content".into(), pattern.as_str()));
        }
        for (key, pattern) in globs {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::Validation(format!(
                    "{key}: invalid glob {pattern:?}: {e}"
                )));
            }
        }
        Ok(())
    }
}

/// Binding of a source glob to a destination directory for one asset class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathMapping {
    /// Glob relative to the source root.
    pub src: String,
    /// Destination directory relative to the output root.
    pub dest: String,
    /// Intermediate directory relative to the source root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmp: Option<String>,
}

impl PathMapping {
    fn new(src: &str, dest: &str) -> Self {
        Self {
            src: src.to_string(),
            dest: dest.to_string(),
            tmp: None,
        }
    }
}

/// Per-asset-class path mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub html: PathMapping,
    pub scss: PathMapping,
    pub css: PathMapping,
    pub js: PathMapping,
    pub img: PathMapping,
    pub fonts: PathMapping,
    pub icon_fonts: PathMapping,
}

impl PathsConfig {
    /// The mappings whose globs are relative to the source root, keyed by
    /// their config table name.
    pub fn mappings(&self) -> Vec<(&'static str, &PathMapping)> {
        vec![
            ("html", &self.html),
            ("scss", &self.scss),
            ("css", &self.css),
            ("js", &self.js),
            ("img", &self.img),
            ("fonts", &self.fonts),
        ]
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            html: PathMapping::new("**/*.html", ""),
            scss: PathMapping {
                tmp: Some("tmp/css".to_string()),
                ..PathMapping::new("scss/**/*.scss", "css")
            },
            css: PathMapping::new("css/**/*.css", "css"),
            js: PathMapping::new("js/**/*.js", "js"),
            img: PathMapping::new("assets/img/**/*", "assets/img"),
            fonts: PathMapping::new("assets/fonts/**/*", "assets/fonts"),
            icon_fonts: PathMapping::new(
                "node_modules/@fortawesome/fontawesome-free/webfonts/*",
                "assets/fonts/fontawesome/webfonts",
            ),
        }
    }
}

/// Fixed file names for merged outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileNames {
    /// Compiled stylesheet name when the Sass glob has a single entry file.
    /// With several entries each keeps its own stem.
    pub css: String,
    /// Bundled script name.
    pub js: String,
    /// Concatenated plain-stylesheet name.
    pub plain_css: String,
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            css: "style.css".to_string(),
            js: "all.js".to_string(),
            plain_css: "styles.css".to_string(),
        }
    }
}

/// Stylesheet post-processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StylesConfig {
    /// Browserslist queries that decide which vendor prefixes are inserted.
    pub browsers: Vec<String>,
    /// Globs (relative to the project root) of markup scanned when purging.
    pub purge_content: Vec<String>,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            browsers: vec!["defaults".to_string()],
            purge_content: vec!["**/*.html".to_string()],
        }
    }
}

/// Change watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Polling interval in milliseconds.
    pub interval_ms: u64,
    /// Use stat polling instead of native notifications.
    pub poll: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            poll: true,
        }
    }
}

/// Development server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PipelineConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<PipelineConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load a config file. A missing file yields the stock defaults.
pub fn load_config_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Load `sitepipe.toml` from the project root.
pub fn load_config(project_root: &Path) -> Result<PipelineConfig, ConfigError> {
    load_config_file(&project_root.join(CONFIG_FILENAME))
}

/// Returns a fully-commented stock `sitepipe.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# sitepipe configuration
# ======================
# All settings are optional. Values shown below are the defaults.
# Each key only needs to be present if you want to change it.
# Unknown keys will cause an error.

# Hand-edited sources. Globs under [paths.*] are relative to this directory.
source_root = "src"

# Build output, served by `sitepipe bs`. Destinations are relative to it.
output_root = "docs"

# ---------------------------------------------------------------------------
# Path mappings
# ---------------------------------------------------------------------------

# Markup: copied unchanged (incremental), then cache-busted.
[paths.html]
src = "**/*.html"
dest = ""

# Sass entry files (partials starting with `_` are skipped).
# `tmp` receives the compiled, unoptimized CSS.
[paths.scss]
src = "scss/**/*.scss"
dest = "css"
tmp = "tmp/css"

# Hand-written CSS, concatenated by `sitepipe run css`.
[paths.css]
src = "css/**/*.css"
dest = "css"

# Scripts, concatenated in glob order and minified.
[paths.js]
src = "js/**/*.js"
dest = "js"

[paths.img]
src = "assets/img/**/*"
dest = "assets/img"

[paths.fonts]
src = "assets/fonts/**/*"
dest = "assets/fonts"

# Third-party icon font. `src` is relative to the project root.
[paths.icon_fonts]
src = "node_modules/@fortawesome/fontawesome-free/webfonts/*"
dest = "assets/fonts/fontawesome/webfonts"

# ---------------------------------------------------------------------------
# Output names
# ---------------------------------------------------------------------------

[files]
# Used when there is one Sass entry file; several entries keep their stems.
css = "style.css"
js = "all.js"
plain_css = "styles.css"

# ---------------------------------------------------------------------------
# Stylesheet post-processing
# ---------------------------------------------------------------------------

[styles]
# Browserslist queries deciding which vendor prefixes are added.
browsers = ["defaults"]
# Markup scanned for used class and id names (relative to the project root).
purge_content = ["**/*.html"]

# ---------------------------------------------------------------------------
# Watcher
# ---------------------------------------------------------------------------

[watch]
interval_ms = 1000
# Stat polling works inside containers where change events are not delivered.
poll = true

# ---------------------------------------------------------------------------
# Development server
# ---------------------------------------------------------------------------

[server]
host = "0.0.0.0"
port = 3000
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_paths() {
        let config = PipelineConfig::default();
        assert_eq!(config.source_root, "src");
        assert_eq!(config.output_root, "docs");
        assert_eq!(config.paths.scss.src, "scss/**/*.scss");
        assert_eq!(config.paths.scss.tmp.as_deref(), Some("tmp/css"));
        assert_eq!(config.paths.js.dest, "js");
    }

    #[test]
    fn default_config_files_and_watch() {
        let config = PipelineConfig::default();
        assert_eq!(config.files.css, "style.css");
        assert_eq!(config.files.js, "all.js");
        assert_eq!(config.watch.interval_ms, 1000);
        assert!(config.watch.poll);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[server]
port = 8080
"#;
        let config: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.paths.html.src, "**/*.html");
    }

    #[test]
    fn unknown_key_rejected() {
        let result: Result<PipelineConfig, _> = toml::from_str("colour = \"red\"");
        assert!(result.is_err());
    }

    #[test]
    fn stock_config_toml_parses_to_defaults() {
        let config: PipelineConfig = toml::from_str(stock_config_toml()).unwrap();
        let default = PipelineConfig::default();
        assert_eq!(config.paths.scss, default.paths.scss);
        assert_eq!(config.paths.icon_fonts, default.paths.icon_fonts);
        assert_eq!(config.styles.browsers, default.styles.browsers);
        assert_eq!(config.server.port, default.server.port);
    }

    // =========================================================================
    // Merge tests
    // =========================================================================

    #[test]
    fn merge_keeps_sibling_keys() {
        let overlay: toml::Value =
            toml::from_str("[paths.js]\nsrc = \"scripts/*.js\"\ndest = \"js\"").unwrap();
        let config = resolve_config(Some(overlay)).unwrap();
        assert_eq!(config.paths.js.src, "scripts/*.js");
        assert_eq!(config.paths.scss.src, "scss/**/*.scss");
    }

    #[test]
    fn merge_replaces_arrays() {
        let overlay: toml::Value =
            toml::from_str("[styles]\nbrowsers = [\"last 2 versions\", \"not dead\"]").unwrap();
        let config = resolve_config(Some(overlay)).unwrap();
        assert_eq!(config.styles.browsers, vec!["last 2 versions", "not dead"]);
        assert_eq!(config.styles.purge_content, vec!["**/*.html"]);
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn zero_interval_is_invalid() {
        let mut config = PipelineConfig::default();
        config.watch.interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn output_name_with_directory_is_invalid() {
        let mut config = PipelineConfig::default();
        config.files.js = "js/all.js".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn malformed_glob_is_invalid() {
        let mut config = PipelineConfig::default();
        config.paths.img.src = "assets/[img".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("paths.img.src"));
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.output_root, "docs");
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "output_root = \"public\"\n[watch]\ninterval_ms = 250\n",
        )
        .unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.output_root, "public");
        assert_eq!(config.watch.interval_ms, 250);
        assert!(config.watch.poll);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "this is not valid toml [[[").unwrap();
        let result = load_config(tmp.path());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }
}
