//! Stage registry and execution context.
//!
//! A [`Pipeline`] owns everything a stage needs: the resolved path layout,
//! the stylesheet chain, the incremental run markers and an optional event
//! channel for progress output. [`Pipeline::run_stage`] runs one leaf stage;
//! composition (parallel/series) lives in [`crate::graph`].
//!
//! Each stage writes to its own destination subtree:
//!
//! | Stage | Writes |
//! |-------|--------|
//! | `html`, `cachebust` | `<output_root>/` (markup only) |
//! | `scss`, `css` | `<output_root>/css/` and the intermediate dir |
//! | `js` | `<output_root>/js/` |
//! | `img` | `<output_root>/assets/img/` |
//! | `fonts`, `icon-fonts` | `<output_root>/assets/fonts/` |

use crate::cachebust::{CacheBustError, CacheBustReport, cache_bust, current_stamp};
use crate::config::{PathMapping, PipelineConfig};
use crate::copy::{CopyError, CopyReport, copy_changed};
use crate::incremental::RunMarkers;
use crate::paths::{GlobSpec, display_rel};
use crate::postcss::{Chain, ChainError, LintWarning, MarkupCorpus};
use crate::script::{ScriptError, ScriptReport, build_scripts};
use crate::style::{StyleError, StyleReport, compile_scss, concat_css};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, instrument};

/// Identity of a leaf stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum StageId {
    Html,
    Scss,
    Css,
    Js,
    Img,
    Fonts,
    IconFonts,
    Cachebust,
}

impl StageId {
    pub const ALL: [StageId; 8] = [
        StageId::Html,
        StageId::Scss,
        StageId::Css,
        StageId::Js,
        StageId::Img,
        StageId::Fonts,
        StageId::IconFonts,
        StageId::Cachebust,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageId::Html => "html",
            StageId::Scss => "scss",
            StageId::Css => "css",
            StageId::Js => "js",
            StageId::Img => "img",
            StageId::Fonts => "fonts",
            StageId::IconFonts => "icon-fonts",
            StageId::Cachebust => "cachebust",
        }
    }

    /// Stages whose marker filters unchanged inputs.
    pub fn is_incremental(self) -> bool {
        matches!(self, StageId::Html | StageId::Img | StageId::Fonts)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Copy(#[from] CopyError),
    #[error(transparent)]
    Style(#[from] StyleError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    CacheBust(#[from] CacheBustError),
    #[error(transparent)]
    Corpus(#[from] ChainError),
}

/// What a successful stage produced.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Copied(CopyReport),
    Styles(StyleReport),
    Script(ScriptReport),
    CacheBusted(CacheBustReport),
}

/// Progress events for the CLI printer.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted {
        stage: StageId,
    },
    StageFinished {
        stage: StageId,
        outcome: StageOutcome,
        elapsed: Duration,
    },
    StageFailed {
        stage: StageId,
        message: String,
    },
    Lint(LintWarning),
    ServerListening {
        url: String,
        root: String,
    },
    WatchStarted {
        paths: Vec<String>,
        interval: Duration,
        polling: bool,
    },
    ChangeDetected {
        paths: Vec<String>,
    },
    RebuildFinished {
        ok: bool,
        elapsed: Duration,
    },
}

/// A path mapping resolved against the project root.
#[derive(Debug, Clone)]
pub struct ResolvedMapping {
    pub spec: GlobSpec,
    pub dest: PathBuf,
    pub tmp: Option<PathBuf>,
}

impl ResolvedMapping {
    fn new(
        src_root: &Path,
        out_root: &Path,
        mapping: &PathMapping,
    ) -> Result<Self, glob::PatternError> {
        Ok(Self {
            spec: GlobSpec::new(src_root, &mapping.src)?,
            dest: out_root.join(&mapping.dest),
            tmp: mapping.tmp.as_ref().map(|t| src_root.join(t)),
        })
    }
}

/// All mappings resolved to concrete directories.
#[derive(Debug, Clone)]
pub struct Layout {
    pub project_root: PathBuf,
    pub output_root: PathBuf,
    pub html: ResolvedMapping,
    pub scss: ResolvedMapping,
    pub css: ResolvedMapping,
    pub js: ResolvedMapping,
    pub img: ResolvedMapping,
    pub fonts: ResolvedMapping,
    pub icon_fonts: ResolvedMapping,
}

impl Layout {
    pub fn resolve(
        project_root: &Path,
        config: &PipelineConfig,
    ) -> Result<Self, glob::PatternError> {
        let src = project_root.join(&config.source_root);
        let out = project_root.join(&config.output_root);
        let paths = &config.paths;
        Ok(Self {
            project_root: project_root.to_path_buf(),
            output_root: out.clone(),
            html: ResolvedMapping::new(&src, &out, &paths.html)?,
            scss: ResolvedMapping::new(&src, &out, &paths.scss)?,
            css: ResolvedMapping::new(&src, &out, &paths.css)?,
            js: ResolvedMapping::new(&src, &out, &paths.js)?,
            img: ResolvedMapping::new(&src, &out, &paths.img)?,
            fonts: ResolvedMapping::new(&src, &out, &paths.fonts)?,
            icon_fonts: ResolvedMapping::new(project_root, &out, &paths.icon_fonts)?,
        })
    }

    /// The mapping a stage reads from.
    pub fn mapping(&self, stage: StageId) -> &ResolvedMapping {
        match stage {
            StageId::Html | StageId::Cachebust => &self.html,
            StageId::Scss => &self.scss,
            StageId::Css => &self.css,
            StageId::Js => &self.js,
            StageId::Img => &self.img,
            StageId::Fonts => &self.fonts,
            StageId::IconFonts => &self.icon_fonts,
        }
    }
}

/// Resolved inputs of one stage, for `sitepipe check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInputs {
    pub stage: StageId,
    pub glob: String,
    pub dest: String,
    pub files: Vec<String>,
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("invalid glob: {0}")]
    Glob(#[from] glob::PatternError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Execution context shared by every stage of one process.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    layout: Layout,
    chain: Chain,
    markers: RunMarkers,
    events: Option<Sender<PipelineEvent>>,
}

impl Pipeline {
    pub fn new(project_root: &Path, config: PipelineConfig) -> Result<Self, SetupError> {
        let layout = Layout::resolve(project_root, &config)?;
        let chain = Chain::standard(&config.styles.browsers)?;
        Ok(Self {
            config,
            layout,
            chain,
            markers: RunMarkers::new(),
            events: None,
        })
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn markers(&self) -> &RunMarkers {
        &self.markers
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            // The printer going away must not fail the build.
            let _ = tx.send(event);
        }
    }

    /// Run one leaf stage, emitting start/finish events and advancing the
    /// stage's marker on success.
    ///
    /// The marker is the time the run started, so a file saved while the
    /// stage was copying is newer than the marker and goes out next run.
    #[instrument(skip_all, fields(stage = %stage))]
    pub fn run_stage(&self, stage: StageId) -> Result<StageOutcome, StageError> {
        self.emit(PipelineEvent::StageStarted { stage });
        let run_started_at = SystemTime::now();
        let started = Instant::now();
        match self.execute(stage) {
            Ok(outcome) => {
                if stage.is_incremental() {
                    self.markers.record(stage, run_started_at);
                }
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "stage finished");
                self.emit(PipelineEvent::StageFinished {
                    stage,
                    outcome: outcome.clone(),
                    elapsed: started.elapsed(),
                });
                if let StageOutcome::Styles(report) = &outcome {
                    for warning in &report.warnings {
                        self.emit(PipelineEvent::Lint(warning.clone()));
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                self.emit(PipelineEvent::StageFailed {
                    stage,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn execute(&self, stage: StageId) -> Result<StageOutcome, StageError> {
        let mapping = self.layout.mapping(stage);
        let files = &self.config.files;
        let outcome = match stage {
            StageId::Html | StageId::Img | StageId::Fonts => StageOutcome::Copied(copy_changed(
                &mapping.spec,
                &mapping.dest,
                self.markers.since(stage),
            )?),
            StageId::IconFonts => {
                StageOutcome::Copied(copy_changed(&mapping.spec, &mapping.dest, None)?)
            }
            StageId::Scss => StageOutcome::Styles(compile_scss(
                &mapping.spec,
                &mapping.dest,
                mapping.tmp.as_deref(),
                &files.css,
                &self.chain,
                &self.corpus()?,
            )?),
            StageId::Css => StageOutcome::Styles(concat_css(
                &mapping.spec,
                &mapping.dest,
                &files.plain_css,
                &self.chain,
                &self.corpus()?,
            )?),
            StageId::Js => {
                StageOutcome::Script(build_scripts(&mapping.spec, &mapping.dest, &files.js)?)
            }
            StageId::Cachebust => StageOutcome::CacheBusted(cache_bust(
                &mapping.spec,
                &mapping.dest,
                current_stamp(),
            )?),
        };
        Ok(outcome)
    }

    /// Every stage's currently matching inputs. Writes nothing.
    pub fn inventory(&self) -> std::io::Result<Vec<StageInputs>> {
        let root = &self.layout.project_root;
        let shown = |p: &Path| display_rel(p.strip_prefix(root).unwrap_or(p));
        let mut inventory = Vec::new();
        for stage in StageId::ALL {
            let mapping = self.layout.mapping(stage);
            let dest = match stage {
                StageId::Js => mapping.dest.join(&self.config.files.js),
                StageId::Css => mapping.dest.join(&self.config.files.plain_css),
                StageId::Scss => mapping.dest.join(&self.config.files.css),
                _ => mapping.dest.clone(),
            };
            inventory.push(StageInputs {
                stage,
                glob: shown(&mapping.spec.base().join(mapping.spec.pattern())),
                dest: shown(&dest),
                files: mapping
                    .spec
                    .resolve()?
                    .iter()
                    .map(|f| display_rel(&f.rel))
                    .collect(),
            });
        }
        Ok(inventory)
    }

    fn corpus(&self) -> Result<MarkupCorpus, ChainError> {
        MarkupCorpus::collect(&self.layout.project_root, &self.config.styles.purge_content)
    }
}
