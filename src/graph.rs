//! Task graph and scheduler.
//!
//! Entry points are declared as [`Task`] trees and executed by a [`Runner`]:
//!
//! ```text
//! default   parallel(scss, js) → cachebust → watch
//! bs        parallel(html, scss, js, img, fonts, icon-fonts) → cachebust → serve → watch
//! build     parallel(html, scss, js, img, fonts, icon-fonts) → cachebust
//! on change parallel(html, scss, js) → parallel(img, fonts) → cachebust
//! ```
//!
//! `Parallel` children run on the rayon pool. Every child runs to completion
//! even when a sibling fails; the group then fails with the first error in
//! declaration order. `Series` stops at the first failure. Stages write to
//! disjoint destination subtrees, so parallel children never race on output.

use crate::paths::display_rel;
use crate::pipeline::{Pipeline, PipelineEvent, StageError, StageId};
use crate::server::{DevServer, ReloadHandle, ServeError};
use crate::watch::{ChangeSet, WatchError, WatchFilter, run_watch_loop, start_watcher};
use rayon::prelude::*;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: StageId,
        #[source]
        source: StageError,
    },
    #[error("dev server: {0}")]
    Serve(#[from] ServeError),
    #[error("watcher: {0}")]
    Watch(#[from] WatchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Stage(StageId),
    Parallel(Vec<Task>),
    Series(Vec<Task>),
    /// Start the dev server on the output root and keep going.
    Serve,
    /// Watch sources and rebuild until the process ends.
    Watch,
}

fn stages(ids: &[StageId]) -> Vec<Task> {
    ids.iter().copied().map(Task::Stage).collect()
}

fn full_build() -> Task {
    Task::Parallel(stages(&[
        StageId::Html,
        StageId::Scss,
        StageId::Js,
        StageId::Img,
        StageId::Fonts,
        StageId::IconFonts,
    ]))
}

impl Task {
    /// Style and script build, cache-bust, then watch. No server.
    pub fn default_task() -> Self {
        Task::Series(vec![
            Task::Parallel(stages(&[StageId::Scss, StageId::Js])),
            Task::Stage(StageId::Cachebust),
            Task::Watch,
        ])
    }

    /// Full build, cache-bust, serve, watch.
    pub fn serve_task() -> Self {
        Task::Series(vec![
            full_build(),
            Task::Stage(StageId::Cachebust),
            Task::Serve,
            Task::Watch,
        ])
    }

    /// Full one-shot build.
    pub fn build_task() -> Self {
        Task::Series(vec![full_build(), Task::Stage(StageId::Cachebust)])
    }

    /// The batch the watcher runs for every change set.
    pub fn watch_batch() -> Self {
        Task::Series(vec![
            Task::Parallel(stages(&[StageId::Html, StageId::Scss, StageId::Js])),
            Task::Parallel(stages(&[StageId::Img, StageId::Fonts])),
            Task::Stage(StageId::Cachebust),
        ])
    }

    /// Leaf stages in declaration order.
    pub fn stages(&self) -> Vec<StageId> {
        match self {
            Task::Stage(id) => vec![*id],
            Task::Parallel(children) | Task::Series(children) => {
                children.iter().flat_map(Task::stages).collect()
            }
            Task::Serve | Task::Watch => Vec::new(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(children: &[Task], sep: &str) -> String {
            children
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(sep)
        }
        match self {
            Task::Stage(id) => write!(f, "{id}"),
            Task::Parallel(children) => write!(f, "parallel({})", join(children, ", ")),
            Task::Series(children) => write!(f, "{}", join(children, " → ")),
            Task::Serve => f.write_str("serve"),
            Task::Watch => f.write_str("watch"),
        }
    }
}

/// Executes task trees against one pipeline.
pub struct Runner {
    pipeline: Pipeline,
    reload: ReloadHandle,
    servers: Mutex<Vec<DevServer>>,
}

impl Runner {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            reload: ReloadHandle::new(),
            servers: Mutex::new(Vec::new()),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handle shared with every server this runner starts.
    pub fn reload(&self) -> &ReloadHandle {
        &self.reload
    }

    /// Servers started so far; they run until the runner is dropped.
    pub fn servers(&self) -> std::sync::MutexGuard<'_, Vec<DevServer>> {
        self.servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn run(&self, task: &Task) -> Result<(), PipelineError> {
        match task {
            Task::Stage(stage) => self
                .pipeline
                .run_stage(*stage)
                .map(|_| ())
                .map_err(|source| PipelineError::Stage {
                    stage: *stage,
                    source,
                }),
            Task::Parallel(children) => {
                let results: Vec<Result<(), PipelineError>> =
                    children.par_iter().map(|child| self.run(child)).collect();
                results.into_iter().collect()
            }
            Task::Series(children) => children.iter().try_for_each(|child| self.run(child)),
            Task::Serve => self.serve(),
            Task::Watch => self.watch(),
        }
    }

    fn serve(&self) -> Result<(), PipelineError> {
        let config = &self.pipeline.config().server;
        let root = &self.pipeline.layout().output_root;
        let server = DevServer::start(root, &config.host, config.port, self.reload.clone())?;
        self.pipeline.emit(PipelineEvent::ServerListening {
            url: server.url(),
            root: root.display().to_string(),
        });
        self.servers().push(server);
        Ok(())
    }

    /// Sources whose changes trigger a rebuild: markup, Sass, scripts,
    /// images and fonts.
    pub fn watch_filter(&self) -> WatchFilter {
        let layout = self.pipeline.layout();
        WatchFilter::new(vec![
            layout.html.spec.clone(),
            layout.scss.spec.clone(),
            layout.js.spec.clone(),
            layout.img.spec.clone(),
            layout.fonts.spec.clone(),
        ])
    }

    fn watch(&self) -> Result<(), PipelineError> {
        let filter = self.watch_filter();
        let config = &self.pipeline.config().watch;
        let interval = Duration::from_millis(config.interval_ms);
        let active = start_watcher(&filter, interval, config.poll)?;
        self.pipeline.emit(PipelineEvent::WatchStarted {
            paths: active.roots.iter().map(|r| r.display().to_string()).collect(),
            interval,
            polling: config.poll,
        });

        run_watch_loop(&active.events, &filter, |changes| {
            self.rebuild(&changes);
        });
        Ok(())
    }

    /// Run the watch batch for one change set and signal connected browsers.
    /// Returns whether the batch succeeded.
    pub fn rebuild(&self, changes: &ChangeSet) -> bool {
        let project_root = &self.pipeline.layout().project_root;
        self.pipeline.emit(PipelineEvent::ChangeDetected {
            paths: changes
                .paths()
                .map(|p| display_rel(p.strip_prefix(project_root).unwrap_or(p)))
                .collect(),
        });
        let started = Instant::now();
        let result = self.run(&Task::watch_batch());
        if let Err(e) = &result {
            warn!(error = %e, "rebuild failed");
        }
        self.pipeline.emit(PipelineEvent::RebuildFinished {
            ok: result.is_ok(),
            elapsed: started.elapsed(),
        });
        if result.is_ok() {
            self.reload.notify(changes.reload_kind());
        }
        result.is_ok()
    }
}
