//! Change watcher.
//!
//! Watches the distinct glob bases of the markup, Sass, script, image and
//! font mappings and hands every batch of relevant changes to a callback.
//! Polling is the default (`watch.poll = true`), which behaves the same on
//! network drives, containers and editors that replace files on save.
//!
//! ## Coalescing
//!
//! The loop blocks for the first event, drains everything already queued,
//! then runs the callback once. Events that arrive while the callback runs
//! stay in the channel and are drained together on the next turn, so any
//! number of changes during a run produce exactly one follow-up run and runs
//! never overlap.
//!
//! Watcher errors (a path vanishing mid-poll, permission errors) are logged
//! and the loop keeps going. The poll watcher compares file contents as well
//! as mtimes, so repeated saves within one second are each seen.

use crate::paths::GlobSpec;
use crate::server::ReloadKind;
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to initialize file watcher: {0}")]
    Init(#[from] notify::Error),
    #[error("none of the watched directories exist")]
    NothingToWatch,
}

pub type EventResult = notify::Result<Event>;

/// Source paths changed since the last run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    paths: BTreeSet<PathBuf>,
}

impl ChangeSet {
    pub fn insert(&mut self, path: PathBuf) {
        self.paths.insert(path);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    /// True when every changed path is a stylesheet source.
    pub fn is_style_only(&self) -> bool {
        !self.is_empty()
            && self.paths.iter().all(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| matches!(e, "scss" | "sass" | "css"))
            })
    }

    /// How connected browsers should react to this change set.
    pub fn reload_kind(&self) -> ReloadKind {
        if self.is_style_only() {
            ReloadKind::Css
        } else {
            ReloadKind::Full
        }
    }
}

/// The globs whose files trigger a rebuild.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    specs: Vec<GlobSpec>,
}

impl WatchFilter {
    pub fn new(specs: Vec<GlobSpec>) -> Self {
        Self { specs }
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.specs.iter().any(|spec| spec.matches(path))
    }

    /// Distinct directories to register, without nested duplicates.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut bases: Vec<&Path> = self.specs.iter().map(GlobSpec::base).collect();
        bases.sort();
        bases.dedup();
        let mut roots: Vec<PathBuf> = Vec::new();
        for base in bases {
            if !roots.iter().any(|r| base.starts_with(r)) {
                roots.push(base.to_path_buf());
            }
        }
        roots
    }
}

/// Fold one notify result into `changes`.
fn absorb(result: EventResult, filter: &WatchFilter, changes: &mut ChangeSet) {
    match result {
        Ok(event) => {
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            for path in event.paths {
                if filter.matches(&path) {
                    changes.insert(path);
                } else {
                    debug!(path = %path.display(), "ignored change");
                }
            }
        }
        Err(e) => warn!(error = %e, "watch error"),
    }
}

/// Run `on_batch` once per coalesced batch of relevant changes. Returns when
/// the event channel closes.
pub fn run_watch_loop<F>(rx: &Receiver<EventResult>, filter: &WatchFilter, mut on_batch: F)
where
    F: FnMut(ChangeSet),
{
    while let Ok(first) = rx.recv() {
        let mut changes = ChangeSet::default();
        absorb(first, filter, &mut changes);
        loop {
            match rx.try_recv() {
                Ok(next) => absorb(next, filter, &mut changes),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !changes.is_empty() {
                        on_batch(changes);
                    }
                    return;
                }
            }
        }
        if !changes.is_empty() {
            on_batch(changes);
        }
    }
}

/// A registered watcher and the channel it reports into.
pub struct ActiveWatcher {
    watcher: Box<dyn Watcher + Send>,
    pub events: Receiver<EventResult>,
    pub roots: Vec<PathBuf>,
}

impl ActiveWatcher {
    /// Separate the watcher from its event channel. Dropping the returned
    /// watcher stops it and closes the channel, which ends a
    /// [`run_watch_loop`] reading from it.
    pub fn into_parts(self) -> (Box<dyn Watcher + Send>, Receiver<EventResult>) {
        (self.watcher, self.events)
    }
}

/// Create a watcher over `filter`'s roots. Roots that are missing or cannot
/// be registered are logged and skipped.
pub fn start_watcher(
    filter: &WatchFilter,
    interval: Duration,
    poll: bool,
) -> Result<ActiveWatcher, WatchError> {
    let (tx, rx) = channel();
    let mut watcher: Box<dyn Watcher + Send> = if poll {
        // Polled mtimes have whole-second resolution; hashing contents
        // catches a second save within the same second.
        let config = Config::default()
            .with_poll_interval(interval)
            .with_compare_contents(true);
        Box::new(PollWatcher::new(tx, config)?)
    } else {
        Box::new(RecommendedWatcher::new(tx, Config::default())?)
    };

    let mut roots = Vec::new();
    for root in filter.roots() {
        // The poll watcher accepts a missing path without an error.
        if !root.is_dir() {
            warn!(path = %root.display(), "not a directory, skipping");
            continue;
        }
        match watcher.watch(&root, RecursiveMode::Recursive) {
            Ok(()) => {
                debug!(path = %root.display(), "watching");
                roots.push(root);
            }
            Err(e) => warn!(path = %root.display(), error = %e, "cannot watch, skipping"),
        }
    }
    if roots.is_empty() {
        return Err(WatchError::NothingToWatch);
    }

    Ok(ActiveWatcher {
        watcher,
        events: rx,
        roots,
    })
}
