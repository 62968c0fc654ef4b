//! Last-successful-run markers for incremental passthrough stages.
//!
//! Passthrough stages (markup, images, fonts) copy only files modified since
//! the start of the stage's last successful run. This module keeps that
//! timestamp per stage.
//!
//! # Design
//!
//! - **In-memory only.** Markers live for the lifetime of the process; a
//!   fresh `sitepipe` invocation copies everything once. There is no cache
//!   file to go stale or to commit by accident alongside `docs/`.
//! - **Keyed by stage identity.** Two stages reading the same tree keep
//!   independent markers.
//! - **Advanced on success only.** [`RunMarkers::record`] is called by the
//!   pipeline with the run's start time after a stage returns `Ok`. Files
//!   saved while the run was copying are newer than that and go out on the
//!   next run. A failed run leaves the previous marker in place so the
//!   files it failed on are retried next time.
//!
//! Comparison is strict: a file is copied when its modification time is
//! newer than the marker.

use crate::paths::SourceFile;
use crate::pipeline::StageId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::SystemTime;

/// Per-stage run start timestamps, shared across parallel stages.
#[derive(Debug, Default)]
pub struct RunMarkers {
    markers: Mutex<HashMap<StageId, SystemTime>>,
}

impl RunMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completion time of the stage's last successful run, if any.
    pub fn since(&self, stage: StageId) -> Option<SystemTime> {
        self.markers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&stage)
            .copied()
    }

    /// Record a successful run that started at `started_at`.
    pub fn record(&self, stage: StageId, started_at: SystemTime) {
        self.markers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(stage, started_at);
    }
}

/// Whether a source file must be processed given the stage's marker.
pub fn is_changed(file: &SourceFile, since: Option<SystemTime>) -> bool {
    match since {
        Some(marker) => file.modified > marker,
        None => true,
    }
}

/// Summary of an incremental copy run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CopyStats {
    pub copied: u32,
    pub unchanged: u32,
}

impl CopyStats {
    pub fn copy(&mut self) {
        self.copied += 1;
    }

    pub fn skip(&mut self) {
        self.unchanged += 1;
    }

    pub fn total(&self) -> u32 {
        self.copied + self.unchanged
    }
}

impl fmt::Display for CopyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unchanged > 0 {
            write!(
                f,
                "{} copied, {} unchanged ({} total)",
                self.copied,
                self.unchanged,
                self.total()
            )
        } else {
            write!(f, "{} copied", self.copied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn file_at(modified: SystemTime) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/src/index.html"),
            rel: PathBuf::from("index.html"),
            modified,
        }
    }

    // =========================================================================
    // RunMarkers
    // =========================================================================

    #[test]
    fn no_marker_before_first_run() {
        let markers = RunMarkers::new();
        assert_eq!(markers.since(StageId::Html), None);
    }

    #[test]
    fn record_is_per_stage() {
        let markers = RunMarkers::new();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        markers.record(StageId::Img, t);
        assert_eq!(markers.since(StageId::Img), Some(t));
        assert_eq!(markers.since(StageId::Fonts), None);
    }

    #[test]
    fn record_overwrites_previous_marker() {
        let markers = RunMarkers::new();
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let t2 = SystemTime::UNIX_EPOCH + Duration::from_secs(200);
        markers.record(StageId::Html, t1);
        markers.record(StageId::Html, t2);
        assert_eq!(markers.since(StageId::Html), Some(t2));
    }

    // =========================================================================
    // Change detection
    // =========================================================================

    #[test]
    fn everything_changed_without_marker() {
        assert!(is_changed(&file_at(SystemTime::UNIX_EPOCH), None));
    }

    #[test]
    fn newer_file_is_changed() {
        let marker = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let file = file_at(marker + Duration::from_millis(1));
        assert!(is_changed(&file, Some(marker)));
    }

    #[test]
    fn file_at_marker_is_unchanged() {
        let marker = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        assert!(!is_changed(&file_at(marker), Some(marker)));
        assert!(!is_changed(
            &file_at(marker - Duration::from_secs(1)),
            Some(marker)
        ));
    }

    // =========================================================================
    // CopyStats
    // =========================================================================

    #[test]
    fn copy_stats_display_with_unchanged() {
        let s = CopyStats {
            copied: 2,
            unchanged: 5,
        };
        assert_eq!(format!("{}", s), "2 copied, 5 unchanged (7 total)");
    }

    #[test]
    fn copy_stats_display_cold_start() {
        let mut s = CopyStats::default();
        s.copy();
        s.copy();
        assert_eq!(format!("{}", s), "2 copied");
    }
}
