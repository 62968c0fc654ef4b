//! CLI output formatting.
//!
//! Every line the CLI prints to stdout is produced here. Stages report
//! through [`PipelineEvent`]s; a printer thread in `main` turns each event
//! into lines with [`format_event`].
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! html      3 copied, 2 unchanged (5 total)  12ms
//!     index.html
//! scss      style.css  4.1 KB, 12 rules purged  + style.css.map  85ms
//!     warning style.css:14 declaration-no-important: !important in .btn
//! js        all.js  2.3 KB from 4 files  + all.js.map  40ms
//! cachebust cb=1700000000000 → 6 tokens in 5 files  3ms
//! ```
//!
//! ## Serve and watch
//!
//! ```text
//! Serving docs at http://localhost:3000
//! Watching 2 directories (polling every 1.00s)
//!     src
//!     node_modules/...
//! Changed: src/scss/_buttons.scss
//! Rebuilt in 140ms
//! ```
//!
//! ## Check
//!
//! ```text
//! scss      src/scss/**/*.scss → docs/css/style.css
//!     _vars.scss
//!     style.scss
//! img       src/assets/img/**/* → docs/assets/img (no files)
//! ```
//!
//! # Architecture
//!
//! `format_*` functions return `Vec<String>` and do no I/O, so they can be
//! tested directly. `print_lines` writes to stdout.

use crate::pipeline::{PipelineEvent, StageId, StageInputs, StageOutcome};
use std::time::Duration;

const LABEL_WIDTH: usize = 10;

fn label(stage: StageId) -> String {
    format!("{:<LABEL_WIDTH$}", stage.name())
}

fn indent(line: &str) -> String {
    format!("    {line}")
}

/// Human-readable byte count.
pub fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.2}s", elapsed.as_secs_f64())
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

// ============================================================================
// Pipeline events
// ============================================================================

/// Format one pipeline event. Events with nothing to show yield no lines.
pub fn format_event(event: &PipelineEvent) -> Vec<String> {
    match event {
        PipelineEvent::StageStarted { .. } => Vec::new(),
        PipelineEvent::StageFinished {
            stage,
            outcome,
            elapsed,
        } => format_outcome(*stage, outcome, *elapsed),
        PipelineEvent::StageFailed { stage, message } => {
            vec![format!("{}FAILED: {message}", label(*stage))]
        }
        PipelineEvent::Lint(w) => vec![indent(&format!(
            "warning {}:{} {}: {}",
            w.file, w.line, w.rule, w.message
        ))],
        PipelineEvent::ServerListening { url, root } => {
            vec![format!("Serving {root} at {url}")]
        }
        PipelineEvent::WatchStarted {
            paths,
            interval,
            polling,
        } => {
            let mode = if *polling {
                format!("polling every {}", format_elapsed(*interval))
            } else {
                "native events".to_string()
            };
            let mut lines = vec![format!(
                "Watching {} ({mode})",
                plural(paths.len(), "directory", "directories")
            )];
            lines.extend(paths.iter().map(|p| indent(p)));
            lines
        }
        PipelineEvent::ChangeDetected { paths } => {
            vec![format!("Changed: {}", paths.join(", "))]
        }
        PipelineEvent::RebuildFinished { ok, elapsed } => {
            if *ok {
                vec![format!("Rebuilt in {}", format_elapsed(*elapsed))]
            } else {
                vec![format!("Rebuild failed after {}", format_elapsed(*elapsed))]
            }
        }
    }
}

fn format_outcome(stage: StageId, outcome: &StageOutcome, elapsed: Duration) -> Vec<String> {
    let took = format_elapsed(elapsed);
    match outcome {
        StageOutcome::Copied(report) => {
            let mut lines = vec![format!("{}{}  {took}", label(stage), report.stats)];
            lines.extend(report.copied.iter().map(|f| indent(f)));
            lines
        }
        StageOutcome::Styles(report) if report.outputs.is_empty() => {
            vec![format!("{}no inputs  {took}", label(stage))]
        }
        StageOutcome::Styles(report) => report
            .outputs
            .iter()
            .map(|out| {
                let mut line = format!("{}{}  {}", label(stage), out.css, format_bytes(out.bytes));
                if out.purged > 0 {
                    line.push_str(&format!(", {} purged", plural(out.purged, "rule", "rules")));
                }
                if let Some(map) = &out.map {
                    line.push_str(&format!("  + {map}"));
                }
                line.push_str(&format!("  {took}"));
                line
            })
            .collect(),
        StageOutcome::Script(report) => match &report.output {
            Some(name) => vec![format!(
                "{}{name}  {} from {}  + {name}.map  {took}",
                label(stage),
                format_bytes(report.bytes),
                plural(report.inputs, "file", "files")
            )],
            None => vec![format!("{}no inputs  {took}", label(stage))],
        },
        StageOutcome::CacheBusted(report) => vec![format!(
            "{}cb={} → {} in {}  {took}",
            label(stage),
            report.stamp,
            plural(report.tokens, "token", "tokens"),
            plural(report.files.len(), "file", "files")
        )],
    }
}

// ============================================================================
// Check
// ============================================================================

/// Format the resolved inputs of every stage.
pub fn format_check(inventory: &[StageInputs]) -> Vec<String> {
    let mut lines = Vec::new();
    for inputs in inventory {
        let header = format!("{}{} → {}", label(inputs.stage), inputs.glob, inputs.dest);
        if inputs.files.is_empty() {
            lines.push(format!("{header} (no files)"));
        } else {
            lines.push(header);
            lines.extend(inputs.files.iter().map(|f| indent(f)));
        }
    }
    lines
}

pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
