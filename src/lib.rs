//! # sitepipe
//!
//! A static-site asset pipeline. Hand-edited sources under `src/` become a
//! deployable `docs/` tree: Sass is compiled and post-processed, scripts are
//! bundled and minified, markup, images and fonts are copied incrementally,
//! and cache-bust tokens in markup are stamped with the build time. A polling
//! watcher rebuilds on change and a small dev server pushes live reloads.
//!
//! # Architecture: Stages and a Task Graph
//!
//! Every transformation is a leaf stage with its own destination subtree.
//! Entry points are declarative task trees over those stages:
//!
//! ```text
//! default   parallel(scss, js) → cachebust → watch
//! bs        parallel(html, scss, js, img, fonts, icon-fonts) → cachebust → serve → watch
//! build     parallel(html, scss, js, img, fonts, icon-fonts) → cachebust
//! on change parallel(html, scss, js) → parallel(img, fonts) → cachebust
//! ```
//!
//! The heavy lifting is delegated: `grass` compiles Sass, `lightningcss`
//! prefixes, minifies and purges CSS, `minify-js` minifies scripts and
//! `notify` watches the filesystem. This crate owns the orchestration: which
//! files feed which stage, in what order, and what is skipped on the next run.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `sitepipe.toml` loading, sparse merging over stock defaults, validation |
//! | [`paths`] | Glob specs: base directory split, matching, sorted resolution |
//! | [`incremental`] | Per-stage last-success markers for passthrough copies |
//! | [`copy`] | Markup, image, font and icon-font passthrough |
//! | [`postcss`] | Stylesheet chain: prefix → minify → lint → purge, with source maps |
//! | [`style`] | Sass compilation and plain-CSS concatenation |
//! | [`script`] | Script bundling, minification, source map |
//! | [`cachebust`] | `cb=<n>` token rewrite into the output tree |
//! | [`pipeline`] | Stage identities, resolved layout, single-stage execution, events |
//! | [`graph`] | Task trees and the parallel/series scheduler |
//! | [`watch`] | Polling watcher with coalesced rebuild batches |
//! | [`server`] | Static dev server with Server-Sent Events live reload |
//! | [`output`] | CLI output formatting for pipeline events |
//! | [`logging`] | `tracing` subscriber setup for diagnostics on stderr |
//!
//! # Design Decisions
//!
//! ## Markers In Memory
//!
//! Incremental stages remember when they last succeeded for the lifetime of
//! the process only. A fresh invocation copies everything once, then the
//! watcher's rebuilds copy just what changed. Nothing is persisted next to
//! the output.
//!
//! ## Explicit Reload Handle
//!
//! The watcher and the dev server share a [`server::ReloadHandle`] instead of
//! a process-wide singleton. A change set made only of stylesheet sources
//! hot-swaps CSS; anything else reloads the page.
//!
//! ## Coalesced Rebuilds
//!
//! Changes that land while a rebuild runs are queued and folded into one
//! follow-up rebuild. Rebuilds never overlap.

pub mod cachebust;
pub mod config;
pub mod copy;
pub mod graph;
pub mod incremental;
pub mod logging;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod postcss;
pub mod script;
pub mod server;
pub mod style;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
