//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Output leads with what a reader cares about: the page link or the entry
//! id. Filesystem paths and counts follow as indented context lines or a
//! closing summary.
//!
//! # Output Format
//!
//! ## List
//!
//! ```text
//! 001 2024-02-01 10:00  travel/kyoto  [japan, rain]
//! 002 2024-01-15 09:30  hello
//! 2 entries
//! ```
//!
//! ## Pages
//!
//! ```text
//! /2024/01/index.html
//!     Template: monthly/index.html.tpl
//! /index.html
//!     Template: index.html.tpl
//! 2 pages
//! ```
//!
//! ## Regen
//!
//! ```text
//! Output map: 14 pages from 9 entries
//! Wrote /index.html
//!     → htdocs/index.html
//! Fresh /2024/01/index.html
//! Published sitemap (1 page)
//! Regenerated 1 page, 1 fresh
//! ```
//!
//! # Architecture
//!
//! Each display has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::outputs::OutputMap;
use crate::regen::{RegenEvent, RegenReport};
use crate::store::IndexRecord;
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// `1 page`, `3 pages`.
fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn entry_line(index: usize, record: &IndexRecord) -> String {
    let mut line = format!(
        "{} {}  {}",
        format_index(index),
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.id
    );
    if !record.tags.is_empty() {
        line.push_str(&format!("  [{}]", record.tags.join(", ")));
    }
    line
}

// ============================================================================
// Listing
// ============================================================================

/// Format an entry listing, newest first as the store returns it.
pub fn format_listing(records: &[IndexRecord]) -> Vec<String> {
    let mut lines: Vec<String> = records
        .iter()
        .enumerate()
        .map(|(i, r)| entry_line(i + 1, r))
        .collect();
    lines.push(plural(records.len(), "entry", "entries"));
    lines
}

pub fn print_listing(records: &[IndexRecord]) {
    for line in format_listing(records) {
        println!("{}", line);
    }
}

// ============================================================================
// Output map
// ============================================================================

/// Format every page in the output map with the template that renders it.
pub fn format_pages(map: &OutputMap, skel: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for (link, ctx) in &map.pages {
        let template = ctx.template.strip_prefix(skel).unwrap_or(&ctx.template);
        lines.push(link.clone());
        lines.push(format!("    Template: {}", template.display()));
    }
    lines.push(plural(map.len(), "page", "pages"));
    lines
}

pub fn print_pages(map: &OutputMap, skel: &Path) {
    for line in format_pages(map, skel) {
        println!("{}", line);
    }
}

// ============================================================================
// Regeneration
// ============================================================================

/// Format a single regeneration progress event as display lines.
///
/// `Publishing` marks the start of a render and is not shown; the matching
/// `Written` line follows once the page is on disk.
pub fn format_regen_event(event: &RegenEvent) -> Vec<String> {
    match event {
        RegenEvent::MapBuilt { pages, entries } => vec![format!(
            "Output map: {} from {}",
            plural(*pages, "page", "pages"),
            plural(*entries, "entry", "entries")
        )],
        RegenEvent::IndexWarning(message) => vec![format!("Warning: {message}")],
        RegenEvent::Publishing { .. } => Vec::new(),
        RegenEvent::Written { link, path } => vec![
            format!("Wrote {link}"),
            format!("    \u{2192} {}", path.display()),
        ],
        RegenEvent::Skipped { link } => vec![format!("Fresh {link}")],
        RegenEvent::Published { publisher, pages } => {
            vec![format!("Published {publisher} ({})", plural(*pages, "page", "pages"))]
        }
    }
}

/// Format the closing summary of a run.
pub fn format_report(report: &RegenReport) -> Vec<String> {
    vec![format!(
        "Regenerated {}, {} fresh",
        plural(report.written.len(), "page", "pages"),
        report.skipped
    )]
}

pub fn print_report(report: &RegenReport) {
    for line in format_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
