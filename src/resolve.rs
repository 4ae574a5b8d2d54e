//! Skeleton resolution: which handler maps a template to pages.
//!
//! A template's page name (its path under `skel/` with every extension
//! stripped) is matched against handler keys by climbing prefixes:
//!
//! ```text
//! section/travel/index   try "section_travel_index"   miss
//!                        try "section_travel"         miss
//!                        try "section"                hit → scope "travel"
//! ```
//!
//! Dashes in segments match underscores in keys (`by-tag` → `by_tag`).
//! The segments left over after the matched key, minus the file name,
//! become the store scope and the link base. When nothing matches, the
//! template renders as a single plain page under its own name.

use crate::handlers::{Handler, HandlerRegistry};
use crate::page::Page;
use chrono::NaiveDateTime;
use std::sync::Arc;

/// Outcome of resolving one page name.
pub enum Resolved {
    Handler {
        key: String,
        handler: Arc<dyn Handler>,
        /// Section the handler is restricted to; also the link base.
        scope: String,
    },
    /// No handler matched. The template becomes one [`default_page`].
    Default,
}

pub fn resolve(registry: &HandlerRegistry, page_name: &str) -> Resolved {
    let segments: Vec<&str> = page_name.split('/').filter(|s| !s.is_empty()).collect();

    for take in (1..=segments.len()).rev() {
        let key = segments[..take].join("_").replace('-', "_");
        if let Some(handler) = registry.get(&key) {
            // Leftover segments are `<scope dirs>/<file name>`.
            let rest = &segments[take..];
            let scope = match rest.split_last() {
                Some((_, dirs)) => dirs.join("/"),
                None => String::new(),
            };
            return Resolved::Handler {
                key,
                handler,
                scope,
            };
        }
    }

    Resolved::Default
}

/// The fallback page: the template's own name, stamped with `timestamp`
/// (the template's modification time), always stale.
pub fn default_page(page_name: &str, timestamp: NaiveDateTime) -> Page {
    Page::new(page_name.trim_matches('/'), timestamp)
}
