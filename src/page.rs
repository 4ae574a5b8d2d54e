//! Page descriptors: one output page as a handler sees it.
//!
//! Handlers emit pages with `id`, `prev` and `next` set to page ids relative
//! to the handler's scope (`2024/01/05`, `travel/kyoto`). The output map
//! builder then calls [`Page::add_path`] to turn them into site links by
//! prefixing the scope's base path and appending the template's output
//! extension:
//!
//! ```text
//! id "2024/01/05", base "travel", ext ".html"  →  link "/travel/2024/01/05.html"
//! ```

use chrono::NaiveDateTime;
use serde::Serialize;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// Page id relative to its scope.
    pub id: String,
    /// Site-absolute link, set by [`Page::add_path`].
    pub link: String,
    pub prev: Option<String>,
    pub next: Option<String>,
    /// Earliest date relevant to the page's content.
    pub timestamp: NaiveDateTime,
    /// Latest modification among the page's inputs. `None` forces the page
    /// to be rebuilt on every run.
    #[serde(skip)]
    pub updated: Option<SystemTime>,
}

impl Page {
    pub fn new(id: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            id: id.into(),
            link: String::new(),
            prev: None,
            next: None,
            timestamp,
            updated: None,
        }
    }

    pub fn with_neighbors(mut self, prev: Option<String>, next: Option<String>) -> Self {
        self.prev = prev;
        self.next = next;
        self
    }

    pub fn with_updated(mut self, updated: Option<SystemTime>) -> Self {
        self.updated = updated;
        self
    }

    /// Resolve `id`, `prev` and `next` into links under `base`, each ending
    /// in `ext` (which includes its leading dot).
    pub fn add_path(&mut self, base: &str, ext: &str) {
        self.link = link_for(base, &self.id, ext);
        self.prev = self.prev.as_deref().map(|p| link_for(base, p, ext));
        self.next = self.next.as_deref().map(|n| link_for(base, n, ext));
    }
}

/// `/<base>/<id><ext>`, with empty segments dropped.
pub fn link_for(base: &str, id: &str, ext: &str) -> String {
    let path = [base.trim_matches('/'), id.trim_matches('/')]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{path}{ext}")
}
