//! What happens after pages are written: publishers and sidebars.
//!
//! A [`Publisher`] is told which pages a regeneration run wrote. Publishers
//! that declare a `watch` list only run when one of the watched handler
//! groups (`entry`, `index`, `daily/index`, ...) was published.
//!
//! A [`Sidebar`] is an ordered list of providers, each contributing one named
//! HTML fragment to every rendered page.

use crate::config::SiteConfig;
use crate::page::Page;
use maud::html;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pages written by one regeneration run.
#[derive(Debug, Clone, Default)]
pub struct Published {
    /// Written pages by link.
    pub pages: BTreeMap<String, Page>,
    /// Page names (handler groups) that produced at least one page.
    pub groups: BTreeSet<String>,
}

impl Published {
    pub fn record(&mut self, group: &str, page: Page) {
        self.groups.insert(group.to_string());
        self.pages.insert(page.link.clone(), page);
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }
}

pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Page groups this publisher cares about. `None` runs it after every
    /// regeneration.
    fn watch(&self) -> Option<&[String]> {
        None
    }

    fn publish(&self, published: &Published, htdocs: &Path) -> Result<(), PublishError>;
}

/// Whether `publisher` should see `published`.
pub fn wants(publisher: &dyn Publisher, published: &Published) -> bool {
    match publisher.watch() {
        Some(groups) => groups.iter().any(|g| published.groups.contains(g)),
        None => true,
    }
}

/// Keeps `htdocs/sitemap.txt` listing every page ever published, one URL per
/// line. Each run merges its links into the existing file.
pub struct SitemapPublisher {
    base: String,
}

pub const SITEMAP_FILENAME: &str = "sitemap.txt";

impl SitemapPublisher {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

impl Publisher for SitemapPublisher {
    fn name(&self) -> &str {
        "sitemap"
    }

    fn publish(&self, published: &Published, htdocs: &Path) -> Result<(), PublishError> {
        if published.is_empty() {
            return Ok(());
        }
        let path = htdocs.join(SITEMAP_FILENAME);
        let existing = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut urls: BTreeSet<String> = existing.lines().map(str::to_string).collect();
        urls.extend(published.pages.keys().map(|link| format!("{}{link}", self.base)));
        urls.retain(|u| !u.is_empty());

        let mut out = urls.into_iter().collect::<Vec<_>>().join("\n");
        out.push('\n');
        // Unchanged sitemaps keep their mtime.
        if out == existing {
            return Ok(());
        }
        fs::create_dir_all(htdocs)?;
        fs::write(&path, out)?;
        Ok(())
    }
}

// ============================================================================
// Sidebar
// ============================================================================

/// One rendered sidebar fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct SidebarItem {
    pub name: String,
    pub html: String,
}

pub trait SidebarProvider: Send + Sync {
    fn name(&self) -> &str;
    fn html(&self, site: &SiteConfig) -> String;
}

#[derive(Clone, Default)]
pub struct Sidebar {
    providers: Vec<Arc<dyn SidebarProvider>>,
}

impl Sidebar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: Arc<dyn SidebarProvider>) {
        self.providers.push(provider);
    }

    /// Render every provider, in the order they were pushed.
    pub fn items(&self, site: &SiteConfig) -> Vec<SidebarItem> {
        self.providers
            .iter()
            .map(|p| SidebarItem {
                name: p.name().to_string(),
                html: p.html(site),
            })
            .collect()
    }
}

/// Lists the weblog's authors.
pub struct AuthorsSidebar;

impl SidebarProvider for AuthorsSidebar {
    fn name(&self) -> &str {
        "authors"
    }

    fn html(&self, site: &SiteConfig) -> String {
        html! {
            h3 { "Authors" }
            ul {
                @for (key, author) in &site.authors {
                    @let name = if author.name.is_empty() { key } else { &author.name };
                    li {
                        @if author.url.is_empty() {
                            (name)
                        } @else {
                            a href=(author.url) { (name) }
                        }
                    }
                }
            }
        }
        .into_string()
    }
}

/// A fixed fragment of HTML.
pub struct StaticSidebar {
    name: String,
    html: String,
}

impl StaticSidebar {
    pub fn new(name: &str, html: &str) -> Self {
        Self {
            name: name.to_string(),
            html: html.to_string(),
        }
    }
}

impl SidebarProvider for StaticSidebar {
    fn name(&self) -> &str {
        &self.name
    }

    fn html(&self, _site: &SiteConfig) -> String {
        self.html.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthorConfig;
    use crate::entry::parse_timestamp;
    use crate::test_helpers::{mtime, past, set_mtime};

    fn page(link: &str) -> Page {
        let mut p = Page::new(link.trim_start_matches('/').trim_end_matches(".html"), parse_timestamp("2024-01-01").unwrap());
        p.add_path("", ".html");
        p
    }

    struct Watching(Vec<String>);

    impl Publisher for Watching {
        fn name(&self) -> &str {
            "watching"
        }
        fn watch(&self) -> Option<&[String]> {
            Some(&self.0)
        }
        fn publish(&self, _: &Published, _: &Path) -> Result<(), PublishError> {
            Ok(())
        }
    }

    #[test]
    fn watch_gates_publishers() {
        let mut published = Published::default();
        published.record("entry", page("/a.html"));
        assert!(wants(&Watching(vec!["entry".into()]), &published));
        assert!(!wants(&Watching(vec!["index".into()]), &published));
        assert!(wants(&SitemapPublisher::new("/"), &published));
        assert!(wants(&SitemapPublisher::new("/"), &Published::default()));
    }

    #[test]
    fn sitemap_merges_with_existing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sitemap = SitemapPublisher::new("https://example.com/");

        let mut first = Published::default();
        first.record("entry", page("/b.html"));
        sitemap.publish(&first, tmp.path()).unwrap();

        let mut second = Published::default();
        second.record("index", page("/index.html"));
        second.record("entry", page("/a.html"));
        sitemap.publish(&second, tmp.path()).unwrap();

        let content = fs::read_to_string(tmp.path().join(SITEMAP_FILENAME)).unwrap();
        assert_eq!(
            content,
            "https://example.com/a.html\nhttps://example.com/b.html\nhttps://example.com/index.html\n"
        );
    }

    #[test]
    fn sitemap_left_alone_when_nothing_new() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sitemap = SitemapPublisher::new("https://example.com");
        let path = tmp.path().join(SITEMAP_FILENAME);

        let mut published = Published::default();
        published.record("entry", page("/a.html"));
        sitemap.publish(&published, tmp.path()).unwrap();
        set_mtime(&path, past());
        let before = mtime(&path);

        sitemap.publish(&published, tmp.path()).unwrap();
        sitemap.publish(&Published::default(), tmp.path()).unwrap();
        assert_eq!(mtime(&path), before);
    }

    #[test]
    fn empty_run_writes_no_sitemap() {
        let tmp = tempfile::TempDir::new().unwrap();
        SitemapPublisher::new("/")
            .publish(&Published::default(), tmp.path())
            .unwrap();
        assert!(!tmp.path().join(SITEMAP_FILENAME).exists());
    }

    #[test]
    fn sidebar_keeps_push_order() {
        let mut site = SiteConfig::default();
        site.authors.insert(
            "ada".into(),
            AuthorConfig {
                name: "Ada".into(),
                url: "https://ada.example".into(),
                ..Default::default()
            },
        );
        let mut sidebar = Sidebar::new();
        sidebar.push(Arc::new(StaticSidebar::new("blurb", "<p>hi</p>")));
        sidebar.push(Arc::new(AuthorsSidebar));

        let items = sidebar.items(&site);
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["blurb", "authors"]);
        assert!(items[1].html.contains(r#"<a href="https://ada.example">Ada</a>"#));
    }
}
