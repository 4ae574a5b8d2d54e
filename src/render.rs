//! Output renderers and the values they render.
//!
//! A renderer turns one hydrated page into the text written to `htdocs/`.
//! Renderers are picked by the final extension of a template file
//! (`entry.html.tpl` → the `tpl` renderer) and only ever see fully loaded
//! entries: the regeneration engine hydrates handler variables into
//! [`Value`]s before calling [`Renderer::render`].
//!
//! Two renderers are built in:
//!
//! - [`HtmlRenderer`] (`tpl`): a complete HTML document built with Maud. The
//!   template file's own content is markdown, rendered as the page preamble.
//! - [`JsonRenderer`] (`json`): the page context as pretty-printed JSON, for
//!   feeds and debugging.

use crate::config::SiteConfig;
use crate::entry::Entry;
use crate::page::Page;
use crate::publish::SidebarItem;
use chrono::{NaiveDate, NaiveDateTime};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use pulldown_cmark::{Parser, html as md_html};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Failed(String),
}

/// A hydrated page variable.
#[derive(Debug, Clone)]
pub enum Value {
    Entry(Arc<Entry>),
    Entries(EntrySet),
    Text(String),
}

/// Entries handed to a page, newest first.
#[derive(Debug, Clone, Default)]
pub struct EntrySet {
    entries: Vec<Arc<Entry>>,
}

impl EntrySet {
    pub fn new(entries: Vec<Arc<Entry>>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entry>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs of entries sharing a creation date, in set order.
    pub fn by_day(&self) -> Vec<(NaiveDate, Vec<&Arc<Entry>>)> {
        let mut days: Vec<(NaiveDate, Vec<&Arc<Entry>>)> = Vec::new();
        for entry in &self.entries {
            let day = entry.created.date();
            match days.last_mut() {
                Some((d, group)) if *d == day => group.push(entry),
                _ => days.push((day, vec![entry])),
            }
        }
        days
    }

    /// Each entry with the ones before and after it in the set.
    pub fn with_neighbors(&self) -> Vec<(Option<&Arc<Entry>>, &Arc<Entry>, Option<&Arc<Entry>>)> {
        (0..self.entries.len())
            .map(|i| {
                let before = i.checked_sub(1).and_then(|j| self.entries.get(j));
                (before, &self.entries[i], self.entries.get(i + 1))
            })
            .collect()
    }
}

/// Everything a renderer sees for one page.
pub struct RenderContext<'a> {
    pub site: &'a SiteConfig,
    pub page: &'a Page,
    pub page_name: &'a str,
    /// Content of the template file.
    pub template: &'a str,
    pub values: &'a BTreeMap<String, Value>,
    pub sidebar: &'a [SidebarItem],
    /// Canonical link of every entry that has one, by entry id.
    pub permalinks: &'a BTreeMap<String, String>,
}

impl RenderContext<'_> {
    pub fn permalink(&self, entry: &Entry) -> Option<&str> {
        self.permalinks.get(&entry.id).map(String::as_str)
    }

    /// The page's single entry, if it is an entry page.
    pub fn entry(&self) -> Option<&Arc<Entry>> {
        self.values.values().find_map(|v| match v {
            Value::Entry(e) => Some(e),
            _ => None,
        })
    }
}

pub trait Renderer: Send + Sync {
    /// Template file extension this renderer handles, without the dot.
    fn extension(&self) -> &str;
    fn render(&self, ctx: &RenderContext<'_>) -> Result<String, RenderError>;
}

/// Registered renderers, keyed by extension.
#[derive(Clone, Default)]
pub struct RendererSet {
    renderers: BTreeMap<String, Arc<dyn Renderer>>,
}

impl RendererSet {
    pub fn with_builtins() -> Self {
        let mut set = Self::default();
        set.register(Arc::new(HtmlRenderer));
        set.register(Arc::new(JsonRenderer));
        set
    }

    /// Add a renderer, replacing any with the same extension.
    pub fn register(&mut self, renderer: Arc<dyn Renderer>) {
        self.renderers
            .insert(renderer.extension().to_string(), renderer);
    }

    pub fn get(&self, ext: &str) -> Option<&Arc<dyn Renderer>> {
        self.renderers.get(ext)
    }

    pub fn contains(&self, ext: &str) -> bool {
        self.renderers.contains_key(ext)
    }
}

// ============================================================================
// HTML
// ============================================================================

pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn extension(&self) -> &str {
        "tpl"
    }

    fn render(&self, ctx: &RenderContext<'_>) -> Result<String, RenderError> {
        let title = match ctx.entry() {
            Some(entry) => format!("{} - {}", entry.title, ctx.site.title),
            None => ctx.site.title.clone(),
        };

        let content = html! {
            header.site-header {
                h1 { a href=(ctx.site.link) { (ctx.site.title) } }
            }
            main {
                @if !ctx.template.trim().is_empty() {
                    div.preamble { (PreEscaped(markdown(ctx.template))) }
                }
                @for (name, value) in ctx.values {
                    @match value {
                        Value::Entry(entry) => { (render_entry(ctx, entry)) }
                        Value::Entries(set) => { (render_entries(ctx, set)) }
                        Value::Text(text) => { p class=(name) { (text) } }
                    }
                }
            }
            (pager(ctx.page))
            @if !ctx.sidebar.is_empty() {
                aside.sidebar {
                    @for item in ctx.sidebar {
                        section class=(item.name) { (PreEscaped(&item.html)) }
                    }
                }
            }
        };
        Ok(base_document(&title, content).into_string())
    }
}

fn base_document(title: &str, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
            }
            body {
                (content)
            }
        }
    }
}

fn render_entry(ctx: &RenderContext<'_>, entry: &Entry) -> Markup {
    html! {
        article.entry id=(entry.id) {
            h2 {
                @match ctx.permalink(entry) {
                    Some(link) => { a href=(link) { (entry.title) } }
                    None => { (entry.title) }
                }
            }
            @if let Some(tagline) = &entry.tagline {
                p.tagline { (tagline) }
            }
            p.meta {
                (entry.author) " · "
                time datetime=(iso(&entry.created)) { (entry.created.format("%Y-%m-%d %H:%M")) }
            }
            div.body { (PreEscaped(entry.html())) }
            @if !entry.tags.is_empty() {
                ul.tags {
                    @for tag in &entry.tags {
                        li { a href={ "/tags/" (tag) "/index.html" } { (tag) } }
                    }
                }
            }
        }
    }
}

fn render_entries(ctx: &RenderContext<'_>, set: &EntrySet) -> Markup {
    html! {
        @for (day, entries) in set.by_day() {
            section.day {
                h2.date { (day.format("%A, %B %-d, %Y")) }
                @for entry in entries {
                    (render_entry(ctx, entry))
                }
            }
        }
    }
}

fn pager(page: &Page) -> Markup {
    html! {
        @if page.prev.is_some() || page.next.is_some() {
            nav.pager {
                @if let Some(prev) = &page.prev {
                    a.prev href=(prev) rel="prev" { "« Previous" }
                }
                @if let Some(next) = &page.next {
                    a.next href=(next) rel="next" { "Next »" }
                }
            }
        }
    }
}

fn markdown(source: &str) -> String {
    let mut out = String::new();
    md_html::push_html(&mut out, Parser::new(source));
    out
}

fn iso(t: &NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S").to_string()
}

// ============================================================================
// JSON
// ============================================================================

pub struct JsonRenderer;

#[derive(Serialize)]
struct JsonPage<'a> {
    title: &'a str,
    link: &'a str,
    page_name: &'a str,
    page: &'a Page,
    values: BTreeMap<&'a str, JsonValue<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sidebar: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum JsonValue<'a> {
    Entry(JsonEntry<'a>),
    Entries(Vec<JsonEntry<'a>>),
    Text(&'a str),
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    id: &'a str,
    title: &'a str,
    author: &'a str,
    created: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<&'a str>,
    tags: &'a [String],
    summary: &'a str,
    html: &'a str,
}

impl<'a> JsonEntry<'a> {
    fn new(ctx: &'a RenderContext<'_>, entry: &'a Entry) -> Self {
        Self {
            id: &entry.id,
            title: &entry.title,
            author: &entry.author,
            created: entry.created,
            link: ctx.permalink(entry),
            tags: &entry.tags,
            summary: entry.excerpt(),
            html: entry.html(),
        }
    }
}

impl Renderer for JsonRenderer {
    fn extension(&self) -> &str {
        "json"
    }

    fn render(&self, ctx: &RenderContext<'_>) -> Result<String, RenderError> {
        let values = ctx
            .values
            .iter()
            .map(|(name, value)| {
                let v = match value {
                    Value::Entry(e) => JsonValue::Entry(JsonEntry::new(ctx, e)),
                    Value::Entries(set) => {
                        JsonValue::Entries(set.iter().map(|e| JsonEntry::new(ctx, e)).collect())
                    }
                    Value::Text(t) => JsonValue::Text(t),
                };
                (name.as_str(), v)
            })
            .collect();
        let doc = JsonPage {
            title: &ctx.site.title,
            link: &ctx.site.link,
            page_name: ctx.page_name,
            page: ctx.page,
            values,
            sidebar: ctx.sidebar.iter().map(|s| s.name.as_str()).collect(),
        };
        let mut out = serde_json::to_string_pretty(&doc)?;
        out.push('\n');
        Ok(out)
    }
}
