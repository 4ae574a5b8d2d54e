//! Page handlers: how one template fans out into pages.
//!
//! A handler is handed a [`Scope`] (a section-restricted view of the store
//! plus the weblog's `lastn` and ignored sections) and an `emit` sink. It
//! calls `emit` once per page it wants rendered from the template, with the
//! page descriptor and the variables the renderer will see. Handlers never
//! load full entries: variables carry [`IndexRecord`]s, which the
//! regeneration engine hydrates only for pages it actually renders.
//!
//! ## Built-in handlers
//!
//! | Key | Page ids | `entries` / `entry` | prev / next |
//! |-----|----------|---------------------|-------------|
//! | `index` | `index` | newest `lastn` | month of the oldest shown entry |
//! | `daily` | `YYYY/MM/DD` | that day | adjacent days with entries |
//! | `monthly` | `YYYY/MM/index` | that month | adjacent months |
//! | `yearly` | `YYYY/index` | that year | adjacent years |
//! | `entry` | the entry id | the entry | older / newer entry |
//! | `section` | `<section>/index` | entries in the section | none |
//! | `tags` | `tags/<tag>/index` | entries with the tag | none |
//!
//! Custom handlers are registered by key in a [`HandlerRegistry`]; the
//! resolver finds them by template name.

use crate::entry;
use crate::page::Page;
use crate::store::{self, IndexRecord, Query, ScopedStore, StoreError, in_section};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A handler-provided page variable, before hydration.
#[derive(Debug, Clone, PartialEq)]
pub enum Var {
    Entry(IndexRecord),
    Entries(Vec<IndexRecord>),
    Text(String),
}

pub type Vars = BTreeMap<String, Var>;

/// What a handler gets to work with.
pub struct Scope<'a> {
    pub store: ScopedStore<'a>,
    /// Number of entries on the index page.
    pub lastn: usize,
    pub ignored: &'a [String],
}

impl Scope<'_> {
    /// Link base of every page emitted in this scope.
    pub fn path(&self) -> &str {
        self.store.path()
    }
}

pub trait Handler: Send + Sync {
    fn pages(&self, scope: &Scope<'_>, emit: &mut dyn FnMut(Page, Vars))
    -> Result<(), StoreError>;
}

impl<F> Handler for F
where
    F: Fn(&Scope<'_>, &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError> + Send + Sync,
{
    fn pages(
        &self,
        scope: &Scope<'_>,
        emit: &mut dyn FnMut(Page, Vars),
    ) -> Result<(), StoreError> {
        self(scope, emit)
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("index", index);
        registry.register("daily", daily);
        registry.register("monthly", monthly);
        registry.register("yearly", yearly);
        registry.register("entry", entry_pages);
        registry.register("section", section);
        registry.register("tags", tags);
        registry
    }

    /// Register a function handler under `key`, replacing any existing one.
    pub fn register<F>(&mut self, key: &str, handler: F)
    where
        F: Fn(&Scope<'_>, &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError>
            + Send
            + Sync
            + 'static,
    {
        self.register_handler(key, Arc::new(handler));
    }

    pub fn register_handler(&mut self, key: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert(key.to_string(), handler);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(key).cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

// =============================================================================
// Built-in handlers
// =============================================================================

fn index(scope: &Scope<'_>, emit: &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError> {
    let records = scope.store.lastn(scope.lastn)?;
    // An empty weblog has no date to offer; the epoch keeps output stable.
    let timestamp = records
        .first()
        .map_or(DateTime::<Utc>::UNIX_EPOCH.naive_utc(), |r| r.timestamp);
    let prev = records.last().map(|r| month_id(r.timestamp));
    let page = Page::new("index", timestamp)
        .with_neighbors(prev, None)
        .with_updated(scope.store.last_modified(&records));
    emit(page, entries_var(records));
    Ok(())
}

fn daily(scope: &Scope<'_>, emit: &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError> {
    let records = scope.store.find(&Query::new())?;
    let days: Vec<(NaiveDate, Vec<IndexRecord>)> =
        store::group_by_day(&records).into_iter().collect();

    for (prev, (day, entries), next) in neighbors(&days) {
        let Some(earliest) = entries.iter().map(|r| r.timestamp).min() else {
            continue;
        };
        let page = Page::new(day.format("%Y/%m/%d").to_string(), earliest)
            .with_neighbors(
                prev.map(|(d, _)| d.format("%Y/%m/%d").to_string()),
                next.map(|(d, _)| d.format("%Y/%m/%d").to_string()),
            )
            .with_updated(scope.store.last_modified(entries));
        emit(page, entries_var(entries.clone()));
    }
    Ok(())
}

fn monthly(scope: &Scope<'_>, emit: &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError> {
    let records = scope.store.find(&Query::new())?;
    let months = scope.store.get_months(&records);

    for (prev, month, next) in neighbors(&months) {
        let entries = scope.store.within(month.start, month.end)?;
        let page = Page::new(month_id(month.start), month.end)
            .with_neighbors(
                prev.map(|m| month_id(m.start)),
                next.map(|m| month_id(m.start)),
            )
            .with_updated(scope.store.last_modified(&entries));
        emit(page, entries_var(entries));
    }
    Ok(())
}

fn yearly(scope: &Scope<'_>, emit: &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError> {
    let records = scope.store.find(&Query::new())?;
    let (Some(first), Some(last)) = (
        records.iter().map(|r| r.timestamp.year()).min(),
        records.iter().map(|r| r.timestamp.year()).max(),
    ) else {
        return Ok(());
    };
    let years: Vec<i32> = (first..=last).collect();

    for (prev, &year, next) in neighbors(&years) {
        let (Some(start), Some(end)) = (year_start(year), year_start(year + 1)) else {
            continue;
        };
        let entries = scope.store.within(start, end - TimeDelta::seconds(1))?;
        let page = Page::new(format!("{year}/index"), start)
            .with_neighbors(
                prev.map(|y| format!("{y}/index")),
                next.map(|y| format!("{y}/index")),
            )
            .with_updated(scope.store.last_modified(&entries));
        emit(page, entries_var(entries));
    }
    Ok(())
}

/// One page per entry. Entries outside ignored sections are chained together;
/// each ignored section gets its own chain.
fn entry_pages(scope: &Scope<'_>, emit: &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError> {
    let mut passes = vec![scope.store.find(&Query::new())?];
    for section in scope.ignored {
        passes.push(scope.store.find(&Query::new().all().inpath(section))?);
    }

    for mut records in passes {
        // Oldest first, so `prev` is the older neighbour.
        records.reverse();
        for (prev, record, next) in neighbors(&records) {
            let rel = |r: &IndexRecord| scope.store.relative(&r.id).to_string();
            let page = Page::new(rel(record), record.timestamp)
                .with_neighbors(prev.map(rel), next.map(rel))
                .with_updated(scope.store.last_modified(std::slice::from_ref(record)));
            let mut vars = Vars::new();
            vars.insert("entry".into(), Var::Entry(record.clone()));
            emit(page, vars);
        }
    }
    Ok(())
}

fn section(scope: &Scope<'_>, emit: &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError> {
    let records = scope.store.find(&Query::new())?;
    let sections: BTreeSet<String> = records
        .iter()
        .flat_map(|r| store::ancestors(scope.store.relative(&r.id)))
        .collect();

    for prefix in sections {
        let entries: Vec<IndexRecord> = records
            .iter()
            .filter(|r| in_section(scope.store.relative(&r.id), &prefix))
            .cloned()
            .collect();
        let Some(newest) = entries.first() else {
            continue;
        };
        let page = Page::new(format!("{prefix}/index"), newest.timestamp)
            .with_updated(scope.store.last_modified(&entries));
        let mut vars = entries_var(entries);
        vars.insert("section".into(), Var::Text(prefix));
        emit(page, vars);
    }
    Ok(())
}

fn tags(scope: &Scope<'_>, emit: &mut dyn FnMut(Page, Vars)) -> Result<(), StoreError> {
    let records = scope.store.find(&Query::new())?;
    let tags: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.tags.iter().map(String::as_str))
        .collect();

    for tag in tags {
        let entries: Vec<IndexRecord> = records
            .iter()
            .filter(|r| r.tags.iter().any(|t| t == tag))
            .cloned()
            .collect();
        let Some(newest) = entries.first() else {
            continue;
        };
        let page = Page::new(format!("tags/{tag}/index"), newest.timestamp)
            .with_updated(scope.store.last_modified(&entries));
        let mut vars = entries_var(entries);
        vars.insert("tag".into(), Var::Text(tag.to_string()));
        emit(page, vars);
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn entries_var(records: Vec<IndexRecord>) -> Vars {
    let mut vars = Vars::new();
    vars.insert("entries".into(), Var::Entries(records));
    vars
}

fn month_id(t: NaiveDateTime) -> String {
    t.format("%Y/%m/index").to_string()
}

fn year_start(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1).map(entry::midnight)
}

/// Each item with the one before and after it.
fn neighbors<T>(items: &[T]) -> Vec<(Option<&T>, &T, Option<&T>)> {
    let padded: Vec<Option<&T>> = std::iter::once(None)
        .chain(items.iter().map(Some))
        .chain(std::iter::once(None))
        .collect();
    padded
        .windows(3)
        .filter_map(|w| Some((w[0], w[1]?, w[2])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::parse_timestamp;
    use crate::store::EntryStore;
    use crate::test_helpers::*;

    fn run(store: &EntryStore, key: &str, scope: &str) -> Vec<(Page, Vars)> {
        let registry = HandlerRegistry::with_builtins();
        let handler = registry.get(key).unwrap();
        let scope = Scope {
            store: store.scoped(scope),
            lastn: 2,
            ignored: store.ignored_sections(),
        };
        let mut pages = Vec::new();
        handler
            .pages(&scope, &mut |page, vars| pages.push((page, vars)))
            .unwrap();
        pages
    }

    fn page_ids(pages: &[(Page, Vars)]) -> Vec<&str> {
        pages.iter().map(|(p, _)| p.id.as_str()).collect()
    }

    fn entry_ids(vars: &Vars) -> Vec<&str> {
        match vars.get("entries") {
            Some(Var::Entries(records)) => records.iter().map(|r| r.id.as_str()).collect(),
            other => panic!("no entries var: {other:?}"),
        }
    }

    fn blog() -> (BlogFixture, EntryStore) {
        let fx = BlogFixture::new();
        fx.entry("a", "2024-01-01T09:00:00", &["rust"]);
        fx.entry("b", "2024-01-01T18:00:00", &[]);
        fx.entry("travel/c", "2024-03-10T12:00:00", &["rust", "trips"]);
        fx.entry("drafts/d", "2024-03-12T12:00:00", &[]);
        let store = EntryStore::new(fx.entries_dir(), vec!["drafts".into()]);
        (fx, store)
    }

    #[test]
    fn index_shows_lastn_and_links_oldest_month() {
        let (_fx, store) = blog();
        let pages = run(&store, "index", "");
        assert_eq!(page_ids(&pages), ["index"]);
        let (page, vars) = &pages[0];
        assert_eq!(entry_ids(vars), ["travel/c", "b"]);
        assert_eq!(page.prev.as_deref(), Some("2024/01/index"));
        assert_eq!(page.timestamp, parse_timestamp("2024-03-10T12:00:00").unwrap());
        assert!(page.updated.is_some());
    }

    #[test]
    fn index_of_empty_store_is_always_stale() {
        let fx = BlogFixture::new();
        let store = EntryStore::new(fx.entries_dir(), Vec::new());
        let pages = run(&store, "index", "");
        assert_eq!(page_ids(&pages), ["index"]);
        assert!(pages[0].0.updated.is_none());
        assert_eq!(pages[0].0.timestamp, DateTime::<Utc>::UNIX_EPOCH.naive_utc());
    }

    #[test]
    fn daily_groups_and_chains_days() {
        let (_fx, store) = blog();
        let pages = run(&store, "daily", "");
        assert_eq!(page_ids(&pages), ["2024/01/01", "2024/03/10"]);
        let (first, vars) = &pages[0];
        assert_eq!(entry_ids(vars), ["b", "a"]);
        assert_eq!(first.timestamp, parse_timestamp("2024-01-01T09:00:00").unwrap());
        assert_eq!(first.prev, None);
        assert_eq!(first.next.as_deref(), Some("2024/03/10"));
        assert_eq!(pages[1].0.prev.as_deref(), Some("2024/01/01"));
    }

    #[test]
    fn monthly_covers_empty_months() {
        let (_fx, store) = blog();
        let pages = run(&store, "monthly", "");
        assert_eq!(
            page_ids(&pages),
            ["2024/01/index", "2024/02/index", "2024/03/index"]
        );
        assert!(entry_ids(&pages[1].1).is_empty());
        assert!(pages[1].0.updated.is_none());
        assert_eq!(
            pages[0].0.timestamp,
            parse_timestamp("2024-01-31T23:59:59").unwrap()
        );
        assert_eq!(pages[1].0.prev.as_deref(), Some("2024/01/index"));
        assert_eq!(pages[1].0.next.as_deref(), Some("2024/03/index"));
    }

    #[test]
    fn yearly_spans_years() {
        let fx = BlogFixture::new();
        fx.entry("old", "2022-06-01", &[]);
        fx.entry("new", "2024-02-01", &[]);
        let store = EntryStore::new(fx.entries_dir(), Vec::new());
        let pages = run(&store, "yearly", "");
        assert_eq!(page_ids(&pages), ["2022/index", "2023/index", "2024/index"]);
        assert_eq!(pages[0].0.timestamp, parse_timestamp("2022-01-01").unwrap());
        assert_eq!(entry_ids(&pages[2].1), ["new"]);
    }

    #[test]
    fn range_handlers_on_empty_store_emit_nothing() {
        let fx = BlogFixture::new();
        let store = EntryStore::new(fx.entries_dir(), Vec::new());
        for key in ["daily", "monthly", "yearly", "entry", "section", "tags"] {
            assert!(run(&store, key, "").is_empty(), "{key}");
        }
    }

    #[test]
    fn entry_chains_default_and_ignored_passes_separately() {
        let (_fx, store) = blog();
        let pages = run(&store, "entry", "");
        assert_eq!(page_ids(&pages), ["a", "b", "travel/c", "drafts/d"]);

        let (b, vars) = &pages[1];
        assert_eq!(b.prev.as_deref(), Some("a"));
        assert_eq!(b.next.as_deref(), Some("travel/c"));
        assert!(matches!(vars.get("entry"), Some(Var::Entry(r)) if r.id == "b"));

        let (d, _) = &pages[3];
        assert_eq!(d.prev, None);
        assert_eq!(d.next, None);
    }

    #[test]
    fn entry_ids_are_relative_to_scope() {
        let (_fx, store) = blog();
        let pages = run(&store, "entry", "travel");
        assert_eq!(page_ids(&pages), ["c"]);
    }

    #[test]
    fn section_emits_each_prefix() {
        let fx = BlogFixture::new();
        fx.entry("travel/japan/kyoto", "2024-01-01", &[]);
        fx.entry("travel/lisbon", "2024-01-02", &[]);
        let store = EntryStore::new(fx.entries_dir(), Vec::new());
        let pages = run(&store, "section", "");
        assert_eq!(page_ids(&pages), ["travel/index", "travel/japan/index"]);
        assert_eq!(entry_ids(&pages[0].1), ["travel/lisbon", "travel/japan/kyoto"]);
        assert_eq!(
            pages[1].1.get("section"),
            Some(&Var::Text("travel/japan".into()))
        );
    }

    #[test]
    fn tags_group_entries() {
        let (_fx, store) = blog();
        let pages = run(&store, "tags", "");
        assert_eq!(page_ids(&pages), ["tags/rust/index", "tags/trips/index"]);
        assert_eq!(entry_ids(&pages[0].1), ["travel/c", "a"]);
    }

    #[test]
    fn register_replaces_existing_key() {
        let mut registry = HandlerRegistry::with_builtins();
        registry.register("index", |_, emit| {
            emit(Page::new("custom", entry::now()), Vars::new());
            Ok(())
        });
        let fx = BlogFixture::new();
        let store = EntryStore::new(fx.entries_dir(), Vec::new());
        let scope = Scope {
            store: store.scoped(""),
            lastn: 1,
            ignored: &[],
        };
        let mut ids = Vec::new();
        registry
            .get("index")
            .unwrap()
            .pages(&scope, &mut |p, _| ids.push(p.id))
            .unwrap();
        assert_eq!(ids, ["custom"]);
    }

    #[test]
    fn neighbors_pads_both_ends() {
        let got: Vec<_> = neighbors(&[1, 2, 3])
            .into_iter()
            .map(|(p, x, n)| (p.copied(), *x, n.copied()))
            .collect();
        assert_eq!(got, [(None, 1, Some(2)), (Some(1), 2, Some(3)), (Some(2), 3, None)]);
    }
}
