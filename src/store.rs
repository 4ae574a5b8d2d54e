//! The entry store: a directory of entry records plus a sorted index.
//!
//! # Index
//!
//! Queries never open entry files. They run against an in-memory index of
//! [`IndexRecord`]s, sorted newest-first, that carries just enough to filter
//! and group: the id, the creation timestamp, the tags, and the
//! modification bookkeeping used for staleness checks.
//!
//! The index is persisted to `entries/.index.json` and reconciled against a
//! directory scan before first use and on every [`EntryStore::refresh`]:
//!
//! 1. A file whose mtime matches its record is trusted without being opened.
//! 2. A file whose mtime moved but whose SHA-256 digest did not (a `touch`,
//!    a `git checkout`) keeps its record; only the observed mtime is updated.
//! 3. Anything else is parsed and gets a fresh record.
//! 4. Records whose file is gone are dropped.
//!
//! A missing, corrupt, or wrong-version index file is treated as empty and
//! rewritten. That is reported as an [`IndexWarning`], never an error.
//!
//! # Entry cache
//!
//! [`EntryStore::load_entry`] hydrates full entries and keeps them for the
//! lifetime of the store. Each id has its own slot lock so parallel renders
//! hydrating the same entry parse it once.

use crate::entry::{self, ENTRY_EXTENSION, Entry, EntryError};
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use walkdir::WalkDir;

/// Name of the persisted index within the entries directory.
const INDEX_FILENAME: &str = ".index.json";

/// Version of the index file format. Bump this to discard all existing
/// indexes when the record layout changes.
const INDEX_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("invalid entry id `{0}`")]
    InvalidId(String),
    #[error("malformed entry {id}: {source}")]
    Parse {
        id: String,
        #[source]
        source: EntryError,
    },
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("walking {0}")]
    Walk(#[from] walkdir::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A lightweight stand-in for an entry: what queries and handlers work with
/// before anything is hydrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    /// The entry's `created` time.
    pub timestamp: NaiveDateTime,
    /// When the record's content last changed.
    pub modified: SystemTime,
    /// Last observed file mtime. Differs from `modified` after a touch that
    /// left the content alone.
    pub mtime: SystemTime,
    /// SHA-256 of the file content, hex encoded.
    pub digest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Non-fatal index problems. The index is rebuilt from scratch when these occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexWarning {
    Unreadable(String),
    Corrupt(String),
    VersionMismatch { found: u32 },
    WriteFailed(String),
}

impl fmt::Display for IndexWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexWarning::Unreadable(e) => write!(f, "index unreadable, rebuilding: {e}"),
            IndexWarning::Corrupt(e) => write!(f, "index corrupt, rebuilding: {e}"),
            IndexWarning::VersionMismatch { found } => write!(
                f,
                "index version {found} does not match {INDEX_VERSION}, rebuilding"
            ),
            IndexWarning::WriteFailed(e) => write!(f, "could not save index: {e}"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    records: Vec<IndexRecord>,
}

/// Filter for [`EntryStore::find`]. An empty query returns every entry
/// outside the ignored sections, newest first.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Include entries under ignored sections.
    pub all: bool,
    /// Reject entries created before this time. Inclusive.
    pub after: Option<NaiveDateTime>,
    /// Reject entries created after this time. Inclusive.
    pub before: Option<NaiveDateTime>,
    /// Only entries under this section.
    pub inpath: Option<String>,
    /// Only entries whose id matches.
    pub matching: Option<Regex>,
    /// Keep the first `n` survivors.
    pub lastn: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(mut self) -> Self {
        self.all = true;
        self
    }

    pub fn after(mut self, t: NaiveDateTime) -> Self {
        self.after = Some(t);
        self
    }

    pub fn before(mut self, t: NaiveDateTime) -> Self {
        self.before = Some(t);
        self
    }

    pub fn inpath(mut self, path: &str) -> Self {
        self.inpath = Some(path.to_string());
        self
    }

    pub fn matching(mut self, re: Regex) -> Self {
        self.matching = Some(re);
        self
    }

    pub fn lastn(mut self, n: usize) -> Self {
        self.lastn = Some(n);
        self
    }
}

/// Whether `id` lies in the section `prefix`. The empty prefix holds everything.
pub fn in_section(id: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    prefix.is_empty()
        || id == prefix
        || id
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// One calendar month of a [`EntryStore::get_months`] partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Month {
    pub start: NaiveDateTime,
    /// One second before the next month's `start`.
    pub end: NaiveDateTime,
    /// `YYYY/MM`
    pub label: String,
}

pub struct EntryStore {
    root: PathBuf,
    ignored: Vec<String>,
    index: RwLock<Option<Vec<IndexRecord>>>,
    cache: Mutex<HashMap<String, Arc<Mutex<Option<Arc<Entry>>>>>>,
    warnings: Mutex<Vec<IndexWarning>>,
}

impl EntryStore {
    /// A store over `root`. Nothing is read until the first query.
    pub fn new(root: impl Into<PathBuf>, ignored: Vec<String>) -> Self {
        Self {
            root: root.into(),
            ignored,
            index: RwLock::new(None),
            cache: Mutex::new(HashMap::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignored_sections(&self) -> &[String] {
        &self.ignored
    }

    /// Path of the backing file for an id.
    pub fn entry_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{ENTRY_EXTENSION}"))
    }

    /// Index problems seen since the last call.
    pub fn take_warnings(&self) -> Vec<IndexWarning> {
        std::mem::take(&mut *self.warnings.lock())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Index records matching `query`, newest first.
    pub fn find(&self, query: &Query) -> Result<Vec<IndexRecord>, StoreError> {
        self.ensure_index()?;
        let guard = self.index.read();
        let records = guard.as_deref().unwrap_or_default();

        let mut found: Vec<IndexRecord> = records
            .iter()
            .filter(|r| self.accepts(query, r))
            .cloned()
            .collect();
        if let Some(n) = query.lastn {
            found.truncate(n);
        }
        Ok(found)
    }

    fn accepts(&self, query: &Query, record: &IndexRecord) -> bool {
        if !query.all && self.ignored.iter().any(|s| in_section(&record.id, s)) {
            return false;
        }
        if query.after.is_some_and(|t| record.timestamp < t) {
            return false;
        }
        if query.before.is_some_and(|t| record.timestamp > t) {
            return false;
        }
        if let Some(path) = &query.inpath
            && !in_section(&record.id, path)
        {
            return false;
        }
        if let Some(re) = &query.matching
            && !re.is_match(&record.id)
        {
            return false;
        }
        true
    }

    /// Entries created within `[start, end]`.
    pub fn within(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<IndexRecord>, StoreError> {
        self.find(&Query::new().after(start).before(end))
    }

    /// The `n` newest entries.
    pub fn lastn(&self, n: usize) -> Result<Vec<IndexRecord>, StoreError> {
        self.find(&Query::new().lastn(n))
    }

    /// Number of entries on disk, ignored sections included.
    pub fn len(&self) -> Result<usize, StoreError> {
        self.ensure_index()?;
        Ok(self.index.read().as_ref().map_or(0, Vec::len))
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Every directory prefix that holds at least one entry.
    pub fn sections(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .find(&Query::new().all())?
            .iter()
            .flat_map(|r| ancestors(&r.id))
            .collect())
    }

    /// A view that restricts every query to one section.
    pub fn scoped<'a>(&'a self, path: &'a str) -> ScopedStore<'a> {
        ScopedStore::new(self, path)
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    /// Load and cache a full entry.
    pub fn load_entry(&self, id: &str) -> Result<Arc<Entry>, StoreError> {
        let slot = self.cache.lock().entry(id.to_string()).or_default().clone();
        let mut cached = slot.lock();
        if let Some(entry) = cached.as_ref() {
            return Ok(entry.clone());
        }

        let path = self.entry_path(id);
        if !path.is_file() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let (entry, _) = read_entry(id, &path)?;
        let entry = Arc::new(entry);
        *cached = Some(entry.clone());
        Ok(entry)
    }

    /// Write an entry under `id`, stamping `created` if it was never set,
    /// and bring the index and cache up to date.
    pub fn save_entry(&self, id: &str, mut entry: Entry) -> Result<Arc<Entry>, StoreError> {
        if !entry::is_valid_id(id) {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        self.ensure_index()?;

        entry.id = id.to_string();
        if entry.created == NaiveDateTime::default() {
            entry.created = entry::now();
        }
        let source = entry.to_source().map_err(|source| StoreError::Parse {
            id: id.to_string(),
            source,
        })?;

        let path = self.entry_path(id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        fs::write(&path, &source).map_err(io_err(&path))?;
        let mtime = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(io_err(&path))?;

        let record = IndexRecord {
            id: id.to_string(),
            timestamp: entry.created,
            modified: mtime,
            mtime,
            digest: digest(source.as_bytes()),
            tags: entry.tags.clone(),
        };
        {
            let mut guard = self.index.write();
            let records = guard.get_or_insert_with(Vec::new);
            records.retain(|r| r.id != id);
            records.push(record);
            sort_records(records);
            self.persist(records);
        }

        let entry = Arc::new(entry);
        let slot = self.cache.lock().entry(id.to_string()).or_default().clone();
        *slot.lock() = Some(entry.clone());
        Ok(entry)
    }

    /// Latest content change among `records`, as tracked by the index.
    pub fn last_modified(&self, records: &[IndexRecord]) -> Option<SystemTime> {
        let guard = self.index.read();
        let by_id: HashMap<&str, SystemTime> = guard
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|r| (r.id.as_str(), r.modified))
            .collect();
        records
            .iter()
            .map(|r| by_id.get(r.id.as_str()).copied().unwrap_or(r.modified))
            .max()
    }

    /// Partition the span of `records` into contiguous calendar months,
    /// oldest first, empty months included.
    pub fn get_months(&self, records: &[IndexRecord]) -> Vec<Month> {
        months_spanning(records)
    }

    // -------------------------------------------------------------------------
    // Index maintenance
    // -------------------------------------------------------------------------

    /// Reconcile the index against the directory now.
    pub fn refresh(&self) -> Result<(), StoreError> {
        let mut guard = self.index.write();
        let previous = match guard.take() {
            Some(records) => records,
            None => self.load_index(),
        };
        let (records, changed) = self.reconcile(previous)?;
        if !changed.is_empty() {
            let mut cache = self.cache.lock();
            for id in &changed {
                cache.remove(id);
            }
        }
        self.persist(&records);
        *guard = Some(records);
        Ok(())
    }

    fn ensure_index(&self) -> Result<(), StoreError> {
        if self.index.read().is_some() {
            return Ok(());
        }
        let mut guard = self.index.write();
        if guard.is_some() {
            return Ok(());
        }
        let (records, _) = self.reconcile(self.load_index())?;
        self.persist(&records);
        *guard = Some(records);
        Ok(())
    }

    fn load_index(&self) -> Vec<IndexRecord> {
        let path = self.root.join(INDEX_FILENAME);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                self.warn(IndexWarning::Unreadable(e.to_string()));
                return Vec::new();
            }
        };
        let file: IndexFile = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(e) => {
                self.warn(IndexWarning::Corrupt(e.to_string()));
                return Vec::new();
            }
        };
        if file.version != INDEX_VERSION {
            self.warn(IndexWarning::VersionMismatch {
                found: file.version,
            });
            return Vec::new();
        }
        file.records
    }

    /// Rebuild the record list from a directory scan. Returns the records and
    /// the ids whose content changed.
    fn reconcile(
        &self,
        previous: Vec<IndexRecord>,
    ) -> Result<(Vec<IndexRecord>, Vec<String>), StoreError> {
        let mut known: HashMap<String, IndexRecord> =
            previous.into_iter().map(|r| (r.id.clone(), r)).collect();
        let mut records = Vec::with_capacity(known.len());
        let mut changed = Vec::new();

        if !self.root.is_dir() {
            return Ok((records, changed));
        }

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
        for item in walker {
            let item = item?;
            if !item.file_type().is_file() {
                continue;
            }
            let path = item.path();
            let Some(id) = id_for_path(&self.root, path) else {
                continue;
            };
            let mtime = item.metadata()?.modified().map_err(io_err(path))?;

            let prior = known.remove(&id);
            if let Some(rec) = prior.as_ref().filter(|r| r.mtime == mtime) {
                records.push(rec.clone());
                continue;
            }

            let bytes = fs::read(path).map_err(io_err(path))?;
            let hash = digest(&bytes);
            if let Some(mut rec) = prior
                && rec.digest == hash
            {
                rec.mtime = mtime;
                records.push(rec);
                continue;
            }

            let source = String::from_utf8_lossy(&bytes);
            let entry = Entry::parse(&id, &source, entry::local_time(mtime)).map_err(|source| {
                StoreError::Parse {
                    id: id.clone(),
                    source,
                }
            })?;
            records.push(IndexRecord {
                id: id.clone(),
                timestamp: entry.created,
                modified: mtime,
                mtime,
                digest: hash,
                tags: entry.tags,
            });
            changed.push(id);
        }

        // Whatever is left in `known` was deleted from disk.
        changed.extend(known.into_keys());
        sort_records(&mut records);
        Ok((records, changed))
    }

    fn persist(&self, records: &[IndexRecord]) {
        if !self.root.is_dir() {
            return;
        }
        let path = self.root.join(INDEX_FILENAME);
        let file = IndexFile {
            version: INDEX_VERSION,
            records: records.to_vec(),
        };
        let result = serde_json::to_string_pretty(&file)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                let unchanged = fs::read_to_string(&path).is_ok_and(|old| old == json);
                if unchanged {
                    Ok(())
                } else {
                    fs::write(&path, json).map_err(|e| e.to_string())
                }
            });
        if let Err(e) = result {
            self.warn(IndexWarning::WriteFailed(e));
        }
    }

    fn warn(&self, warning: IndexWarning) {
        self.warnings.lock().push(warning);
    }
}

/// A section-restricted view of the store, handed to page handlers.
#[derive(Clone, Copy)]
pub struct ScopedStore<'a> {
    store: &'a EntryStore,
    path: &'a str,
}

impl<'a> ScopedStore<'a> {
    pub fn new(store: &'a EntryStore, path: &'a str) -> Self {
        Self {
            store,
            path: path.trim_matches('/'),
        }
    }

    /// The section this view is restricted to; empty for the whole store.
    pub fn path(&self) -> &'a str {
        self.path
    }

    pub fn store(&self) -> &'a EntryStore {
        self.store
    }

    /// [`EntryStore::find`] with the scope applied. A query that already names
    /// an `inpath` is narrowed to the scope as well.
    pub fn find(&self, query: &Query) -> Result<Vec<IndexRecord>, StoreError> {
        let mut found = self.store.find(&Query {
            lastn: None,
            ..query.clone()
        })?;
        found.retain(|r| in_section(&r.id, self.path));
        if let Some(n) = query.lastn {
            found.truncate(n);
        }
        Ok(found)
    }

    pub fn within(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<IndexRecord>, StoreError> {
        self.find(&Query::new().after(start).before(end))
    }

    pub fn lastn(&self, n: usize) -> Result<Vec<IndexRecord>, StoreError> {
        self.find(&Query::new().lastn(n))
    }

    pub fn last_modified(&self, records: &[IndexRecord]) -> Option<SystemTime> {
        self.store.last_modified(records)
    }

    pub fn get_months(&self, records: &[IndexRecord]) -> Vec<Month> {
        self.store.get_months(records)
    }

    /// `id` relative to this view's section.
    pub fn relative<'b>(&self, id: &'b str) -> &'b str {
        if self.path.is_empty() {
            return id;
        }
        match id.strip_prefix(self.path) {
            Some(rest) => rest.trim_start_matches('/'),
            None => id,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Newest first; equal timestamps fall back to id order so the index is stable.
fn sort_records(records: &mut [IndexRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

/// SHA-256 of a byte slice, as a hex string.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// `entries/travel/kyoto.md` → `travel/kyoto`. `None` for non-entry files.
fn id_for_path(root: &Path, path: &Path) -> Option<String> {
    if path.extension()? != ENTRY_EXTENSION {
        return None;
    }
    let rel = path.strip_prefix(root).ok()?.with_extension("");
    let id = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    entry::is_valid_id(&id).then_some(id)
}

/// Proper directory prefixes of an id: `a/b/c` → `a`, `a/b`.
pub fn ancestors(id: &str) -> Vec<String> {
    id.match_indices('/')
        .map(|(i, _)| id[..i].to_string())
        .collect()
}

fn read_entry(id: &str, path: &Path) -> Result<(Entry, SystemTime), StoreError> {
    let source = fs::read_to_string(path).map_err(io_err(path))?;
    let mtime = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(io_err(path))?;
    let entry =
        Entry::parse(id, &source, entry::local_time(mtime)).map_err(|source| StoreError::Parse {
            id: id.to_string(),
            source,
        })?;
    Ok((entry, mtime))
}

fn month_start(year: i32, month: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1).map(entry::midnight)
}

fn next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (y, m) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    month_start(y, m)
}

fn months_spanning(records: &[IndexRecord]) -> Vec<Month> {
    let (Some(first), Some(last)) = (
        records.iter().map(|r| r.timestamp).min(),
        records.iter().map(|r| r.timestamp).max(),
    ) else {
        return Vec::new();
    };

    let mut months = Vec::new();
    let mut start = month_start(first.year(), first.month());
    while let Some(s) = start
        && s <= last
    {
        let next = next_month(s);
        let end = next.map_or(s, |n| n - TimeDelta::seconds(1));
        months.push(Month {
            start: s,
            end,
            label: s.format("%Y/%m").to_string(),
        });
        start = next;
    }
    months
}

/// Group records by calendar day, oldest day first. Records keep their
/// newest-first order within a day.
pub fn group_by_day(records: &[IndexRecord]) -> BTreeMap<NaiveDate, Vec<IndexRecord>> {
    let mut days: BTreeMap<NaiveDate, Vec<IndexRecord>> = BTreeMap::new();
    for r in records {
        days.entry(r.timestamp.date()).or_default().push(r.clone());
    }
    days
}
