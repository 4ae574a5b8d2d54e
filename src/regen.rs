//! The regeneration engine: from output map to files in `htdocs/`.
//!
//! ```text
//! OutputMap ──► scope filter ──► staleness check ──► hydrate ──► render ──► write
//!                  (path)          (Update only)    (entries)   (rayon)    (mode)
//!                                                                  │
//!                                  Published ◄─────────────────────┘
//!                                      │
//!                                      ▼
//!                                  publishers (gated by watch)
//! ```
//!
//! ## Staleness
//!
//! In [`Mode::Update`] a page is skipped only when all of these hold:
//! its output file exists, the template is older than the output, and the
//! page has an `updated` time older than the output. A page without an
//! `updated` time is always rebuilt. [`Mode::Full`] rebuilds everything.
//!
//! ## Parallelism
//!
//! Pages render on a dedicated rayon pool sized by `processing.max_processes`.
//! Each page writes a distinct file; the entry store's per-id cache slots keep
//! concurrent hydration of the same entry to a single parse. Every stale page
//! is hydrated before the first write, so content errors such as an unknown
//! author abort the run with nothing written. A render or write failure
//! aborts the run too, but pages already written stay written.
//!
//! Progress is reported through an optional `mpsc` channel of [`RegenEvent`]s.

use crate::config::{self, SiteConfig};
use crate::entry::Entry;
use crate::handlers::Var;
use crate::outputs::{OutputError, OutputMap, PageContext};
use crate::publish::{Published, PublishError, Publisher, SidebarItem, wants};
use crate::render::{EntrySet, RenderContext, RenderError, RendererSet, Value};
use crate::store::{EntryStore, IndexRecord, StoreError};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegenError {
    #[error("entry {entry}: unknown author `{author}`")]
    AuthorNotFound { author: String, entry: String },
    #[error("rendering {}: {source}", template.display())]
    Render {
        template: PathBuf,
        #[source]
        source: RenderError,
    },
    #[error("no renderer for `.{0}` templates")]
    NoRenderer(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("publishing: {0}")]
    Publish(#[from] PublishError),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("render pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("regeneration cancelled")]
    Cancelled,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RegenError + '_ {
    move |source| RegenError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Rebuild every page.
    Full,
    /// Rebuild only pages whose inputs changed.
    #[default]
    Update,
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum RegenEvent {
    MapBuilt { pages: usize, entries: usize },
    IndexWarning(String),
    /// A page is about to be rendered.
    Publishing { link: String },
    Written { link: String, path: PathBuf },
    Skipped { link: String },
    Published { publisher: String, pages: usize },
}

/// Shared flag checked between pages. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegenOptions {
    pub mode: Mode,
    /// Only regenerate pages whose link lies under this path.
    pub path: Option<String>,
    pub cancel: CancelToken,
}

impl RegenOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn under(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct RegenReport {
    /// Links written, sorted.
    pub written: Vec<String>,
    pub skipped: usize,
    pub published: Published,
}

/// Everything a run reads besides the output map.
pub struct Engine<'a> {
    pub site: &'a SiteConfig,
    pub store: &'a EntryStore,
    pub renderers: &'a RendererSet,
    pub publishers: &'a [Arc<dyn Publisher>],
    pub sidebar: &'a [SidebarItem],
    pub htdocs: &'a Path,
}

/// A stale page with its entries loaded, ready to render.
struct Staged<'a> {
    ctx: &'a Arc<PageContext>,
    template: &'a str,
    out: PathBuf,
    values: BTreeMap<String, Value>,
}

/// A template's content and modification time, read once per run.
struct Template {
    source: String,
    mtime: SystemTime,
}

impl Engine<'_> {
    pub fn run(
        &self,
        map: &OutputMap,
        opts: &RegenOptions,
        events: Option<&Sender<RegenEvent>>,
    ) -> Result<RegenReport, RegenError> {
        let emit = |event: RegenEvent| {
            if let Some(tx) = events {
                tx.send(event).ok();
            }
        };

        let selected: Vec<&Arc<PageContext>> = map
            .pages
            .values()
            .filter(|ctx| in_scope(&ctx.page.link, opts.path.as_deref()))
            .collect();
        let templates = read_templates(&selected)?;
        let permalinks = map.permalinks();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config::effective_threads(&self.site.processing))
            .build()?;
        // Hydrate every stale page before writing any, so a bad entry leaves
        // htdocs/ untouched.
        let staged: Vec<Staged<'_>> = pool.install(|| {
            selected
                .par_iter()
                .map(|ctx| {
                    if opts.cancel.is_cancelled() {
                        return Err(RegenError::Cancelled);
                    }
                    let template = &templates[&ctx.template];
                    let out = self.output_path(&ctx.page.link);
                    if opts.mode == Mode::Update
                        && is_fresh(&out, template.mtime, ctx.page.updated)
                    {
                        emit(RegenEvent::Skipped {
                            link: ctx.page.link.clone(),
                        });
                        return Ok(None);
                    }
                    let values = self.hydrate(ctx)?;
                    Ok(Some(Staged {
                        ctx: *ctx,
                        template: &template.source,
                        out,
                        values,
                    }))
                })
                .collect::<Result<Vec<_>, RegenError>>()
        })?
        .into_iter()
        .flatten()
        .collect();
        let skipped = selected.len() - staged.len();

        let written: Vec<Arc<PageContext>> = pool.install(|| {
            staged
                .into_par_iter()
                .map(|page| {
                    if opts.cancel.is_cancelled() {
                        return Err(RegenError::Cancelled);
                    }
                    emit(RegenEvent::Publishing {
                        link: page.ctx.page.link.clone(),
                    });
                    let text = self.render(&page, &permalinks)?;
                    self.write(&page.out, &text)?;
                    emit(RegenEvent::Written {
                        link: page.ctx.page.link.clone(),
                        path: page.out,
                    });
                    Ok(Arc::clone(page.ctx))
                })
                .collect::<Result<Vec<_>, RegenError>>()
        })?;

        let mut report = RegenReport {
            skipped,
            ..RegenReport::default()
        };
        for ctx in written {
            report.written.push(ctx.page.link.clone());
            report.published.record(&ctx.page_name, ctx.page.clone());
        }
        report.written.sort();

        for publisher in self.publishers {
            if wants(publisher.as_ref(), &report.published) {
                publisher.publish(&report.published, self.htdocs)?;
                emit(RegenEvent::Published {
                    publisher: publisher.name().to_string(),
                    pages: report.published.len(),
                });
            }
        }
        Ok(report)
    }

    fn output_path(&self, link: &str) -> PathBuf {
        self.htdocs.join(link.trim_start_matches('/'))
    }

    fn render(
        &self,
        staged: &Staged<'_>,
        permalinks: &BTreeMap<String, String>,
    ) -> Result<String, RegenError> {
        let ctx = staged.ctx;
        let renderer = self
            .renderers
            .get(&ctx.renderer)
            .ok_or_else(|| RegenError::NoRenderer(ctx.renderer.clone()))?;
        let render_ctx = RenderContext {
            site: self.site,
            page: &ctx.page,
            page_name: &ctx.page_name,
            template: staged.template,
            values: &staged.values,
            sidebar: self.sidebar,
            permalinks,
        };
        renderer
            .render(&render_ctx)
            .map_err(|source| RegenError::Render {
                template: ctx.template.clone(),
                source,
            })
    }

    /// Load the entries a page refers to, rejecting unknown authors.
    fn hydrate(&self, ctx: &PageContext) -> Result<BTreeMap<String, Value>, RegenError> {
        ctx.vars
            .iter()
            .map(|(key, var)| {
                let value = match var {
                    Var::Entry(record) => Value::Entry(self.load(record)?),
                    Var::Entries(records) => Value::Entries(EntrySet::new(
                        records
                            .iter()
                            .map(|r| self.load(r))
                            .collect::<Result<_, _>>()?,
                    )),
                    Var::Text(text) => Value::Text(text.clone()),
                };
                Ok((key.clone(), value))
            })
            .collect()
    }

    fn load(&self, record: &IndexRecord) -> Result<Arc<Entry>, RegenError> {
        let entry = self.store.load_entry(&record.id)?;
        check_author(self.site, &entry)?;
        Ok(entry)
    }

    fn write(&self, path: &Path, text: &str) -> Result<(), RegenError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        fs::write(path, text).map_err(io_err(path))?;
        set_mode(path, self.site.file_mode)
    }
}

/// Reject entries attributed to an author the weblog does not know.
pub fn check_author(site: &SiteConfig, entry: &Entry) -> Result<(), RegenError> {
    if site.authors.contains_key(&entry.author) {
        Ok(())
    } else {
        Err(RegenError::AuthorNotFound {
            author: entry.author.clone(),
            entry: entry.id.clone(),
        })
    }
}

fn read_templates(
    selected: &[&Arc<PageContext>],
) -> Result<HashMap<PathBuf, Template>, RegenError> {
    let mut templates = HashMap::new();
    for ctx in selected {
        if templates.contains_key(&ctx.template) {
            continue;
        }
        let path = &ctx.template;
        let source = fs::read_to_string(path).map_err(io_err(path))?;
        let mtime = fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(io_err(path))?;
        templates.insert(path.clone(), Template { source, mtime });
    }
    Ok(templates)
}

/// Whether `link` lies under `path`, matching whole segments: `2024/01`
/// covers `/2024/01/05.html` and `/2024/01.html` but not `/2024/010.html`.
/// No path means everything.
pub fn in_scope(link: &str, path: Option<&str>) -> bool {
    match path.map(|p| p.trim_matches('/')) {
        None | Some("") => true,
        Some(prefix) => link
            .trim_start_matches('/')
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('.')),
    }
}

/// An output is fresh when it is newer than both its template and the page's
/// last update. Pages without an update time are never fresh.
pub fn is_fresh(out: &Path, template_mtime: SystemTime, updated: Option<SystemTime>) -> bool {
    let Ok(out_mtime) = fs::metadata(out).and_then(|m| m.modified()) else {
        return false;
    };
    template_mtime < out_mtime && updated.is_some_and(|u| u < out_mtime)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), RegenError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err(path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), RegenError> {
    Ok(())
}
