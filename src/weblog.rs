//! The weblog: config, store, handlers, renderers, publishers and the cached
//! output map, behind one facade.
//!
//! ```rust,no_run
//! use blotter::regen::Mode;
//! use blotter::weblog::Weblog;
//!
//! let weblog = Weblog::open("myblog".as_ref())?;
//! let report = weblog.regenerate(Mode::Update)?;
//! println!("{} written, {} skipped", report.written.len(), report.skipped);
//! # Ok::<(), blotter::weblog::WeblogError>(())
//! ```
//!
//! The output map is built on first use and kept until something may have
//! changed it: every regeneration run ends by dropping it, as does
//! [`Weblog::save_entry`] and [`Weblog::reset_output_map`].

use crate::config::{self, ConfigError, SiteConfig};
use crate::entry::Entry;
use crate::handlers::HandlerRegistry;
use crate::outputs::{MapInputs, OutputError, OutputMap};
use crate::publish::{AuthorsSidebar, Publisher, Sidebar, SitemapPublisher};
use crate::regen::{self, Engine, Mode, RegenError, RegenEvent, RegenOptions, RegenReport};
use crate::render::RendererSet;
use crate::store::{EntryStore, IndexRecord, Query, StoreError};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeblogError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Regen(#[from] RegenError),
}

pub struct Weblog {
    root: PathBuf,
    config: SiteConfig,
    store: EntryStore,
    handlers: HandlerRegistry,
    renderers: RendererSet,
    publishers: Vec<Arc<dyn Publisher>>,
    sidebar: Sidebar,
    output_map: Mutex<Option<Arc<OutputMap>>>,
}

impl Weblog {
    /// Open the weblog at `root`, reading `blotter.toml` if there is one.
    pub fn open(root: &Path) -> Result<Self, WeblogError> {
        let config = config::load_config(root)?;
        Ok(Self::new(root, config))
    }

    /// A weblog with the built-in handlers, renderers, sitemap publisher and
    /// authors sidebar.
    pub fn new(root: &Path, config: SiteConfig) -> Self {
        let store = EntryStore::new(
            root.join(&config.paths.entries),
            config.ignored_sections.clone(),
        );
        let mut sidebar = Sidebar::new();
        sidebar.push(Arc::new(AuthorsSidebar));
        Self {
            root: root.to_path_buf(),
            publishers: vec![Arc::new(SitemapPublisher::new(&config.link))],
            config,
            store,
            handlers: HandlerRegistry::with_builtins(),
            renderers: RendererSet::with_builtins(),
            sidebar,
            output_map: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn skel_dir(&self) -> PathBuf {
        self.root.join(&self.config.paths.skel)
    }

    pub fn htdocs_dir(&self) -> PathBuf {
        self.root.join(&self.config.paths.htdocs)
    }

    // -------------------------------------------------------------------------
    // Extension points
    // -------------------------------------------------------------------------

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        self.output_map.get_mut().take();
        &mut self.handlers
    }

    pub fn renderers_mut(&mut self) -> &mut RendererSet {
        self.output_map.get_mut().take();
        &mut self.renderers
    }

    pub fn add_publisher(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.push(publisher);
    }

    pub fn sidebar_mut(&mut self) -> &mut Sidebar {
        &mut self.sidebar
    }

    // -------------------------------------------------------------------------
    // Output map
    // -------------------------------------------------------------------------

    /// The cached output map, built if there is none.
    pub fn output_map(&self) -> Result<Arc<OutputMap>, WeblogError> {
        self.output_map_with(None)
    }

    fn output_map_with(
        &self,
        events: Option<&Sender<RegenEvent>>,
    ) -> Result<Arc<OutputMap>, WeblogError> {
        let mut cached = self.output_map.lock();
        if let Some(map) = cached.as_ref() {
            return Ok(map.clone());
        }

        self.store.refresh()?;
        let map = Arc::new(OutputMap::build(
            &self.skel_dir(),
            &MapInputs {
                store: &self.store,
                handlers: &self.handlers,
                renderers: &self.renderers,
                lastn: self.config.lastn,
                central_ext: &self.config.central_ext,
            },
        )?);

        if let Some(tx) = events {
            for warning in self.store.take_warnings() {
                tx.send(RegenEvent::IndexWarning(warning.to_string())).ok();
            }
            tx.send(RegenEvent::MapBuilt {
                pages: map.len(),
                entries: self.store.len()?,
            })
            .ok();
        }
        *cached = Some(map.clone());
        Ok(map)
    }

    pub fn reset_output_map(&self) {
        self.output_map.lock().take();
    }

    // -------------------------------------------------------------------------
    // Regeneration
    // -------------------------------------------------------------------------

    pub fn regenerate(&self, mode: Mode) -> Result<RegenReport, WeblogError> {
        self.regenerate_with(&RegenOptions::new(mode), None)
    }

    /// Regenerate only pages whose link lies under `path`.
    pub fn regenerate_path(&self, path: &str, mode: Mode) -> Result<RegenReport, WeblogError> {
        self.regenerate_with(&RegenOptions::new(mode).under(path), None)
    }

    pub fn regenerate_with(
        &self,
        opts: &RegenOptions,
        events: Option<&Sender<RegenEvent>>,
    ) -> Result<RegenReport, WeblogError> {
        let result = self.run(opts, events);
        self.reset_output_map();
        result
    }

    fn run(
        &self,
        opts: &RegenOptions,
        events: Option<&Sender<RegenEvent>>,
    ) -> Result<RegenReport, WeblogError> {
        let map = self.output_map_with(events)?;
        let sidebar = self.sidebar.items(&self.config);
        let htdocs = self.htdocs_dir();
        let engine = Engine {
            site: &self.config,
            store: &self.store,
            renderers: &self.renderers,
            publishers: &self.publishers,
            sidebar: &sidebar,
            htdocs: &htdocs,
        };
        Ok(engine.run(&map, opts, events)?)
    }

    // -------------------------------------------------------------------------
    // Storage facade
    // -------------------------------------------------------------------------

    pub fn find(&self, query: &Query) -> Result<Vec<IndexRecord>, WeblogError> {
        Ok(self.store.find(query)?)
    }

    pub fn lastn(&self, n: usize) -> Result<Vec<IndexRecord>, WeblogError> {
        Ok(self.store.lastn(n)?)
    }

    pub fn within(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<IndexRecord>, WeblogError> {
        Ok(self.store.within(start, end)?)
    }

    pub fn sections(&self) -> Result<BTreeSet<String>, WeblogError> {
        Ok(self.store.sections()?)
    }

    pub fn load_entry(&self, id: &str) -> Result<Arc<Entry>, WeblogError> {
        Ok(self.store.load_entry(id)?)
    }

    /// Load an entry and check that its author is known.
    pub fn load_and_validate(&self, id: &str) -> Result<Arc<Entry>, WeblogError> {
        let entry = self.store.load_entry(id)?;
        regen::check_author(&self.config, &entry)?;
        Ok(entry)
    }

    /// Validate and save an entry. Nothing is written for an unknown author.
    pub fn save_entry(&self, id: &str, entry: Entry) -> Result<Arc<Entry>, WeblogError> {
        let mut entry = entry;
        entry.id = id.to_string();
        regen::check_author(&self.config, &entry)?;
        let saved = self.store.save_entry(id, entry)?;
        self.reset_output_map();
        Ok(saved)
    }

    /// Canonical link of an entry, if any template renders it.
    pub fn entry_link(&self, id: &str) -> Result<Option<String>, WeblogError> {
        Ok(self.output_map()?.entry_link(id).map(str::to_string))
    }

    /// Load every entry, ignored sections included, and validate its author.
    /// Returns the number of entries checked.
    pub fn check(&self) -> Result<usize, WeblogError> {
        self.store.refresh()?;
        let records = self.store.find(&Query::new().all())?;
        for record in &records {
            self.load_and_validate(&record.id)?;
        }
        Ok(records.len())
    }
}
