//! The output map: every page the weblog would write, and the template that
//! writes it.
//!
//! Built by one lexicographic walk over `skel/`:
//!
//! ```text
//! skel/
//! ├── index.html.tpl          → handler "index"   → /index.html
//! ├── entry.html.tpl          → handler "entry"   → /<id>.html per entry
//! ├── entry.json.tpl          → handler "entry"   → /<id>.json per entry
//! ├── daily/index.html.tpl    → handler "daily"   → /YYYY/MM/DD.html
//! ├── section/travel/
//! │   └── index.html.tpl      → handler "section", scope "travel"
//! │                                               → /travel/<section>/index.html
//! └── about.html.tpl          → no handler        → /about.html
//! ```
//!
//! A template qualifies when its last extension names a registered renderer
//! and at least one more extension precedes it; that one becomes the output
//! extension. Hidden files and directories are skipped.
//!
//! ## Collisions
//!
//! Two templates can claim the same link (`daily.html.tpl` and
//! `daily/index.html.tpl` both produce `/2024/01/05.html`). The template that
//! sits deeper in `skel/` wins; at equal depth the later one in walk order
//! does. Each entry also has one canonical page, used for permalinks: a page
//! whose output extension is the configured `central_ext` beats one whose
//! extension is not, and otherwise the same depth rule applies.

use crate::entry;
use crate::handlers::{HandlerRegistry, Scope, Var, Vars};
use crate::page::Page;
use crate::render::RendererSet;
use crate::resolve::{Resolved, default_page, resolve};
use crate::store::{EntryStore, StoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("walking templates: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One page to render: the page descriptor plus where it came from.
#[derive(Debug, Clone)]
pub struct PageContext {
    /// Absolute path of the template file.
    pub template: PathBuf,
    /// Extension of the renderer that handles the template.
    pub renderer: String,
    /// Extension of the written file, with its leading dot.
    pub output_ext: String,
    /// Template path under `skel/` with every extension stripped.
    pub page_name: String,
    pub page: Page,
    pub vars: Vars,
    /// Directory depth of the template under `skel/`.
    pub depth: usize,
}

impl PageContext {
    /// Id of the page's entry, for entry pages.
    pub fn entry_id(&self) -> Option<&str> {
        self.vars.values().find_map(|v| match v {
            Var::Entry(record) => Some(record.id.as_str()),
            _ => None,
        })
    }
}

/// A template file name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateName {
    pub page_name: String,
    pub output_ext: String,
    pub renderer: String,
    pub depth: usize,
}

/// Split `daily/index.html.tpl` into page name `daily/index`, output
/// extension `.html`, renderer `tpl`. `None` for files with fewer than two
/// extensions.
pub fn parse_template_name(rel: &Path) -> Option<TemplateName> {
    let file_name = rel.file_name()?.to_str()?;
    let mut parts: Vec<&str> = file_name.split('.').collect();
    if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let renderer = parts.pop()?.to_string();
    let stem = parts.remove(0);
    let output_ext = format!(".{}", parts.join("."));

    let dirs: Vec<String> = rel
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    let depth = dirs.len();
    let page_name = dirs
        .into_iter()
        .chain(std::iter::once(stem.to_string()))
        .collect::<Vec<_>>()
        .join("/");

    Some(TemplateName {
        page_name,
        output_ext,
        renderer,
        depth,
    })
}

/// Everything the builder needs besides the template tree.
pub struct MapInputs<'a> {
    pub store: &'a EntryStore,
    pub handlers: &'a HandlerRegistry,
    pub renderers: &'a RendererSet,
    pub lastn: usize,
    /// Output extension of canonical entry pages, without the dot.
    pub central_ext: &'a str,
}

#[derive(Debug, Default)]
pub struct OutputMap {
    /// Page to render, by link.
    pub pages: BTreeMap<String, Arc<PageContext>>,
    /// Canonical page, by entry id (or page name for pages without an entry).
    pub canonical: BTreeMap<String, Arc<PageContext>>,
}

impl OutputMap {
    pub fn build(skel: &Path, inputs: &MapInputs<'_>) -> Result<Self, OutputError> {
        let mut map = OutputMap::default();
        if !skel.is_dir() {
            return Ok(map);
        }

        let walker = WalkDir::new(skel)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for item in walker {
            let item = item?;
            if !item.file_type().is_file() {
                continue;
            }
            let Ok(rel) = item.path().strip_prefix(skel) else {
                continue;
            };
            let Some(name) = parse_template_name(rel) else {
                continue;
            };
            if !inputs.renderers.contains(&name.renderer) {
                continue;
            }

            let mut emitted: Vec<(Page, Vars)> = Vec::new();
            let base = match resolve(inputs.handlers, &name.page_name) {
                Resolved::Handler { handler, scope, .. } => {
                    let view = Scope {
                        store: inputs.store.scoped(&scope),
                        lastn: inputs.lastn,
                        ignored: inputs.store.ignored_sections(),
                    };
                    handler.pages(&view, &mut |page, vars| emitted.push((page, vars)))?;
                    scope
                }
                Resolved::Default => {
                    let modified =
                        item.metadata()?
                            .modified()
                            .map_err(|source| OutputError::Io {
                                path: item.path().to_path_buf(),
                                source,
                            })?;
                    let stamp = entry::local_time(modified);
                    emitted.push((default_page(&name.page_name, stamp), Vars::new()));
                    String::new()
                }
            };

            for (mut page, vars) in emitted {
                page.add_path(&base, &name.output_ext);
                map.insert(
                    Arc::new(PageContext {
                        template: item.path().to_path_buf(),
                        renderer: name.renderer.clone(),
                        output_ext: name.output_ext.clone(),
                        page_name: name.page_name.clone(),
                        page,
                        vars,
                        depth: name.depth,
                    }),
                    inputs.central_ext,
                );
            }
        }
        Ok(map)
    }

    fn insert(&mut self, ctx: Arc<PageContext>, central_ext: &str) {
        let replaces_link = self
            .pages
            .get(&ctx.page.link)
            .is_none_or(|old| ctx.depth >= old.depth);
        if replaces_link {
            self.pages.insert(ctx.page.link.clone(), ctx.clone());
        }

        let key = ctx.entry_id().unwrap_or(&ctx.page_name).to_string();
        let is_central = |c: &PageContext| c.output_ext.strip_prefix('.') == Some(central_ext);
        let replaces_canonical = match self.canonical.get(&key) {
            None => true,
            Some(old) => match (is_central(&ctx), is_central(old)) {
                (true, false) => true,
                (false, true) => false,
                _ => ctx.depth >= old.depth,
            },
        };
        if replaces_canonical {
            self.canonical.insert(key, ctx);
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Canonical link of an entry.
    pub fn entry_link(&self, id: &str) -> Option<&str> {
        self.canonical.get(id).map(|c| c.page.link.as_str())
    }

    /// Canonical links of every entry page, by entry id.
    pub fn permalinks(&self) -> BTreeMap<String, String> {
        self.canonical
            .values()
            .filter_map(|c| Some((c.entry_id()?.to_string(), c.page.link.clone())))
            .collect()
    }
}
