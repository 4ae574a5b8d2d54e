//! # Blotter
//!
//! A file-based weblog engine. Entries are markdown files with TOML front
//! matter; templates are files in a skeleton directory; the site is a tree of
//! static files regenerated incrementally.
//!
//! # Architecture: Map, Then Regenerate
//!
//! ```text
//! entries/*.md ──► EntryStore (sorted index) ─┐
//!                                             ├─► OutputMap ──► regen ──► htdocs/
//! skel/**/*.tpl ──► resolve ──► handlers ─────┘   link → page    stale pages only
//! ```
//!
//! 1. **Index**: the store reconciles a persisted index of entries against the
//!    `entries/` directory. Queries run against the index, never the files.
//! 2. **Map**: every template is matched to a handler by its path. The handler
//!    expands it into pages (one per day, per month, per entry, ...), each with
//!    a link and the index records it shows.
//! 3. **Regenerate**: pages whose output is older than their template or their
//!    entries are rendered and written. Publishers are told what changed.
//!
//! Only the pages that changed are touched, so regenerating after editing one
//! entry rewrites that entry's page, its day, month and year, its sections and
//! tags, and the index when it is recent enough to be shown there.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`entry`] | Entry records: front matter format, parsing, lazy markdown rendering |
//! | [`store`] | Entry store: persisted index, queries, month partitioning, entry cache |
//! | [`page`] | Page descriptors and link resolution |
//! | [`resolve`] | Template path → handler key, by underscore-joined prefix climbing |
//! | [`handlers`] | Built-in page handlers (index, daily, monthly, yearly, entry, section, tags) and the registry |
//! | [`outputs`] | Output map: walks `skel/`, runs handlers, dedups links and canonical pages |
//! | [`render`] | Renderer trait, hydrated values, HTML (Maud) and JSON renderers |
//! | [`publish`] | Publisher trait, sitemap publisher, sidebar providers |
//! | [`regen`] | Regeneration engine: staleness, hydration, parallel render, write |
//! | [`weblog`] | The facade tying config, store, map cache and engine together |
//! | [`config`] | `blotter.toml` loading, merging over stock defaults, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Index Records, Not Entries
//!
//! Handlers work on [`store::IndexRecord`]s: id, creation time, tags and
//! modification bookkeeping. Building the output map never opens an entry
//! file once the index is warm. Full entries are loaded only for pages that
//! are actually rendered, and each is parsed at most once per process.
//!
//! ## Content Digests in the Index
//!
//! A changed mtime alone does not make an entry stale: the index keeps a
//! SHA-256 of every file, so a `touch` or a `git checkout` that leaves the
//! content identical keeps the entry's recorded modification time, and its
//! pages stay fresh.
//!
//! ## Last Wins by Specificity
//!
//! Templates may overlap. When two claim the same link, the one deeper in
//! `skel/` wins. Each entry's permalink is the page rendered with the
//! configured `central_ext`, whatever other formats exist.

pub mod config;
pub mod entry;
pub mod handlers;
pub mod output;
pub mod outputs;
pub mod page;
pub mod publish;
pub mod regen;
pub mod render;
pub mod resolve;
pub mod store;
pub mod weblog;

#[cfg(test)]
pub(crate) mod test_helpers;
