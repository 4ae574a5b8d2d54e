//! Weblog configuration module.
//!
//! Handles loading, validating, and merging `blotter.toml`. The file lives in
//! the weblog root; every key is optional and overrides the stock defaults.
//!
//! ## Layout
//!
//! ```text
//! myblog/
//! ├── blotter.toml          # Weblog config (overrides stock defaults)
//! ├── entries/              # Entry records, one markdown file per entry
//! ├── skel/                 # Templates, walked to build the output map
//! └── htdocs/               # Generated site
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! title = "My Weblog"
//! link = "/"
//! lastn = 10                # Entries on the index page
//! central_ext = "html"      # Output extension of canonical entry pages
//! ignored_sections = []     # Sections left out of default queries
//! file_mode = 0o664         # Permissions of written pages (unix)
//!
//! [authors.admin]
//! name = "Admin"
//!
//! [paths]
//! entries = "entries"
//! skel = "skel"
//! htdocs = "htdocs"
//!
//! [processing]
//! max_processes = 4         # Max parallel render workers (omit for auto)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the config file within the weblog root.
pub const CONFIG_FILENAME: &str = "blotter.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Weblog configuration loaded from `blotter.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Weblog title, handed to every renderer.
    pub title: String,
    /// Base URL the site is served from.
    pub link: String,
    /// Number of entries on the index page.
    pub lastn: usize,
    /// Output extension (without the dot) of canonical entry pages.
    pub central_ext: String,
    /// Section prefixes excluded from default queries.
    pub ignored_sections: Vec<String>,
    /// Permission bits applied to every written page.
    pub file_mode: u32,
    /// Known authors, keyed by the name entries refer to them with.
    pub authors: BTreeMap<String, AuthorConfig>,
    /// Directory layout, relative to the weblog root.
    pub paths: PathsConfig,
    /// Parallel rendering settings.
    pub processing: ProcessingConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "My Weblog".to_string(),
            link: "/".to_string(),
            lastn: 10,
            central_ext: "html".to_string(),
            ignored_sections: Vec::new(),
            file_mode: 0o664,
            authors: BTreeMap::new(),
            paths: PathsConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lastn == 0 {
            return Err(ConfigError::Validation("lastn must be at least 1".into()));
        }
        if self.central_ext.is_empty() || self.central_ext.contains('.') {
            return Err(ConfigError::Validation(
                "central_ext must be a bare extension like \"html\"".into(),
            ));
        }
        if self.file_mode > 0o777 {
            return Err(ConfigError::Validation(
                "file_mode must be a permission mask no larger than 0o777".into(),
            ));
        }
        for (label, dir) in [
            ("paths.entries", &self.paths.entries),
            ("paths.skel", &self.paths.skel),
            ("paths.htdocs", &self.paths.htdocs),
        ] {
            if dir.is_empty() {
                return Err(ConfigError::Validation(format!("{label} must not be empty")));
            }
        }
        Ok(())
    }
}

/// An author entries may be attributed to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorConfig {
    pub name: String,
    pub email: String,
    pub url: String,
}

/// Directory layout under the weblog root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub entries: String,
    pub skel: String,
    pub htdocs: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            entries: "entries".to_string(),
            skel: "skel".to_string(),
            htdocs: "htdocs".to_string(),
        }
    }
}

/// Parallel rendering settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel render workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)`, never less than one
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `blotter.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `blotter.toml` in the weblog root.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(root)?)
}

/// Returns a fully-commented stock `blotter.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Blotter Configuration
# =====================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Weblog title, available to every template.
title = "My Weblog"

# Base URL the site is served from.
link = "/"

# Number of entries shown on the index page.
lastn = 10

# Output extension of the page that counts as an entry's permalink when
# several templates render the same entry.
central_ext = "html"

# Sections (entry id prefixes) left out of index, archive and tag pages.
# Their entries still get their own pages.
ignored_sections = []

# Permissions of written pages (unix only).
file_mode = 0o664

# ---------------------------------------------------------------------------
# Authors
# ---------------------------------------------------------------------------
# Every entry's `author` must name one of these keys.
#
# [authors.admin]
# name = "Admin"
# email = "admin@example.com"
# url = "https://example.com"

# ---------------------------------------------------------------------------
# Directory layout, relative to the weblog root
# ---------------------------------------------------------------------------
[paths]
entries = "entries"
skel = "skel"
htdocs = "htdocs"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel render workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
