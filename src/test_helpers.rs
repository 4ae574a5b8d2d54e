//! Shared test utilities for the blotter test suite.
//!
//! Builds throwaway weblog trees in a temp directory: a `blotter.toml` with a
//! known author, entry records with explicit creation times, and templates.
//! Every file written here gets an mtime a day in the past, so tests that
//! care about staleness can move individual files forward explicitly.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let fx = BlogFixture::new();
//! fx.entry("travel/kyoto", "2024-01-15T09:30:00", &["japan"]);
//! fx.template("entry.html.tpl", "");
//! let weblog = fx.weblog();
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use crate::weblog::Weblog;

/// Author every fixture entry is attributed to unless stated otherwise.
pub const AUTHOR: &str = "ada";

const CONFIG: &str = r#"title = "Test Weblog"
lastn = 3

[authors.ada]
name = "Ada"
email = "ada@example.com"
"#;

// =========================================================================
// Fixture setup
// =========================================================================

pub struct BlogFixture {
    dir: TempDir,
}

impl BlogFixture {
    /// An empty weblog: config, `entries/`, `skel/`, no `htdocs/`.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("blotter.toml"), CONFIG).unwrap();
        fs::create_dir_all(dir.path().join("entries")).unwrap();
        fs::create_dir_all(dir.path().join("skel")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn entries_dir(&self) -> PathBuf {
        self.root().join("entries")
    }

    pub fn htdocs(&self, rel: &str) -> PathBuf {
        self.root().join("htdocs").join(rel.trim_start_matches('/'))
    }

    /// Write `entries/<id>.md` by the default author.
    pub fn entry(&self, id: &str, created: &str, tags: &[&str]) -> PathBuf {
        self.write_raw(
            &format!("entries/{id}.md"),
            &entry_source(id, created, tags),
        )
    }

    /// Write `entries/<id>.md` attributed to `author`.
    pub fn entry_by(&self, id: &str, created: &str, author: &str) -> PathBuf {
        let source = format!(
            "+++\ntitle = \"{id}\"\nauthor = \"{author}\"\ncreated = {created}\n+++\nBody of {id}.\n"
        );
        self.write_raw(&format!("entries/{id}.md"), &source)
    }

    /// Write `skel/<rel>`.
    pub fn template(&self, rel: &str, content: &str) -> PathBuf {
        self.write_raw(&format!("skel/{rel}"), content)
    }

    /// Write any file under the root, creating parents, with an mtime in the past.
    pub fn write_raw(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        set_mtime(&path, past());
        path
    }

    /// Open the fixture as a weblog.
    pub fn weblog(&self) -> Weblog {
        Weblog::open(self.root()).unwrap()
    }

    pub fn into_dir(self) -> TempDir {
        self.dir
    }
}

// =========================================================================
// File helpers
// =========================================================================

/// Entry record source with the default author and a one-line body.
pub fn entry_source(id: &str, created: &str, tags: &[&str]) -> String {
    let tags = tags
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "+++\ntitle = \"{id}\"\nauthor = \"{AUTHOR}\"\ncreated = {created}\ntags = [{tags}]\n+++\nBody of {id}.\n"
    )
}

/// A day ago.
pub fn past() -> SystemTime {
    SystemTime::now() - Duration::from_secs(86_400)
}

/// An hour from now.
pub fn future() -> SystemTime {
    SystemTime::now() + Duration::from_secs(3_600)
}

pub fn set_mtime(path: &Path, t: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(t)
        .unwrap();
}

pub fn mtime(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

/// Every file under `dir`, relative, sorted.
pub fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}
