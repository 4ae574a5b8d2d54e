//! Entry records and their on-disk format.
//!
//! Each entry is one markdown file under `entries/`, with TOML front matter
//! fenced by `+++` lines:
//!
//! ```text
//! +++
//! title = "Kyoto in the rain"
//! author = "ada"
//! created = 2024-01-15T09:30:00
//! tags = ["travel", "japan"]
//! +++
//! The body, in markdown.
//! ```
//!
//! The entry id is the file path relative to `entries/` without the `.md`
//! extension (`travel/japan/kyoto`). It doubles as the URL slug, so it is
//! restricted to ASCII letters, digits, `-` and `_` segments joined by `/`.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike};
use pulldown_cmark::{Parser, html as md_html};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::SystemTime;
use thiserror::Error;

/// File extension of entry records.
pub const ENTRY_EXTENSION: &str = "md";

const FENCE: &str = "+++";

#[derive(Error, Debug)]
pub enum EntryError {
    #[error("missing opening `+++` front matter fence")]
    MissingFrontMatter,
    #[error("missing closing `+++` front matter fence")]
    UnclosedFrontMatter,
    #[error("front matter: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("front matter: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid date `{0}`")]
    Date(String),
}

/// A single weblog entry.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Storage key and URL slug. Assigned by the store, never changed.
    pub id: String,
    pub title: String,
    /// Key into the weblog's author map.
    pub author: String,
    pub created: NaiveDateTime,
    pub modified: Option<NaiveDateTime>,
    pub tagline: Option<String>,
    pub summary: Option<String>,
    /// Markdown source of the body.
    pub content: String,
    pub tags: Vec<String>,
    html: OnceLock<String>,
}

/// Front matter as written on disk. `created` may be missing, in which case
/// the store falls back to the file's modification time.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FrontMatter {
    title: String,
    author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<toml::value::Datetime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified: Option<toml::value::Datetime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tagline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

impl Entry {
    /// A fresh entry with no creation time yet; the store stamps it on save.
    pub fn new(title: &str, author: &str, content: &str) -> Self {
        Self {
            id: String::new(),
            title: title.to_string(),
            author: author.to_string(),
            created: NaiveDateTime::default(),
            modified: None,
            tagline: None,
            summary: None,
            content: content.to_string(),
            tags: Vec::new(),
            html: OnceLock::new(),
        }
    }

    pub fn with_created(mut self, created: NaiveDateTime) -> Self {
        self.created = created;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Parse an entry record. `fallback_created` is used when the front
    /// matter has no `created` key.
    pub fn parse(id: &str, source: &str, fallback_created: NaiveDateTime) -> Result<Self, EntryError> {
        let (front, body) = split_front_matter(source)?;
        let fm: FrontMatter = toml::from_str(front)?;
        let created = match &fm.created {
            Some(dt) => datetime_from_toml(dt)?,
            None => fallback_created,
        };
        let modified = fm.modified.as_ref().map(datetime_from_toml).transpose()?;
        Ok(Self {
            id: id.to_string(),
            title: fm.title,
            author: fm.author,
            created,
            modified,
            tagline: fm.tagline,
            summary: fm.summary,
            content: body.to_string(),
            tags: fm.tags,
            html: OnceLock::new(),
        })
    }

    /// Serialize back to the on-disk record format.
    pub fn to_source(&self) -> Result<String, EntryError> {
        let fm = FrontMatter {
            title: self.title.clone(),
            author: self.author.clone(),
            created: Some(datetime_to_toml(&self.created)?),
            modified: self.modified.as_ref().map(datetime_to_toml).transpose()?,
            tagline: self.tagline.clone(),
            summary: self.summary.clone(),
            tags: self.tags.clone(),
        };
        let front = toml::to_string(&fm)?;
        Ok(format!("{FENCE}\n{front}{FENCE}\n{}", self.content))
    }

    /// Body rendered to HTML. Rendered on first use, then kept.
    pub fn html(&self) -> &str {
        self.html.get_or_init(|| {
            let mut out = String::new();
            md_html::push_html(&mut out, Parser::new(&self.content));
            out
        })
    }

    /// The summary if one was written, otherwise the body up to the first
    /// blank line.
    pub fn excerpt(&self) -> &str {
        match &self.summary {
            Some(s) => s,
            None => self
                .content
                .trim_start()
                .split("\n\n")
                .next()
                .unwrap_or_default(),
        }
    }
}

fn split_front_matter(source: &str) -> Result<(&str, &str), EntryError> {
    let rest = source
        .strip_prefix(FENCE)
        .ok_or(EntryError::MissingFrontMatter)?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')).unwrap_or(rest);
    let close = find_closing_fence(rest).ok_or(EntryError::UnclosedFrontMatter)?;
    let front = &rest[..close];
    let after = &rest[close + FENCE.len()..];
    let body = after
        .strip_prefix("\r\n")
        .or_else(|| after.strip_prefix('\n'))
        .unwrap_or(after);
    Ok((front, body))
}

/// Byte offset of a `+++` line, which must start a line of its own.
fn find_closing_fence(s: &str) -> Option<usize> {
    if s.starts_with(FENCE) {
        return Some(0);
    }
    s.match_indices(&format!("\n{FENCE}"))
        .map(|(i, _)| i + 1)
        .next()
}

/// Convert a TOML datetime (offset, local, or date-only) to local wall time.
fn datetime_from_toml(dt: &toml::value::Datetime) -> Result<NaiveDateTime, EntryError> {
    parse_timestamp(&dt.to_string()).ok_or_else(|| EntryError::Date(dt.to_string()))
}

fn datetime_to_toml(dt: &NaiveDateTime) -> Result<toml::value::Datetime, EntryError> {
    let text = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    text.parse().map_err(|_| EntryError::Date(text))
}

/// Parse the timestamp forms accepted in front matter and on the command line:
/// `2024-01-15T09:30:00`, `2024-01-15 09:30:00`, RFC 3339 with an offset, or a
/// bare `2024-01-15` (midnight).
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(midnight)
}

/// Start of the given day.
pub fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).unwrap_or_default()
}

/// Local wall time of a file timestamp.
pub fn local_time(t: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(t).naive_local()
}

/// Current local time, truncated to whole seconds.
pub fn now() -> NaiveDateTime {
    local_time(SystemTime::now())
        .with_nanosecond(0)
        .unwrap_or_default()
}

/// Check an entry id: non-empty `/`-joined segments of `[A-Za-z0-9_-]`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.split('/').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}
