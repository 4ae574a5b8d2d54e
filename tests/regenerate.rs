//! End-to-end regeneration: a weblog tree in a temp directory, regenerated
//! through the public API, checked on disk.

use blotter::entry::parse_timestamp;
use blotter::publish::{PublishError, Published, Publisher};
use blotter::regen::{CancelToken, Mode, RegenError, RegenEvent, RegenOptions};
use blotter::store::Query;
use blotter::weblog::{Weblog, WeblogError};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const CONFIG: &str = r#"title = "Field Notes"
link = "https://notes.example"
lastn = 3

[authors.ada]
name = "Ada"
"#;

fn past() -> SystemTime {
    SystemTime::now() - Duration::from_secs(86_400)
}

fn future() -> SystemTime {
    SystemTime::now() + Duration::from_secs(3_600)
}

fn set_mtime(path: &Path, t: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(t)
        .unwrap();
}

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    set_mtime(&path, past());
    path
}

fn entry(root: &Path, id: &str, created: &str, author: &str, body: &str) -> PathBuf {
    write(
        root,
        &format!("entries/{id}.md"),
        &format!("+++\ntitle = \"{id}\"\nauthor = \"{author}\"\ncreated = {created}\n+++\n{body}\n"),
    )
}

/// Three entries across two months, with index, entry, daily and monthly
/// templates.
fn setup() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "blotter.toml", CONFIG);
    entry(root, "a", "2024-01-01T10:00:00", "ada", "First.");
    entry(root, "b", "2024-01-15T10:00:00", "ada", "Second.");
    entry(root, "c", "2024-02-01T10:00:00", "ada", "Third.");
    write(root, "skel/index.html.tpl", "# Field Notes\n");
    write(root, "skel/entry.html.tpl", "");
    write(root, "skel/daily/index.html.tpl", "");
    write(root, "skel/monthly/index.html.tpl", "");
    tmp
}

fn htdocs_files(root: &Path) -> Vec<String> {
    let htdocs = root.join("htdocs");
    let mut files: Vec<String> = walkdir::WalkDir::new(&htdocs)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(&htdocs).unwrap().to_string_lossy().replace('\\', "/"))
        .collect();
    files.sort();
    files
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join("htdocs").join(rel)).unwrap()
}

const ALL_PAGES: [&str; 9] = [
    "/2024/01/01.html",
    "/2024/01/15.html",
    "/2024/01/index.html",
    "/2024/02/01.html",
    "/2024/02/index.html",
    "/a.html",
    "/b.html",
    "/c.html",
    "/index.html",
];

// =============================================================================
// Full and incremental runs
// =============================================================================

#[test]
fn full_run_writes_every_page() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    let report = weblog.regenerate(Mode::Full).unwrap();

    assert_eq!(report.written, ALL_PAGES);
    assert_eq!(report.skipped, 0);
    let mut expected: Vec<String> = ALL_PAGES
        .iter()
        .map(|l| l.trim_start_matches('/').to_string())
        .collect();
    expected.push("sitemap.txt".into());
    expected.sort();
    assert_eq!(htdocs_files(tmp.path()), expected);

    let index = read(tmp.path(), "index.html");
    assert!(index.contains("<h1>Field Notes</h1>"));
    assert!(index.contains(r#"<a href="/c.html">c</a>"#));
    assert!(index.contains(r#"href="/2024/01/index.html""#));

    let b = read(tmp.path(), "b.html");
    assert!(b.contains(r#"href="/a.html""#));
    assert!(b.contains(r#"href="/c.html""#));

    let sitemap = read(tmp.path(), "sitemap.txt");
    assert!(sitemap.contains("https://notes.example/b.html\n"));
}

#[test]
fn full_run_is_idempotent() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    let first = weblog.regenerate(Mode::Full).unwrap();
    let snapshot: Vec<String> = ALL_PAGES
        .iter()
        .map(|l| read(tmp.path(), l.trim_start_matches('/')))
        .collect();

    let second = weblog.regenerate(Mode::Full).unwrap();
    assert_eq!(first.written, second.written);
    for (link, before) in ALL_PAGES.iter().zip(&snapshot) {
        assert_eq!(&read(tmp.path(), link.trim_start_matches('/')), before, "{link}");
    }
}

#[test]
fn full_run_is_stable_for_pages_without_entries() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "blotter.toml", CONFIG);
    write(tmp.path(), "skel/about.json.json", "");
    write(tmp.path(), "skel/index.json.json", "");
    let weblog = Weblog::open(tmp.path()).unwrap();

    weblog.regenerate(Mode::Full).unwrap();
    let about = read(tmp.path(), "about.json");
    let index = read(tmp.path(), "index.json");
    std::thread::sleep(Duration::from_millis(1_100));
    weblog.regenerate(Mode::Full).unwrap();

    assert_eq!(read(tmp.path(), "about.json"), about);
    assert_eq!(read(tmp.path(), "index.json"), index);
}

#[test]
fn update_after_full_run_skips_everything() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    weblog.regenerate(Mode::Full).unwrap();

    let sitemap = tmp.path().join("htdocs/sitemap.txt");
    set_mtime(&sitemap, past());
    let sitemap_mtime = fs::metadata(&sitemap).unwrap().modified().unwrap();

    let report = weblog.regenerate(Mode::Update).unwrap();
    assert!(report.written.is_empty(), "{:?}", report.written);
    assert_eq!(report.skipped, ALL_PAGES.len());
    assert_eq!(fs::metadata(&sitemap).unwrap().modified().unwrap(), sitemap_mtime);
}

#[test]
fn edited_entry_regenerates_only_its_pages() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    weblog.regenerate(Mode::Full).unwrap();

    let path = entry(tmp.path(), "b", "2024-01-15T10:00:00", "ada", "Second, revised.");
    set_mtime(&path, future());

    let report = weblog.regenerate(Mode::Update).unwrap();
    assert_eq!(
        report.written,
        ["/2024/01/15.html", "/2024/01/index.html", "/b.html", "/index.html"]
    );
    assert!(read(tmp.path(), "b.html").contains("Second, revised."));
}

#[test]
fn touched_but_unchanged_entry_regenerates_nothing() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    weblog.regenerate(Mode::Full).unwrap();

    set_mtime(&tmp.path().join("entries/b.md"), future());
    let report = weblog.regenerate(Mode::Update).unwrap();
    assert!(report.written.is_empty(), "{:?}", report.written);
}

#[test]
fn newer_template_regenerates_its_pages() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    weblog.regenerate(Mode::Full).unwrap();

    set_mtime(&tmp.path().join("skel/entry.html.tpl"), future());
    let report = weblog.regenerate(Mode::Update).unwrap();
    assert_eq!(report.written, ["/a.html", "/b.html", "/c.html"]);
}

#[test]
fn new_entry_is_picked_up() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    weblog.regenerate(Mode::Full).unwrap();

    let path = entry(tmp.path(), "d", "2024-02-03T10:00:00", "ada", "Fourth.");
    set_mtime(&path, future());
    let report = weblog.regenerate(Mode::Update).unwrap();
    assert!(report.written.contains(&"/d.html".to_string()));
    assert!(report.written.contains(&"/2024/02/03.html".to_string()));
    assert!(report.written.contains(&"/index.html".to_string()));
    assert!(!report.written.contains(&"/a.html".to_string()));
}

#[test]
fn regenerate_path_limits_scope() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    let report = weblog.regenerate_path("2024/01", Mode::Full).unwrap();
    assert_eq!(
        report.written,
        ["/2024/01/01.html", "/2024/01/15.html", "/2024/01/index.html"]
    );
    assert!(!tmp.path().join("htdocs/index.html").exists());
}

#[test]
fn regenerate_path_matches_whole_segments() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    assert!(weblog.regenerate_path("2024/0", Mode::Full).unwrap().written.is_empty());
    assert!(weblog.regenerate_path("inde", Mode::Full).unwrap().written.is_empty());
    assert_eq!(
        weblog.regenerate_path("index", Mode::Full).unwrap().written,
        ["/index.html"]
    );
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn unknown_author_aborts_before_any_write() {
    let tmp = setup();
    entry(tmp.path(), "rogue", "2024-01-20T10:00:00", "mallory", "Who?");
    let weblog = Weblog::open(tmp.path()).unwrap();

    let err = weblog.regenerate(Mode::Full).unwrap_err();
    assert!(matches!(
        err,
        WeblogError::Regen(RegenError::AuthorNotFound { ref author, .. }) if author == "mallory"
    ));
    assert!(htdocs_files(tmp.path()).is_empty());
}

#[test]
fn cancelled_run_writes_nothing() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = weblog
        .regenerate_with(&RegenOptions::new(Mode::Full).with_cancel(cancel), None)
        .unwrap_err();
    assert!(matches!(err, WeblogError::Regen(RegenError::Cancelled)));
    assert!(htdocs_files(tmp.path()).is_empty());
}

// =============================================================================
// Template overlap
// =============================================================================

#[test]
fn deeper_template_wins_and_html_is_canonical() {
    let tmp = setup();
    write(tmp.path(), "skel/daily.html.tpl", "shallow");
    write(tmp.path(), "skel/daily/index.html.tpl", "deep");
    write(tmp.path(), "skel/entry.json.tpl", "");
    let weblog = Weblog::open(tmp.path()).unwrap();
    weblog.regenerate(Mode::Full).unwrap();

    let day = read(tmp.path(), "2024/01/01.html");
    assert!(day.contains("<p>deep</p>"));
    assert!(!day.contains("shallow"));

    let json: serde_json::Value = serde_json::from_str(&read(tmp.path(), "a.json")).unwrap();
    assert_eq!(json["values"]["entry"]["link"], "/a.html");
    assert_eq!(weblog.entry_link("a").unwrap().as_deref(), Some("/a.html"));
}

// =============================================================================
// Events and publishers
// =============================================================================

#[test]
fn events_report_progress() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    weblog
        .regenerate_with(&RegenOptions::new(Mode::Full), Some(&tx))
        .unwrap();
    drop(tx);
    let events: Vec<RegenEvent> = rx.into_iter().collect();

    assert!(matches!(
        events.first(),
        Some(RegenEvent::MapBuilt { pages: 9, entries: 3 })
    ));
    let written = events
        .iter()
        .filter(|e| matches!(e, RegenEvent::Written { .. }))
        .count();
    assert_eq!(written, ALL_PAGES.len());
    assert!(events.iter().any(
        |e| matches!(e, RegenEvent::Published { publisher, .. } if publisher == "sitemap")
    ));
}

struct Recorder {
    watch: Vec<String>,
    runs: Mutex<Vec<usize>>,
}

impl Publisher for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn watch(&self) -> Option<&[String]> {
        Some(&self.watch)
    }

    fn publish(&self, published: &Published, _htdocs: &Path) -> Result<(), PublishError> {
        self.runs.lock().push(published.len());
        Ok(())
    }
}

#[test]
fn watching_publisher_runs_only_for_its_group() {
    let tmp = setup();
    let mut weblog = Weblog::open(tmp.path()).unwrap();
    let recorder = Arc::new(Recorder {
        watch: vec!["entry".into()],
        runs: Mutex::new(Vec::new()),
    });
    weblog.add_publisher(recorder.clone());

    weblog.regenerate(Mode::Full).unwrap();
    weblog.regenerate(Mode::Update).unwrap();
    set_mtime(&tmp.path().join("skel/index.html.tpl"), future());
    weblog.regenerate(Mode::Update).unwrap();

    assert_eq!(*recorder.runs.lock(), [ALL_PAGES.len()]);
}

// =============================================================================
// Storage facade
// =============================================================================

#[test]
fn find_and_lastn_through_the_weblog() {
    let tmp = setup();
    let weblog = Weblog::open(tmp.path()).unwrap();
    let ids = |q: Query| -> Vec<String> {
        weblog.find(&q).unwrap().into_iter().map(|r| r.id).collect()
    };

    assert_eq!(ids(Query::new().after(parse_timestamp("2024-01-10").unwrap())), ["c", "b"]);
    assert_eq!(ids(Query::new().lastn(2)), ["c", "b"]);
    let jan = weblog
        .within(
            parse_timestamp("2024-01-01").unwrap(),
            parse_timestamp("2024-01-31T23:59:59").unwrap(),
        )
        .unwrap();
    assert_eq!(jan.len(), 2);
}
