use blotter::entry::parse_timestamp;
use blotter::regen::{Mode, RegenOptions};
use blotter::store::Query;
use blotter::weblog::Weblog;
use blotter::{config, output};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blotter")]
#[command(about = "File-based weblog with incremental regeneration")]
#[command(long_about = "\
File-based weblog with incremental regeneration

Entries are markdown files with TOML front matter. Templates in skel/ are
expanded into pages by handlers picked from their path, and only pages whose
template or entries changed are rewritten.

Weblog structure:

  myblog/
  ├── blotter.toml                 # Weblog config (optional)
  ├── entries/
  │   ├── hello.md                 # Entry `hello`
  │   └── travel/kyoto.md          # Entry `travel/kyoto` in section `travel`
  ├── skel/
  │   ├── index.html.tpl           # → /index.html, newest entries
  │   ├── entry.html.tpl           # → one page per entry
  │   ├── daily/index.html.tpl     # → /YYYY/MM/DD.html
  │   ├── monthly/index.html.tpl   # → /YYYY/MM/index.html
  │   ├── yearly/index.html.tpl    # → /YYYY/index.html
  │   ├── section/index.html.tpl   # → /<section>/index.html
  │   ├── tags/index.html.tpl      # → /tags/<tag>/index.html
  │   └── about.html.tpl           # No handler: rendered once as /about.html
  └── htdocs/                      # Generated site

Entry format:

  +++
  title = \"Kyoto in the rain\"
  author = \"admin\"
  created = 2024-01-15T09:30:00
  tags = [\"travel\"]
  +++
  The body, in markdown.

Run 'blotter gen-config' to generate a documented blotter.toml.")]
#[command(version)]
struct Cli {
    /// Weblog root directory
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Regenerate pages whose template or entries changed
    Regen {
        /// Rebuild every page regardless of staleness
        #[arg(long)]
        full: bool,
        /// Only pages whose link lies under this path (e.g. `2024/01`)
        path: Option<String>,
    },
    /// List entries, newest first
    List {
        /// Include entries in ignored sections
        #[arg(long)]
        all: bool,
        /// Only entries in this section
        #[arg(long)]
        inpath: Option<String>,
        /// Only entries created at or after this time
        #[arg(long, value_parser = parse_date)]
        after: Option<NaiveDateTime>,
        /// Only entries created at or before this time
        #[arg(long, value_parser = parse_date)]
        before: Option<NaiveDateTime>,
        /// Only entries whose id matches this regex
        #[arg(long, value_parser = parse_regex)]
        matching: Option<Regex>,
        /// At most this many entries
        #[arg(long)]
        lastn: Option<usize>,
    },
    /// Show every page the templates produce
    Pages,
    /// Load every entry and validate its author
    Check,
    /// Print a stock blotter.toml with all options documented
    GenConfig,
}

fn parse_date(s: &str) -> Result<NaiveDateTime, String> {
    parse_timestamp(s).ok_or_else(|| format!("not a date: `{s}` (try 2024-01-15 or 2024-01-15T09:30:00)"))
}

fn parse_regex(s: &str) -> Result<Regex, String> {
    Regex::new(s).map_err(|e| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Regen { full, path } => {
            let weblog = Weblog::open(&cli.root)?;
            let mode = if full { Mode::Full } else { Mode::Update };
            let mut opts = RegenOptions::new(mode);
            if let Some(path) = &path {
                opts = opts.under(path);
            }

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_regen_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let result = weblog.regenerate_with(&opts, Some(&tx));
            drop(tx);
            printer.join().unwrap();
            output::print_report(&result?);
        }
        Command::List {
            all,
            inpath,
            after,
            before,
            matching,
            lastn,
        } => {
            let weblog = Weblog::open(&cli.root)?;
            let query = Query {
                all,
                after,
                before,
                inpath,
                matching,
                lastn,
            };
            output::print_listing(&weblog.find(&query)?);
        }
        Command::Pages => {
            let weblog = Weblog::open(&cli.root)?;
            let map = weblog.output_map()?;
            output::print_pages(&map, &weblog.skel_dir());
        }
        Command::Check => {
            println!("==> Checking {}", cli.root.display());
            let weblog = Weblog::open(&cli.root)?;
            let count = weblog.check()?;
            println!("==> {} entries are valid", count);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
