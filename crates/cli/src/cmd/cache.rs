use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;

use hammer_lib::cache::FsCache;
use hammer_lib::fetch::url_from_key;
use hammer_lib::platform::paths;

use crate::output::{OutputFormat, format_bytes, print_info, print_json, print_stat, print_success};

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// List cached resources
  List {
    /// Resource download cache directory
    #[arg(long, env = "HAMMER_CACHE")]
    cache: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Remove cached resources
  Clear {
    /// Resource download cache directory
    #[arg(long, env = "HAMMER_CACHE")]
    cache: Option<PathBuf>,

    /// Only remove entries older than this (e.g. "7d", "24h")
    #[arg(long, value_parser = humantime::parse_duration)]
    older_than: Option<Duration>,
  },
}

#[derive(Debug, Serialize)]
struct EntryView {
  url: String,
  key: String,
  size: u64,
  modified: String,
}

pub fn cmd_cache(command: CacheCommand) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  match command {
    CacheCommand::List { cache, output } => {
      let cache = open(cache)?;
      let entries = rt.block_on(cache.entries()).context("Failed to read cache")?;
      let views: Vec<EntryView> = entries
        .into_iter()
        .map(|e| EntryView {
          url: url_from_key(&e.key),
          size: e.size,
          modified: humantime::format_rfc3339_seconds(e.modified).to_string(),
          key: e.key,
        })
        .collect();

      if output.is_json() {
        print_json(&views)?;
        return Ok(());
      }
      if views.is_empty() {
        print_info(&format!("Cache at {} is empty", cache.root().display()));
        return Ok(());
      }
      for view in &views {
        println!("{}", view.url);
        print_stat("size", &format_bytes(view.size));
        print_stat("modified", &view.modified);
      }
    }
    CacheCommand::Clear { cache, older_than } => {
      let cache = open(cache)?;
      let removed = rt.block_on(cache.clear(older_than)).context("Failed to clear cache")?;
      print_success(&format!("Removed {removed} cached resource(s)"));
    }
  }

  Ok(())
}

fn open(dir: Option<PathBuf>) -> Result<FsCache> {
  let dir = dir.unwrap_or_else(paths::downloads_dir);
  FsCache::new(&dir).with_context(|| format!("Failed to open cache at {}", dir.display()))
}
