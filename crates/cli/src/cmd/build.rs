//! Implementation of the `hammer build` command.
//!
//! Loads every spec under the search directory, expands the selected packages
//! into a variant forest and schedules it against the fpm packager.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{error, info, warn};

use hammer_lib::build::PackageBuilder;
use hammer_lib::cache::FsCache;
use hammer_lib::cancel::cancel_pair;
use hammer_lib::config::{BuildConfig, parse_package_types};
use hammer_lib::fetch::Fetcher;
use hammer_lib::package::FpmPackager;
use hammer_lib::schedule::{Outcome, ScheduleResult, schedule};
use hammer_lib::spec::{Forest, Loader, PackageSpec, select_packages};

use crate::output::{format_duration, print_error, print_info, print_stat, print_success, print_warning};

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Only build these packages (default: all found)
  pub packages: Vec<String>,

  /// Skip these packages
  #[arg(long, value_delimiter = ',')]
  pub exclude: Vec<String>,

  /// Where to look for package specs
  #[arg(long, default_value = ".", env = "HAMMER_SEARCH")]
  pub search: PathBuf,

  /// Where to place finished packages
  #[arg(long, default_value = "out", env = "HAMMER_OUTPUT")]
  pub output: PathBuf,

  /// Where to write build script logs
  #[arg(long, env = "HAMMER_LOGS")]
  pub logs: Option<PathBuf>,

  /// Resource download cache directory
  #[arg(long, env = "HAMMER_CACHE")]
  pub cache: Option<PathBuf>,

  /// Shell used to run build scripts
  #[arg(long, env = "HAMMER_SHELL")]
  pub shell: Option<String>,

  /// Package types to produce when a spec names none, e.g. "rpm,deb"
  #[arg(long = "type", env = "HAMMER_TYPE")]
  pub package_type: Option<String>,

  /// Maximum number of variants built at once
  #[arg(long, env = "HAMMER_CONCURRENT_JOBS")]
  pub concurrent_jobs: Option<usize>,

  /// Path to the fpm executable
  #[arg(long, default_value = "fpm", env = "HAMMER_FPM")]
  pub fpm: String,

  /// Log level passed to fpm
  #[arg(long, default_value = "warn", env = "HAMMER_FPM_LOG_LEVEL")]
  pub fpm_log_level: String,

  /// Echo build script output while it runs
  #[arg(long, env = "HAMMER_STREAM_OUTPUT")]
  pub stream_output: bool,
}

impl BuildArgs {
  /// Overlays the flags onto the default configuration.
  fn config(&self) -> BuildConfig {
    let mut config = BuildConfig {
      shell: self.shell.clone(),
      output_dir: self.output.clone(),
      fpm: self.fpm.clone(),
      fpm_log_level: self.fpm_log_level.clone(),
      stream_output: self.stream_output,
      ..Default::default()
    };
    if let Some(logs) = &self.logs {
      config.log_dir = logs.clone();
    }
    if let Some(cache) = &self.cache {
      config.cache_dir = cache.clone();
    }
    if let Some(types) = &self.package_type {
      config.package_types = parse_package_types(types);
    }
    if let Some(jobs) = self.concurrent_jobs {
      config.concurrency = jobs;
    }
    config
  }
}

/// Execute the build command.
///
/// Returns `Ok(false)` when any variant failed, was skipped or the run was
/// interrupted.
pub fn cmd_build(args: BuildArgs) -> Result<bool> {
  let start = Instant::now();
  let config = args.config();

  let search = dunce::canonicalize(&args.search)
    .with_context(|| format!("Search directory not found: {}", args.search.display()))?;
  let loaded = Loader::new(&search).load().context("Failed to load package specs")?;
  let mut selected = select_packages(loaded, &args.packages);
  selected.retain(|spec| !args.exclude.contains(&spec.name));

  if selected.is_empty() {
    print_warning("No packages to build");
    return Ok(true);
  }

  let (forest, expanded) = expand_all(&selected);
  if forest.is_empty() {
    print_error("No package could be expanded");
    return Ok(false);
  }

  std::fs::create_dir_all(&config.output_dir)
    .with_context(|| format!("Failed to create output directory: {}", config.output_dir.display()))?;

  let cache = FsCache::new(&config.cache_dir).context("Failed to open resource cache")?;
  let packager = FpmPackager::new(&config.fpm, &config.fpm_log_level);
  let concurrency = config.concurrency;
  let builder = Arc::new(PackageBuilder::new(config, Fetcher::new(cache), packager));
  let forest = Arc::new(forest);
  let roots = forest.roots().to_vec();

  print_info(&format!(
    "Building {} package(s), {} variant(s)",
    roots.len(),
    forest.total(&roots)
  ));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt.block_on(async {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, waiting for running builds to finish");
        handle.cancel();
      }
    });
    schedule(Arc::clone(&forest), &roots, builder, concurrency, token).await
  });

  print_summary(&result, start.elapsed());
  Ok(expanded && result.is_success())
}

/// Expands each spec into one forest. A spec that fails to expand is left
/// out entirely; the flag is false if that happened.
fn expand_all(specs: &[PackageSpec]) -> (Forest, bool) {
  let mut forest = Forest::new();
  let mut ok = true;
  for spec in specs {
    match forest.expand(spec, None) {
      Ok(id) => info!(package = %spec.name, variants = 1 + forest.descendant_count(id), "expanded package"),
      Err(e) => {
        error!(package = %spec.name, error = %e, "could not expand package");
        ok = false;
      }
    }
  }
  (forest, ok)
}

fn print_summary(result: &ScheduleResult, elapsed: Duration) {
  println!();
  for r in &result.results {
    match &r.outcome {
      Outcome::Built => {}
      Outcome::Failed(message) => print_error(&format!("{}: {message}", r.label)),
      Outcome::Skipped { .. } => print_warning(&format!("{}: skipped, parent failed", r.label)),
    }
  }

  if result.cancelled {
    print_warning("Build interrupted");
  } else if result.is_success() {
    print_success("Build complete!");
  }
  print_stat("Built", &result.built().to_string());
  print_stat("Failed", &result.failed().to_string());
  print_stat("Skipped", &result.skipped().to_string());
  print_stat("Duration", &format_duration(elapsed));
}
