//! Settings shared by every build of one run.

use std::path::PathBuf;

use crate::consts::DEFAULT_PACKAGE_TYPES;
use crate::platform::paths;

/// Configuration for building variants.
///
/// Built once by the caller and handed to the builder; never mutated while
/// a schedule is running.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Shell used for build scripts.
  /// If None, uses /bin/sh (Unix) or powershell.exe (Windows). The SHELL
  /// environment variable is not consulted.
  pub shell: Option<String>,

  /// Directory receiving finished packages.
  pub output_dir: PathBuf,

  /// Directory receiving per-build stdout/stderr logs.
  pub log_dir: PathBuf,

  /// Directory of the resource download cache.
  pub cache_dir: PathBuf,

  /// Output formats used when a variant names none.
  pub package_types: Vec<String>,

  /// Path or name of the `fpm` executable.
  pub fpm: String,

  /// Value of fpm's `--log` flag.
  pub fpm_log_level: String,

  /// Echo build script output to our own stdout/stderr.
  pub stream_output: bool,

  /// Maximum number of variants built at once.
  pub concurrency: usize,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      shell: None,
      output_dir: PathBuf::from("out"),
      log_dir: paths::logs_dir(),
      cache_dir: paths::downloads_dir(),
      package_types: parse_package_types(DEFAULT_PACKAGE_TYPES),
      fpm: "fpm".to_string(),
      fpm_log_level: "warn".to_string(),
      stream_output: false,
      concurrency: num_cpus(),
    }
  }
}

/// Splits a comma separated list like `rpm,deb`, dropping blanks.
pub fn parse_package_types(list: &str) -> Vec<String> {
  list
    .split(',')
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .map(str::to_string)
    .collect()
}

/// Get the number of CPUs for default concurrency.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
