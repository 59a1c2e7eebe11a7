//! Turning a built variant into distributable packages.

mod fpm;

use std::future::Future;
use std::path::Path;

use thiserror::Error;

use crate::spec::PackageSpec;
use crate::template::TemplateError;

pub use fpm::FpmPackager;

/// Lifecycle scripts a package may carry besides `build`.
pub const LIFECYCLE_SCRIPTS: [&str; 6] = [
  "before-install",
  "after-install",
  "before-remove",
  "after-remove",
  "before-upgrade",
  "after-upgrade",
];

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("invalid script name '{name}'")]
  InvalidScriptName { name: String },

  #[error("field '{field}' is required")]
  MissingField { field: &'static str },

  #[error("could not split extra args: {args}")]
  ExtraArgs { args: String },

  #[error("template error: {0}")]
  Template(#[from] TemplateError),

  #[error("packager exited with code {code:?}:\n{output}")]
  Failed { code: Option<i32>, output: String },

  #[error("failed to run packager '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Everything a packager needs to produce one output type for one variant.
#[derive(Debug, Clone, Copy)]
pub struct PackageRequest<'a> {
  pub spec: &'a PackageSpec,
  pub package_type: &'a str,
  pub build_root: &'a Path,
  pub script_root: &'a Path,
  pub target_root: &'a Path,
  pub empty_dir: &'a Path,
  pub output_dir: &'a Path,
}

/// Result of a successful packaging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOutput {
  pub package_type: String,
  /// Combined stdout/stderr of the packaging tool.
  pub output: String,
}

pub trait Packager: Send + Sync {
  fn package(&self, request: PackageRequest<'_>) -> impl Future<Output = Result<PackageOutput, PackageError>> + Send;
}
