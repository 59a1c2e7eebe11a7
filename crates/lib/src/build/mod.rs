//! Building one variant: setup, resources, build script, packaging.
//!
//! [`PackageBuilder`] is the production [`VariantBuilder`]. For each variant
//! it creates private scratch directories, fetches and places resources, runs
//! the `build` script (if any) with its output fanned out to the configured
//! consumers, then invokes the packager once per requested output type.
//! Templates are never built: they resolve immediately so their children can
//! be scheduled.
//!
//! # Submodules
//!
//! - [`resources`] - writing and unpacking downloaded resources
//! - [`script`] - build script subprocess

pub mod resources;
pub mod script;

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cache::Cache;
use crate::config::BuildConfig;
use crate::consts::BUILD_SCRIPT;
use crate::fetch::{FetchError, Fetcher};
use crate::logs::{FileConsumer, LogError, PassthroughConsumer, RollupConsumer, Stream};
use crate::package::{PackageError, PackageRequest, Packager};
use crate::schedule::VariantBuilder;
use crate::spec::{PackageSpec, ResourceDescriptor, Variant};
use crate::template::{SpecContext, TemplateError, render};

use self::resources::{ResourceError, unpack_archive, write_resource};
use self::script::{ScriptCommand, ScriptError, ScriptProcess, write_script};

/// Errors that can occur while building a single variant.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("template error: {0}")]
  Template(#[from] TemplateError),

  #[error("fetch failed: {0}")]
  Fetch(#[from] FetchError),

  #[error("resource error: {0}")]
  Resource(#[from] ResourceError),

  #[error("build script error: {0}")]
  Script(#[from] ScriptError),

  /// The build script exited unsuccessfully.
  #[error("build script exited with code {code:?}")]
  ScriptFailed { code: Option<i32>, stderr: String },

  #[error("packaging failed: {0}")]
  Package(#[from] PackageError),

  #[error("log error: {0}")]
  Log(#[from] LogError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Scratch directories owned by one build. Removed on drop.
#[derive(Debug)]
pub struct BuildDirs {
  build: TempDir,
  scripts: TempDir,
  targets: TempDir,
  empty: TempDir,
}

impl BuildDirs {
  pub fn create(name: &str) -> std::io::Result<Self> {
    let make = |kind: &str| tempfile::Builder::new().prefix(&format!("hammer-{kind}-{name}-")).tempdir();
    Ok(Self {
      build: make("build")?,
      scripts: make("scripts")?,
      targets: make("targets")?,
      empty: make("empty")?,
    })
  }

  pub fn build_root(&self) -> &Path {
    self.build.path()
  }

  pub fn script_root(&self) -> &Path {
    self.scripts.path()
  }

  pub fn target_root(&self) -> &Path {
    self.targets.path()
  }

  pub fn empty_dir(&self) -> &Path {
    self.empty.path()
  }
}

/// Builds variants with downloaded resources, a shell and a packager.
#[derive(Debug)]
pub struct PackageBuilder<C, P> {
  config: BuildConfig,
  output_dir: PathBuf,
  fetcher: Fetcher<C>,
  packager: P,
}

impl<C: Cache, P: Packager> PackageBuilder<C, P> {
  pub fn new(config: BuildConfig, fetcher: Fetcher<C>, packager: P) -> Self {
    // Scripts run from the build root, so OUTPUT_ROOT must not be relative.
    let output_dir = std::path::absolute(&config.output_dir).unwrap_or_else(|_| config.output_dir.clone());
    Self {
      config,
      output_dir,
      fetcher,
      packager,
    }
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  pub fn packager(&self) -> &P {
    &self.packager
  }

  async fn build(&self, variant: &Variant) -> Result<(), BuildError> {
    let spec = variant.spec();
    if variant.is_template() {
      if spec.build_script().is_some() || !spec.resources.is_empty() {
        warn!("template declares a build script or resources, ignoring them");
      }
      info!("template variant, nothing to build");
      return Ok(());
    }

    let dirs = BuildDirs::create(&spec.name)?;
    debug!(build_root = %dirs.build_root().display(), "created build directories");

    self.place_resources(spec, &dirs).await?;

    match spec.build_script() {
      Some(body) => self.run_build_script(variant, body, &dirs).await?,
      None => debug!("no build script"),
    }

    self.package(spec, &dirs).await
  }

  async fn place_resources(&self, spec: &PackageSpec, dirs: &BuildDirs) -> Result<(), BuildError> {
    let ctx = SpecContext::new(spec).with_build_dirs(dirs.build_root(), dirs.empty_dir());

    for resource in &spec.resources {
      let url = effective_url(resource, &ctx);
      let bytes = self.fetcher.fetch(resource, &url).await?;
      let file_name = ResourceDescriptor::file_name(&url);
      write_resource(dirs.build_root(), &file_name, &bytes)?;
      debug!(resource = %file_name, size = bytes.len(), "placed resource");

      if resource.unpack {
        let dest = dirs.build_root().to_path_buf();
        tokio::task::spawn_blocking(move || unpack_archive(&file_name, &bytes, &dest))
          .await
          .map_err(std::io::Error::other)??;
      }
    }

    Ok(())
  }

  async fn run_build_script(&self, variant: &Variant, body: &str, dirs: &BuildDirs) -> Result<(), BuildError> {
    let spec = variant.spec();
    let ctx = SpecContext::new(spec).with_build_dirs(dirs.build_root(), dirs.empty_dir());
    let script = write_script(dirs.script_root(), BUILD_SCRIPT, &render(body, &ctx)?)?;

    let mut process = ScriptProcess::spawn(&ScriptCommand {
      shell: self.config.shell.clone(),
      script,
      build_root: dirs.build_root().to_path_buf(),
      spec_root: spec.spec_root.clone(),
      output_root: self.output_dir.clone(),
    })?;

    let mut rollup = RollupConsumer::attach(&mut process.mux)?;
    let mut files = FileConsumer::attach(&mut process.mux, &self.config.log_dir, &variant.label()).await?;
    let mut passthrough = if self.config.stream_output {
      Some(PassthroughConsumer::stdio(&mut process.mux)?)
    } else {
      None
    };

    info!("running build script");
    process.mux.start()?;
    let status = process.wait().await?;

    rollup.finish().await;
    if let Err(e) = files.finish().await {
      warn!(error = %e, "could not write build log");
    }
    if let Some(passthrough) = passthrough.as_mut()
      && let Err(e) = passthrough.finish().await
    {
      warn!(error = %e, "could not echo build output");
    }

    if status.success() {
      info!("build script succeeded");
      return Ok(());
    }

    error!(code = ?status.code(), "build script failed");
    replay_logs(&files).await;
    Err(BuildError::ScriptFailed {
      code: status.code(),
      stderr: rollup.snapshot(Stream::Stderr),
    })
  }

  async fn package(&self, spec: &PackageSpec, dirs: &BuildDirs) -> Result<(), BuildError> {
    let types = spec.package_types().unwrap_or_else(|| self.config.package_types.clone());

    for package_type in &types {
      let output = self
        .packager
        .package(PackageRequest {
          spec,
          package_type,
          build_root: dirs.build_root(),
          script_root: dirs.script_root(),
          target_root: dirs.target_root(),
          empty_dir: dirs.empty_dir(),
          output_dir: &self.output_dir,
        })
        .await?;
      info!(package_type = %package_type, "packaged");
      if !output.output.is_empty() {
        debug!(output = %output.output.trim_end(), "packager output");
      }
    }

    Ok(())
  }
}

impl<C, P> VariantBuilder for PackageBuilder<C, P>
where
  C: Cache + 'static,
  P: Packager + 'static,
{
  type Error = BuildError;

  async fn build_variant(&self, variant: &Variant) -> Result<(), BuildError> {
    let spec = variant.spec();
    let span = info_span!("variant", name = %spec.name, arch = %spec.architecture);
    self.build(variant).instrument(span).await
  }
}

/// Renders the resource URL, falling back to the raw value when it is not a
/// valid template (URLs may legitimately contain `$$`).
fn effective_url(resource: &ResourceDescriptor, ctx: &SpecContext<'_>) -> String {
  match render(&resource.url, ctx) {
    Ok(url) => url,
    Err(e) => {
      warn!(url = %resource.url, error = %e, "could not render resource url, using raw value");
      resource.url.clone()
    }
  }
}

/// Re-emits a failed build's captured output at error level.
async fn replay_logs(files: &FileConsumer) {
  for stream in [Stream::Stdout, Stream::Stderr] {
    match files.replay(stream).await {
      Ok(content) => {
        for line in content.lines() {
          error!(%stream, "{line}");
        }
      }
      Err(e) => warn!(%stream, error = %e, "could not replay build log"),
    }
  }
}
