use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::parse_package_types;
use crate::consts::BUILD_SCRIPT;

/// Lifecycle scripts keyed by name (`build`, `after-install`, ...).
///
/// A `BTreeMap` keeps packager arguments in a stable order.
pub type Scripts = BTreeMap<String, String>;

/// A remote file a build needs, verified by checksum before use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResourceDescriptor {
  pub url: String,
  /// `md5` or `sha1`. Anything else fails at fetch time.
  pub hash_type: String,
  /// Lowercase hex digest of the expected content.
  pub hash: String,
  /// Extract the archive into the build root after download.
  pub unpack: bool,
}

impl ResourceDescriptor {
  /// The last path segment of the effective URL, e.g. `source.tgz` for
  /// `http://example.com/dist/source.tgz?mirror=1`.
  pub fn file_name(effective_url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(effective_url)
      && let Some(last) = parsed.path_segments().and_then(|mut s| s.next_back())
      && !last.is_empty()
    {
      return last.to_string();
    }

    let without_query = effective_url.split(['?', '#']).next().unwrap_or(effective_url);
    without_query.rsplit('/').next().unwrap_or(without_query).to_string()
  }
}

/// A file mapping handed to the packager as `src=dest`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
  pub src: String,
  pub dest: String,
  /// Render the source file's content as a template before packaging.
  pub template: bool,
  /// Mark `dest` as a configuration file.
  pub config: bool,
}

/// Ownership and mode applied to one packaged file (rpm only).
///
/// Empty parts fall back to the packager's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAttr {
  pub file: String,
  pub mode: String,
  pub user: String,
  pub group: String,
}

/// One node of a declarative package description.
///
/// A spec with a non-empty `multi` list is a template: its expanded
/// descendants are packaged, the template itself never is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PackageSpec {
  pub name: String,
  pub version: String,
  pub iteration: String,
  pub epoch: String,
  pub architecture: String,
  pub vendor: String,
  pub license: String,
  pub url: String,
  pub description: String,
  pub depends: Vec<String>,
  /// Packages this one replaces.
  pub obsoletes: Vec<String>,
  pub attrs: Vec<FileAttr>,
  pub resources: Vec<ResourceDescriptor>,
  pub targets: Vec<Target>,
  pub scripts: Scripts,
  pub extra_args: String,
  /// Comma separated output formats, e.g. `rpm,deb`.
  #[serde(rename = "type")]
  pub package_type: String,
  pub multi: Vec<PackageSpec>,

  /// Directory the spec was loaded from. Set by the loader, inherited by children.
  #[serde(skip)]
  pub spec_root: PathBuf,
}

impl PackageSpec {
  /// Every field a child variant may inherit from its parent, in overlay order.
  pub const INHERITED: [&'static str; 18] = [
    "architecture",
    "attrs",
    "depends",
    "description",
    "epoch",
    "extra-args",
    "iteration",
    "license",
    "multi",
    "name",
    "obsoletes",
    "resources",
    "scripts",
    "targets",
    "type",
    "url",
    "vendor",
    "version",
  ];

  pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(content)
  }

  pub fn is_template(&self) -> bool {
    !self.multi.is_empty()
  }

  pub fn build_script(&self) -> Option<&str> {
    self.scripts.get(BUILD_SCRIPT).map(String::as_str)
  }

  /// Output formats requested by this spec, or `None` if it names none.
  pub fn package_types(&self) -> Option<Vec<String>> {
    let types = parse_package_types(&self.package_type);
    if types.is_empty() { None } else { Some(types) }
  }
}
