//! Discovery of `spec.yml` files below a search root.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::types::PackageSpec;
use crate::consts::SPEC_FILE_NAME;

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("search root {path} does not exist")]
  MissingRoot { path: PathBuf },

  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

/// Walks a directory tree collecting package specs.
#[derive(Debug, Clone)]
pub struct Loader {
  root: PathBuf,
}

impl Loader {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Parses every spec file below the root.
  ///
  /// Files that fail to read or parse are logged and skipped. The result is
  /// sorted by spec path so repeated runs see the same order.
  pub fn load(&self) -> Result<Vec<PackageSpec>, LoadError> {
    if !self.root.exists() {
      return Err(LoadError::MissingRoot { path: self.root.clone() });
    }

    let mut specs = Vec::new();
    for entry in WalkDir::new(&self.root).sort_by_file_name() {
      let entry = entry.map_err(|source| LoadError::Walk {
        path: self.root.clone(),
        source,
      })?;
      if !entry.file_type().is_file() || entry.file_name() != SPEC_FILE_NAME {
        continue;
      }

      match load_file(entry.path()) {
        Ok(spec) => {
          debug!(package = %spec.name, path = %entry.path().display(), "loaded spec");
          specs.push(spec);
        }
        Err(e) => {
          warn!(path = %entry.path().display(), error = %e, "skipping unparsable spec");
        }
      }
    }

    Ok(specs)
  }
}

/// Reads one spec file and records the directory it came from.
fn load_file(path: &Path) -> Result<PackageSpec, LoadError> {
  let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let mut spec = PackageSpec::from_yaml(&content).map_err(|source| LoadError::Parse {
    path: path.to_path_buf(),
    source,
  })?;

  let dir = path.parent().unwrap_or(Path::new("."));
  spec.spec_root = dunce::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
  Ok(spec)
}

/// Picks the specs whose names appear in `names`, or all of them when `names` is empty.
///
/// Unknown names are logged and otherwise ignored.
pub fn select_packages(loaded: Vec<PackageSpec>, names: &[String]) -> Vec<PackageSpec> {
  if names.is_empty() {
    return loaded;
  }

  for name in names {
    if !loaded.iter().any(|spec| &spec.name == name) {
      warn!(package = %name, "no spec found for package");
    }
  }

  loaded.into_iter().filter(|spec| names.contains(&spec.name)).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn write_spec(root: &Path, dir: &str, content: &str) {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(SPEC_FILE_NAME), content).unwrap();
  }

  #[test]
  fn finds_nested_specs_and_sets_root() {
    let temp = TempDir::new().unwrap();
    write_spec(temp.path(), "consul", "name: consul\nversion: 0.6.4\n");
    write_spec(temp.path(), "tools/jq", "name: jq\n");
    std::fs::write(temp.path().join("README.md"), "not a spec").unwrap();

    let specs = Loader::new(temp.path()).load().unwrap();
    let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["consul", "jq"]);

    let jq_root = dunce::canonicalize(temp.path().join("tools/jq")).unwrap();
    assert_eq!(specs[1].spec_root, jq_root);
  }

  #[test]
  #[traced_test]
  fn skips_broken_specs() {
    let temp = TempDir::new().unwrap();
    write_spec(temp.path(), "good", "name: good\n");
    write_spec(temp.path(), "bad", "name: [unterminated\n");

    let specs = Loader::new(temp.path()).load().unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].name, "good");
    assert!(logs_contain("skipping unparsable spec"));
    assert!(logs_contain("failed to parse"));
  }

  #[test]
  fn load_file_reports_which_file_failed() {
    let temp = TempDir::new().unwrap();
    write_spec(temp.path(), "bad", "name: [unterminated\n");
    let bad = temp.path().join("bad").join(SPEC_FILE_NAME);

    let err = load_file(&bad).unwrap_err();
    assert!(matches!(err, LoadError::Parse { ref path, .. } if path == &bad));
    assert!(std::error::Error::source(&err).is_some());
    assert!(err.to_string().contains("failed to parse"));

    let missing = temp.path().join("missing").join(SPEC_FILE_NAME);
    let err = load_file(&missing).unwrap_err();
    assert!(matches!(err, LoadError::Read { ref source, .. } if source.kind() == std::io::ErrorKind::NotFound));
  }

  #[test]
  fn missing_root_is_an_error() {
    let temp = TempDir::new().unwrap();
    let err = Loader::new(temp.path().join("nope")).load().unwrap_err();
    assert!(matches!(err, LoadError::MissingRoot { .. }));
  }

  #[test]
  #[traced_test]
  fn select_filters_by_name() {
    let specs = vec![
      PackageSpec {
        name: "a".into(),
        ..Default::default()
      },
      PackageSpec {
        name: "b".into(),
        ..Default::default()
      },
    ];

    let all = select_packages(specs.clone(), &[]);
    assert_eq!(all.len(), 2);

    let picked = select_packages(specs, &["b".to_string(), "zzz".to_string()]);
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].name, "b");
    assert!(logs_contain("no spec found for package"));
  }
}
