//! Placing downloaded resources into a build root.
//!
//! Archives flagged for unpacking are extracted next to the downloaded file.
//! When every entry lives under one top-level directory (the usual
//! `project-1.2.3/` layout) that directory is stripped.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ResourceError {
  #[error("unsupported archive format: {0}")]
  UnsupportedArchive(String),

  #[error("invalid archive entry in {archive}: {message}")]
  InvalidEntry { archive: String, message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Writes `bytes` to `build_root/file_name` and returns the path.
pub fn write_resource(build_root: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ResourceError> {
  let dest = build_root.join(file_name);
  fs::write(&dest, bytes)?;
  Ok(dest)
}

/// Extracts `bytes` (named `file_name`) into `dest`.
pub fn unpack_archive(file_name: &str, bytes: &[u8], dest: &Path) -> Result<(), ResourceError> {
  fs::create_dir_all(dest)?;

  if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
    let paths = tar_paths(GzDecoder::new(bytes), file_name)?;
    unpack_tar(GzDecoder::new(bytes), dest, strip_count(&paths))?;
  } else if file_name.ends_with(".tar") {
    let paths = tar_paths(bytes, file_name)?;
    unpack_tar(bytes, dest, strip_count(&paths))?;
  } else if file_name.ends_with(".zip") {
    unpack_zip(bytes, dest, file_name)?;
  } else {
    return Err(ResourceError::UnsupportedArchive(file_name.to_string()));
  }

  info!(archive = %file_name, dest = %dest.display(), "unpacked resource");
  Ok(())
}

/// 1 when all paths share a single top-level directory, else 0.
fn strip_count(paths: &[PathBuf]) -> usize {
  let roots: BTreeSet<_> = paths.iter().filter_map(|p| p.components().next()).collect();
  let nested = paths.iter().any(|p| p.components().count() > 1);
  if roots.len() == 1 && nested { 1 } else { 0 }
}

fn strip(path: &Path, count: usize) -> Option<PathBuf> {
  if path.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))) {
    return None;
  }
  let stripped: PathBuf = path.components().skip(count).collect();
  if stripped.as_os_str().is_empty() { None } else { Some(stripped) }
}

fn tar_paths<R: Read>(reader: R, name: &str) -> Result<Vec<PathBuf>, ResourceError> {
  let mut archive = Archive::new(reader);
  let mut paths = Vec::new();
  for entry in archive.entries()? {
    let entry = entry?;
    paths.push(entry.path()?.into_owned());
  }
  if paths.is_empty() {
    return Err(ResourceError::InvalidEntry {
      archive: name.to_string(),
      message: "archive is empty".to_string(),
    });
  }
  Ok(paths)
}

fn unpack_tar<R: Read>(reader: R, dest: &Path, strip_components: usize) -> Result<(), ResourceError> {
  let mut archive = Archive::new(reader);

  for entry in archive.entries()? {
    let mut entry = entry?;
    let path = entry.path()?.into_owned();
    let Some(stripped) = strip(&path, strip_components) else {
      continue;
    };

    let dest_path = dest.join(&stripped);
    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent)?;
    }
    entry.unpack(&dest_path)?;
  }

  Ok(())
}

fn unpack_zip(bytes: &[u8], dest: &Path, name: &str) -> Result<(), ResourceError> {
  let invalid = |e: zip::result::ZipError| ResourceError::InvalidEntry {
    archive: name.to_string(),
    message: e.to_string(),
  };
  let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(invalid)?;

  let mut paths = Vec::with_capacity(archive.len());
  for i in 0..archive.len() {
    let file = archive.by_index(i).map_err(invalid)?;
    let path = file.enclosed_name().ok_or_else(|| ResourceError::InvalidEntry {
      archive: name.to_string(),
      message: format!("unsafe entry name '{}'", file.name()),
    })?;
    paths.push(path);
  }
  let strip_components = strip_count(&paths);

  for (i, path) in paths.iter().enumerate() {
    let mut file = archive.by_index(i).map_err(invalid)?;
    let Some(stripped) = strip(path, strip_components) else {
      continue;
    };
    let dest_path = dest.join(&stripped);

    if file.is_dir() {
      fs::create_dir_all(&dest_path)?;
      continue;
    }
    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent)?;
    }
    let mut outfile = File::create(&dest_path)?;
    std::io::copy(&mut file, &mut outfile)?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = file.unix_mode() {
        fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode))?;
      }
    }
  }

  Ok(())
}
